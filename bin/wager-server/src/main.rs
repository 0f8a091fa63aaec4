use blockchain_utils::init_logger;
use clap::Parser;
use wager_server::{server::run_server, Result, WagerServerArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let args = WagerServerArgs::parse();

    init_logger(&args.log_level).expect("Logger should initialize");

    run_server(args).await
}
