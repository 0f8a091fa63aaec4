mod erc20;

pub use erc20::*;
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;

/// Converts the outcome of a background task that should never finish into an error.
pub fn handle_background_thread_result<T, E>(
    result: Option<Result<Result<T, E>, tokio::task::JoinError>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match result {
        Some(Ok(Ok(_))) => Err("Background task completed unexpectedly".into()),
        Some(Ok(Err(e))) => Err(format!("Background task failed: {e}").into()),
        Some(Err(e)) if e.is_panic() => Err(format!("Background task panicked: {e}").into()),
        Some(Err(e)) => Err(format!("Background task was cancelled: {e}").into()),
        None => Err("No background tasks were running".into()),
    }
}

#[derive(Debug, snafu::Snafu)]
pub enum InitLoggerError {
    #[snafu(display("Invalid log filter '{filter}': {source}"))]
    InvalidFilter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[snafu(display("Failed to initialize logger: {}", source))]
    LoggerFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub fn init_logger(log_level: &str) -> Result<(), InitLoggerError> {
    let filter = EnvFilter::try_new(log_level).context(InvalidFilterSnafu {
        filter: log_level.to_string(),
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .context(LoggerFailedSnafu)?;

    Ok(())
}

/// Awaits the first shutdown signal (SIGTERM or SIGINT) and then returns.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            tracing::error!("Failed to install unix signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        };

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {e}");
        }
    }
}
