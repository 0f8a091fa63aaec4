use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build HTTP client: {source:?}"))]
    BuildClient { source: reqwest::Error },

    #[snafu(display("Failed to send request: {source:?} at {loc}"))]
    Request {
        source: reqwest::Error,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Indexer returned HTTP {status} at {loc}"))]
    Status {
        status: reqwest::StatusCode,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Failed to parse response: {source:?}"))]
    ParseResponse {
        source: reqwest::Error,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Invalid base URL: {source:?}"))]
    InvalidUrl {
        source: url::ParseError,
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub id: String,
    pub amount: String, // BigInt serialized as string
    /// Block timestamp in unix seconds
    pub timestamp: u64,
    pub from: Address,
    pub to: Address,
    pub token: Address,
    pub transaction_hash: B256,
    pub block_number: String, // BigInt serialized as string
    pub block_hash: B256,
}

impl TransferEvent {
    /// Parsed transfer value, `None` if the indexer sent something that is not a base-10 integer.
    pub fn value(&self) -> Option<U256> {
        U256::from_str_radix(&self.amount, 10).ok()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}

impl Pagination {
    pub fn has_next_page(&self) -> bool {
        self.page < self.total_pages
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransfersResponse {
    pub transfers: Vec<TransferEvent>,
    pub pagination: Pagination,
}

/// Filters for `transfers/to/{address}`. Results are ordered oldest first.
#[derive(Debug, Clone, Default)]
pub struct TransferQuery {
    pub token: Option<Address>,
    /// Only transfers in blocks at or after this unix timestamp (seconds)
    pub min_timestamp: Option<u64>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub struct TokenIndexerClient {
    client: Client,
    base_url: Url,
}

impl TokenIndexerClient {
    pub fn new(base_url: impl AsRef<str>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context(BuildClientSnafu)?;

        tracing::info!(
            "Creating TokenIndexerClient with base URL: {}",
            base_url.as_ref()
        );

        let base_url = Url::parse(base_url.as_ref()).context(InvalidUrlSnafu)?;

        Ok(Self { client, base_url })
    }

    fn transfers_url(&self, address: Address, query: &TransferQuery) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("transfers/to/{address:?}"))
            .context(InvalidUrlSnafu)?;

        {
            let mut query_pairs = url.query_pairs_mut();

            if let Some(token) = query.token {
                query_pairs.append_pair("token", &format!("{token:?}"));
            }

            if let Some(min_timestamp) = query.min_timestamp {
                query_pairs.append_pair("minTimestamp", &min_timestamp.to_string());
            }

            if let Some(page) = query.page {
                query_pairs.append_pair("page", &page.to_string());
            }

            if let Some(limit) = query.limit {
                query_pairs.append_pair("limit", &limit.to_string());
            }
        }

        Ok(url)
    }

    pub async fn get_transfers_to(
        &self,
        address: Address,
        query: &TransferQuery,
    ) -> Result<TransfersResponse> {
        let url = self.transfers_url(address, query)?;

        tracing::debug!(%address, ?query, "Fetching indexed transfers");

        let response = self.client.get(url).send().await.context(RequestSnafu)?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu { status }.fail();
        }

        let response = response
            .json::<TransfersResponse>()
            .await
            .context(ParseResponseSnafu)?;

        Ok(response)
    }
}
