use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ChainType;

/// Backlog entry for a deposit address the sweeper could not finish.
///
/// A parked entry (`next_retry_at == None`) failed permanently and is skipped until
/// an operator removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRetryEntry {
    pub user_id: Uuid,
    pub chain: ChainType,
    pub retry_count: i32,
    pub error_reason: String,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl CollectionRetryEntry {
    pub fn is_parked(&self) -> bool {
        self.next_retry_at.is_none()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.next_retry_at, Some(at) if at <= now)
    }
}
