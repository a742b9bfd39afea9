use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum EventSinkError {
    #[error("event sink unavailable: {0}")]
    Unavailable(String),
    #[error("event sink serialization error: {0}")]
    Serialization(String),
}

/// Sent to the reporter's notification channel after a fresh quorum decision.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuorumNotification {
    pub issue_id: String,
    pub community_id: String,
    pub reporter_id: String,
    pub quorum_met: bool,
    pub is_accurate: bool,
    pub rp_awarded: i64,
    pub resolved_at_ms: i64,
}

/// Post-commit, best-effort side effects. Failures never undo ledger writes.
pub trait LedgerEventSink: Send + Sync {
    fn quorum_resolved(
        &self,
        notification: &QuorumNotification,
    ) -> BoxFuture<'_, Result<(), EventSinkError>>;
    fn impact_invalidated(&self, community_id: &str) -> BoxFuture<'_, Result<(), EventSinkError>>;
}
