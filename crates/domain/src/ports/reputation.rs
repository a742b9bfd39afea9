use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::reputation::{ActivityEntry, ReputationAccount, ReputationEvent};

use super::BoxFuture;

/// One award: the event row, the updated account and its audit entries.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AwardCommit {
    pub account: ReputationAccount,
    /// `None` when the account does not exist yet.
    pub expected_version: Option<u64>,
    pub event: ReputationEvent,
    pub activities: Vec<ActivityEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AwardCommitOutcome {
    Committed,
    /// An event with the same idempotency key is already stored.
    DuplicateKey,
    /// The account moved past `expected_version`; nothing was written.
    StaleAccount,
}

pub trait ReputationRepository: Send + Sync {
    fn get_account(
        &self,
        user_id: &str,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ReputationAccount>>>;
    fn list_accounts_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationAccount>>>;
    fn list_accounts_for_community(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationAccount>>>;
    /// Highest `total_rp` first, ties by `user_id`, at most `limit` rows.
    fn list_top_accounts(
        &self,
        community_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationAccount>>>;
    fn find_event_by_key(
        &self,
        idempotency_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ReputationEvent>>>;
    /// Writes the event, account and activities atomically, or nothing.
    fn commit_award(&self, commit: &AwardCommit) -> BoxFuture<'_, DomainResult<AwardCommitOutcome>>;
    /// Newest first.
    fn list_events(
        &self,
        user_id: &str,
        community_id: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationEvent>>>;
    /// Newest first.
    fn list_activity(
        &self,
        user_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ActivityEntry>>>;
}
