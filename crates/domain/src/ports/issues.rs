use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::issues::{IssueConsensusState, IssueFlag, IssueRegistration};
use crate::quorum::QuorumTransition;
use crate::verification::VoteRecord;

use super::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VoteCommit {
    pub vote: VoteRecord,
    pub issue: IssueConsensusState,
    pub transition: QuorumTransition,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuorumCommit {
    pub issue: IssueConsensusState,
    pub transition: QuorumTransition,
}

pub trait IssueRepository: Send + Sync {
    fn upsert_issue(
        &self,
        registration: &IssueRegistration,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<IssueConsensusState>>;
    fn get_issue(&self, issue_id: &str) -> BoxFuture<'_, DomainResult<Option<IssueConsensusState>>>;
    fn list_issues_by_community(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<IssueConsensusState>>>;
    /// Inserts the vote, bumps the tally and runs the quorum check-and-set as
    /// one atomic unit. Fails with `DuplicateVote` or `IssueNotFound`.
    fn record_vote(
        &self,
        vote: &VoteRecord,
        quorum_threshold: u32,
    ) -> BoxFuture<'_, DomainResult<VoteCommit>>;
    fn try_resolve_quorum(
        &self,
        issue_id: &str,
        quorum_threshold: u32,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<QuorumCommit>>;
    /// Returns `true` when this call flipped the flag.
    fn set_issue_flag(
        &self,
        issue_id: &str,
        flag: IssueFlag,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<bool>>;
    /// Resolved to in-progress with the reopen counter bumped; `false` otherwise.
    fn reopen_issue(&self, issue_id: &str, now_ms: i64) -> BoxFuture<'_, DomainResult<bool>>;
    fn get_vote(
        &self,
        issue_id: &str,
        voter_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<VoteRecord>>>;
    fn list_votes(&self, issue_id: &str) -> BoxFuture<'_, DomainResult<Vec<VoteRecord>>>;
}
