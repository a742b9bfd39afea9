//! In-process implementations of every ledger port. Each repository keeps its
//! state behind a single async lock and performs every multi-step mutation
//! under one write guard, which makes each call serializable.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::DomainResult;
use crate::error::DomainError;
use crate::impact::CommunityImpactScore;
use crate::issues::{IssueConsensusState, IssueFlag, IssueRegistration};
use crate::ports::BoxFuture;
use crate::ports::events::{EventSinkError, LedgerEventSink, QuorumNotification};
use crate::ports::impact::ImpactScoreRepository;
use crate::ports::issues::{IssueRepository, QuorumCommit, VoteCommit};
use crate::ports::reputation::{AwardCommit, AwardCommitOutcome, ReputationRepository};
use crate::quorum::evaluate_quorum;
use crate::profile::leaderboard_order;
use crate::reputation::{ActivityEntry, ReputationAccount, ReputationEvent, account_key};
use crate::verification::{VoteOutcome, VoteRecord, vote_key};

#[derive(Default)]
struct IssueStore {
    issues: HashMap<String, IssueConsensusState>,
    votes: HashMap<String, VoteRecord>,
}

#[derive(Clone, Default)]
pub struct InMemoryIssueRepository {
    store: Arc<RwLock<IssueStore>>,
}

impl InMemoryIssueRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IssueRepository for InMemoryIssueRepository {
    fn upsert_issue(
        &self,
        registration: &IssueRegistration,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<IssueConsensusState>> {
        let registration = registration.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut guard = store.write().await;
            let issue = guard
                .issues
                .entry(registration.issue_id.clone())
                .and_modify(|issue| issue.apply_registration(&registration, now_ms))
                .or_insert_with(|| IssueConsensusState::from_registration(&registration, now_ms));
            Ok(issue.clone())
        })
    }

    fn get_issue(
        &self,
        issue_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<IssueConsensusState>>> {
        let issue_id = issue_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.issues.get(&issue_id).cloned()) })
    }

    fn list_issues_by_community(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<IssueConsensusState>>> {
        let community_id = community_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let guard = store.read().await;
            let mut issues: Vec<_> = guard
                .issues
                .values()
                .filter(|issue| issue.community_id == community_id)
                .cloned()
                .collect();
            issues.sort_by(|left, right| left.issue_id.cmp(&right.issue_id));
            Ok(issues)
        })
    }

    fn record_vote(
        &self,
        vote: &VoteRecord,
        quorum_threshold: u32,
    ) -> BoxFuture<'_, DomainResult<VoteCommit>> {
        let vote = vote.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut guard = store.write().await;
            let IssueStore { issues, votes } = &mut *guard;
            let issue = issues
                .get_mut(&vote.issue_id)
                .ok_or(DomainError::IssueNotFound)?;
            let key = vote.key();
            if votes.contains_key(&key) {
                return Err(DomainError::DuplicateVote);
            }
            match vote.outcome {
                VoteOutcome::Correct => issue.correct_votes += 1,
                VoteOutcome::Incorrect => issue.incorrect_votes += 1,
            }
            issue.updated_at_ms = vote.created_at_ms;
            let transition = evaluate_quorum(issue, quorum_threshold, vote.created_at_ms);
            votes.insert(key, vote.clone());
            Ok(VoteCommit {
                vote,
                issue: issue.clone(),
                transition,
            })
        })
    }

    fn try_resolve_quorum(
        &self,
        issue_id: &str,
        quorum_threshold: u32,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<QuorumCommit>> {
        let issue_id = issue_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut guard = store.write().await;
            let issue = guard
                .issues
                .get_mut(&issue_id)
                .ok_or(DomainError::IssueNotFound)?;
            let transition = evaluate_quorum(issue, quorum_threshold, now_ms);
            Ok(QuorumCommit {
                issue: issue.clone(),
                transition,
            })
        })
    }

    fn set_issue_flag(
        &self,
        issue_id: &str,
        flag: IssueFlag,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<bool>> {
        let issue_id = issue_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut guard = store.write().await;
            let issue = guard
                .issues
                .get_mut(&issue_id)
                .ok_or(DomainError::IssueNotFound)?;
            Ok(issue.apply_flag(flag, now_ms))
        })
    }

    fn reopen_issue(&self, issue_id: &str, now_ms: i64) -> BoxFuture<'_, DomainResult<bool>> {
        let issue_id = issue_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut guard = store.write().await;
            let issue = guard
                .issues
                .get_mut(&issue_id)
                .ok_or(DomainError::IssueNotFound)?;
            Ok(issue.reopen(now_ms))
        })
    }

    fn get_vote(
        &self,
        issue_id: &str,
        voter_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<VoteRecord>>> {
        let key = vote_key(issue_id, voter_id);
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.votes.get(&key).cloned()) })
    }

    fn list_votes(&self, issue_id: &str) -> BoxFuture<'_, DomainResult<Vec<VoteRecord>>> {
        let issue_id = issue_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let guard = store.read().await;
            let mut votes: Vec<_> = guard
                .votes
                .values()
                .filter(|vote| vote.issue_id == issue_id)
                .cloned()
                .collect();
            votes.sort_by(|left, right| {
                left.created_at_ms
                    .cmp(&right.created_at_ms)
                    .then_with(|| left.vote_id.cmp(&right.vote_id))
            });
            Ok(votes)
        })
    }
}

#[derive(Default)]
struct LedgerStore {
    accounts: HashMap<String, ReputationAccount>,
    events: Vec<ReputationEvent>,
    event_keys: HashMap<String, usize>,
    activity: Vec<ActivityEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryReputationRepository {
    store: Arc<RwLock<LedgerStore>>,
}

impl InMemoryReputationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.store.read().await.events.len()
    }
}

impl ReputationRepository for InMemoryReputationRepository {
    fn get_account(
        &self,
        user_id: &str,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ReputationAccount>>> {
        let key = account_key(user_id, community_id);
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.accounts.get(&key).cloned()) })
    }

    fn list_accounts_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationAccount>>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .accounts
                .values()
                .filter(|account| account.user_id == user_id)
                .cloned()
                .collect())
        })
    }

    fn list_accounts_for_community(
        &self,
        community_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationAccount>>> {
        let community_id = community_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .accounts
                .values()
                .filter(|account| account.community_id == community_id)
                .cloned()
                .collect())
        })
    }

    fn list_top_accounts(
        &self,
        community_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationAccount>>> {
        let community_id = community_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut accounts: Vec<ReputationAccount> = store
                .read()
                .await
                .accounts
                .values()
                .filter(|account| account.community_id == community_id)
                .cloned()
                .collect();
            accounts.sort_by(leaderboard_order);
            accounts.truncate(limit);
            Ok(accounts)
        })
    }

    fn find_event_by_key(
        &self,
        idempotency_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ReputationEvent>>> {
        let idempotency_key = idempotency_key.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let guard = store.read().await;
            Ok(guard
                .event_keys
                .get(&idempotency_key)
                .and_then(|index| guard.events.get(*index))
                .cloned())
        })
    }

    fn commit_award(
        &self,
        commit: &AwardCommit,
    ) -> BoxFuture<'_, DomainResult<AwardCommitOutcome>> {
        let commit = commit.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut guard = store.write().await;
            if guard.event_keys.contains_key(&commit.event.idempotency_key) {
                return Ok(AwardCommitOutcome::DuplicateKey);
            }
            let key = commit.account.key();
            let stored_version = guard.accounts.get(&key).map(|account| account.version);
            if stored_version != commit.expected_version {
                return Ok(AwardCommitOutcome::StaleAccount);
            }
            let index = guard.events.len();
            guard
                .event_keys
                .insert(commit.event.idempotency_key.clone(), index);
            guard.events.push(commit.event);
            guard.accounts.insert(key, commit.account);
            guard.activity.extend(commit.activities);
            Ok(AwardCommitOutcome::Committed)
        })
    }

    fn list_events(
        &self,
        user_id: &str,
        community_id: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ReputationEvent>>> {
        let user_id = user_id.to_string();
        let community_id = community_id.map(str::to_string);
        let store = self.store.clone();
        Box::pin(async move {
            let guard = store.read().await;
            Ok(guard
                .events
                .iter()
                .rev()
                .filter(|event| event.user_id == user_id)
                .filter(|event| {
                    community_id
                        .as_deref()
                        .map_or(true, |community| event.community_id == community)
                })
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn list_activity(
        &self,
        user_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ActivityEntry>>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let guard = store.read().await;
            Ok(guard
                .activity
                .iter()
                .rev()
                .filter(|entry| entry.user_id == user_id)
                .take(limit)
                .cloned()
                .collect())
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryImpactRepository {
    scores: Arc<RwLock<HashMap<String, CommunityImpactScore>>>,
}

impl InMemoryImpactRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImpactScoreRepository for InMemoryImpactRepository {
    fn get(&self, community_id: &str) -> BoxFuture<'_, DomainResult<Option<CommunityImpactScore>>> {
        let community_id = community_id.to_string();
        let scores = self.scores.clone();
        Box::pin(async move { Ok(scores.read().await.get(&community_id).cloned()) })
    }

    fn put(&self, score: &CommunityImpactScore) -> BoxFuture<'_, DomainResult<()>> {
        let score = score.clone();
        let scores = self.scores.clone();
        Box::pin(async move {
            scores
                .write()
                .await
                .insert(score.community_id.clone(), score);
            Ok(())
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedEvent {
    QuorumResolved(QuorumNotification),
    ImpactInvalidated(String),
}

/// Keeps every emitted event for inspection.
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<RwLock<Vec<RecordedEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().await.clone()
    }

    pub async fn notifications(&self) -> Vec<QuorumNotification> {
        self.events
            .read()
            .await
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::QuorumResolved(notification) => Some(notification.clone()),
                RecordedEvent::ImpactInvalidated(_) => None,
            })
            .collect()
    }
}

impl LedgerEventSink for RecordingEventSink {
    fn quorum_resolved(
        &self,
        notification: &QuorumNotification,
    ) -> BoxFuture<'_, Result<(), EventSinkError>> {
        let event = RecordedEvent::QuorumResolved(notification.clone());
        let events = self.events.clone();
        Box::pin(async move {
            events.write().await.push(event);
            Ok(())
        })
    }

    fn impact_invalidated(&self, community_id: &str) -> BoxFuture<'_, Result<(), EventSinkError>> {
        let event = RecordedEvent::ImpactInvalidated(community_id.to_string());
        let events = self.events.clone();
        Box::pin(async move {
            events.write().await.push(event);
            Ok(())
        })
    }
}
