use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::DomainResult;
use crate::error::DomainError;
use crate::identity::LedgerActor;
use crate::issues::{
    IssueConsensusState, IssueRegistration, ensure_identity_unchanged, validate_registration,
};
use crate::jobs::now_ms;
use crate::ledger::LedgerConfig;
use crate::ports::issues::IssueRepository;
use crate::quorum::{QuorumAwards, QuorumResolver, QuorumTransition};
use crate::util::{composite_key, uuid_v7_without_dashes};

const MAX_REMARK_LENGTH: usize = 500;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Correct,
    Incorrect,
}

impl VoteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteOutcome::Correct => "correct",
            VoteOutcome::Incorrect => "incorrect",
        }
    }
}

/// Immutable; at most one per (issue, voter).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VoteRecord {
    pub vote_id: String,
    pub issue_id: String,
    pub voter_id: String,
    pub outcome: VoteOutcome,
    pub remark: Option<String>,
    pub created_at_ms: i64,
}

impl VoteRecord {
    pub fn key(&self) -> String {
        vote_key(&self.issue_id, &self.voter_id)
    }
}

pub fn vote_key(issue_id: &str, voter_id: &str) -> String {
    composite_key("vote", &[issue_id, voter_id])
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VerificationStats {
    pub issue_id: String,
    pub correct_votes: u32,
    pub incorrect_votes: u32,
    pub total: u32,
    pub quorum_threshold: u32,
    pub votes_needed: u32,
    pub quorum_met: bool,
    pub consensus_accurate: Option<bool>,
}

impl VerificationStats {
    pub fn from_issue(issue: &IssueConsensusState, quorum_threshold: u32) -> Self {
        let total = issue.total_votes();
        Self {
            issue_id: issue.issue_id.clone(),
            correct_votes: issue.correct_votes,
            incorrect_votes: issue.incorrect_votes,
            total,
            quorum_threshold,
            votes_needed: if issue.quorum_met {
                0
            } else {
                quorum_threshold.saturating_sub(total)
            },
            quorum_met: issue.quorum_met,
            consensus_accurate: issue.consensus_accurate,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CastVote {
    pub issue_id: String,
    pub outcome: VoteOutcome,
    pub remark: Option<String>,
    pub request_ts_ms: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VoteReceipt {
    pub vote: VoteRecord,
    pub stats: VerificationStats,
    pub quorum: QuorumTransition,
    pub awards: QuorumAwards,
}

#[derive(Clone)]
pub struct VerificationService {
    issues: Arc<dyn IssueRepository>,
    quorum: QuorumResolver,
    config: LedgerConfig,
}

impl VerificationService {
    pub fn new(
        issues: Arc<dyn IssueRepository>,
        quorum: QuorumResolver,
        config: LedgerConfig,
    ) -> Self {
        Self {
            issues,
            quorum,
            config,
        }
    }

    pub async fn upsert_issue(
        &self,
        actor: &LedgerActor,
        registration: IssueRegistration,
    ) -> DomainResult<IssueConsensusState> {
        if !actor.role.is_official() {
            return Err(DomainError::InsufficientPermission(
                "only officials can register issues".into(),
            ));
        }
        let registration = validate_registration(&registration)?;
        if let Some(existing) = self.issues.get_issue(&registration.issue_id).await? {
            ensure_identity_unchanged(&existing, &registration)?;
        }
        self.issues.upsert_issue(&registration, now_ms()).await
    }

    pub async fn record_vote(
        &self,
        actor: &LedgerActor,
        input: CastVote,
    ) -> DomainResult<VoteReceipt> {
        let input = validate_cast_vote(input)?;
        ensure_can_vote(actor)?;
        let issue = self.require_issue(&input.issue_id).await?;
        if issue.reporter_id == actor.user_id() {
            return Err(DomainError::InsufficientPermission(
                "reporters cannot verify their own issue".into(),
            ));
        }

        let vote = VoteRecord {
            vote_id: uuid_v7_without_dashes(),
            issue_id: input.issue_id,
            voter_id: actor.user_id().to_string(),
            outcome: input.outcome,
            remark: input.remark,
            created_at_ms: input.request_ts_ms.unwrap_or_else(now_ms),
        };
        let commit = match self
            .issues
            .record_vote(&vote, self.config.quorum_threshold)
            .await
        {
            Ok(commit) => commit,
            Err(err) => {
                if matches!(err, DomainError::DuplicateVote) {
                    counter!("civic_ledger_votes_total", "outcome" => "duplicate").increment(1);
                }
                return Err(err);
            }
        };
        counter!("civic_ledger_votes_total", "outcome" => vote.outcome.as_str()).increment(1);
        info!(
            issue_id = %commit.vote.issue_id,
            user_id = %commit.vote.voter_id,
            outcome = commit.vote.outcome.as_str(),
            correct_votes = commit.issue.correct_votes,
            incorrect_votes = commit.issue.incorrect_votes,
            "verification vote recorded"
        );

        let resolution = self
            .quorum
            .after_commit(commit.issue, commit.transition)
            .await;
        Ok(VoteReceipt {
            stats: VerificationStats::from_issue(&resolution.issue, self.config.quorum_threshold),
            vote: commit.vote,
            quorum: resolution.transition,
            awards: resolution.awards,
        })
    }

    pub async fn get_verification_stats(&self, issue_id: &str) -> DomainResult<VerificationStats> {
        let issue = self.require_issue(issue_id).await?;
        Ok(VerificationStats::from_issue(
            &issue,
            self.config.quorum_threshold,
        ))
    }

    pub async fn get_vote(
        &self,
        issue_id: &str,
        voter_id: &str,
    ) -> DomainResult<Option<VoteRecord>> {
        self.require_issue(issue_id).await?;
        self.issues.get_vote(issue_id, voter_id).await
    }

    pub async fn list_votes(
        &self,
        actor: &LedgerActor,
        issue_id: &str,
    ) -> DomainResult<Vec<VoteRecord>> {
        if !actor.role.can_list_verifiers() {
            return Err(DomainError::InsufficientPermission(
                "verifier list is restricted to community members and officials".into(),
            ));
        }
        self.require_issue(issue_id).await?;
        self.issues.list_votes(issue_id).await
    }

    pub async fn get_issue(&self, issue_id: &str) -> DomainResult<IssueConsensusState> {
        self.require_issue(issue_id).await
    }

    async fn require_issue(&self, issue_id: &str) -> DomainResult<IssueConsensusState> {
        self.issues
            .get_issue(issue_id)
            .await?
            .ok_or(DomainError::IssueNotFound)
    }
}

fn ensure_can_vote(actor: &LedgerActor) -> DomainResult<()> {
    if !actor.role.can_vote() {
        return Err(DomainError::InsufficientPermission(
            "only community members can verify issues".into(),
        ));
    }
    if !actor.profile_complete {
        return Err(DomainError::InsufficientPermission(
            "complete your profile before verifying issues".into(),
        ));
    }
    Ok(())
}

fn validate_cast_vote(input: CastVote) -> DomainResult<CastVote> {
    let issue_id = input.issue_id.trim().to_string();
    if issue_id.is_empty() {
        return Err(DomainError::Validation("issue_id is required".into()));
    }
    let remark = input
        .remark
        .map(|remark| remark.trim().to_string())
        .filter(|remark| !remark.is_empty());
    if let Some(remark) = &remark {
        if remark.chars().count() > MAX_REMARK_LENGTH {
            return Err(DomainError::Validation(format!(
                "remark exceeds max length of {MAX_REMARK_LENGTH}"
            )));
        }
    }
    Ok(CastVote {
        issue_id,
        remark,
        ..input
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::identity::ActorIdentity;

    fn actor(role: Role, profile_complete: bool) -> LedgerActor {
        LedgerActor::new(ActorIdentity::with_user_id("user-b"), role, profile_complete)
    }

    #[test]
    fn voting_requires_community_role() {
        assert!(ensure_can_vote(&actor(Role::Community, true)).is_ok());
        assert!(matches!(
            ensure_can_vote(&actor(Role::Citizen, true)),
            Err(DomainError::InsufficientPermission(_))
        ));
    }

    #[test]
    fn voting_requires_complete_profile() {
        assert!(matches!(
            ensure_can_vote(&actor(Role::Community, false)),
            Err(DomainError::InsufficientPermission(_))
        ));
    }

    #[test]
    fn blank_remarks_are_dropped_and_long_ones_rejected() {
        let input = CastVote {
            issue_id: " issue-1 ".into(),
            outcome: VoteOutcome::Correct,
            remark: Some("   ".into()),
            request_ts_ms: None,
        };
        let cleaned = validate_cast_vote(input).unwrap();
        assert_eq!(cleaned.issue_id, "issue-1");
        assert_eq!(cleaned.remark, None);

        let input = CastVote {
            issue_id: "issue-1".into(),
            outcome: VoteOutcome::Incorrect,
            remark: Some("x".repeat(MAX_REMARK_LENGTH + 1)),
            request_ts_ms: None,
        };
        assert!(validate_cast_vote(input).is_err());
    }

    #[test]
    fn stats_report_votes_needed_until_quorum() {
        let mut issue = IssueConsensusState::from_registration(
            &IssueRegistration {
                issue_id: "issue-1".into(),
                community_id: "c1".into(),
                reporter_id: "user-a".into(),
                category: None,
                status: crate::issues::IssueStatus::Reported,
                created_at_ms: None,
                resolved_at_ms: None,
            },
            0,
        );
        issue.correct_votes = 2;
        let stats = VerificationStats::from_issue(&issue, 3);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.votes_needed, 1);

        issue.correct_votes = 3;
        issue.quorum_met = true;
        assert_eq!(VerificationStats::from_issue(&issue, 3).votes_needed, 0);
    }
}
