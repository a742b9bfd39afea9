use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::DomainResult;
use crate::error::DomainError;
use crate::identity::LedgerActor;
use crate::issues::{IssueConsensusState, IssueFlag, IssueStatus};
use crate::jobs::now_ms;
use crate::ports::events::LedgerEventSink;
use crate::ports::issues::IssueRepository;
use crate::reputation::{
    AwardOutcome, ReputationAccountant, ReputationEventType, issue_event_key,
};

#[derive(Clone, Debug)]
pub struct ResolveOutcome {
    pub issue_id: String,
    pub is_resolved: bool,
    pub request_ts_ms: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResolutionReceipt {
    pub issue: IssueConsensusState,
    pub is_resolved: bool,
    /// Whether this call moved the issue from resolved back to in progress.
    pub reopened: bool,
    pub award: Option<AwardOutcome>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PenaltyReceipt {
    pub issue: IssueConsensusState,
    pub outcome: AwardOutcome,
}

#[derive(Clone)]
pub struct ResolutionService {
    issues: Arc<dyn IssueRepository>,
    accountant: ReputationAccountant,
    events: Arc<dyn LedgerEventSink>,
}

impl ResolutionService {
    pub fn new(
        issues: Arc<dyn IssueRepository>,
        accountant: ReputationAccountant,
        events: Arc<dyn LedgerEventSink>,
    ) -> Self {
        Self {
            issues,
            accountant,
            events,
        }
    }

    pub async fn resolve_outcome(
        &self,
        actor: &LedgerActor,
        input: ResolveOutcome,
    ) -> DomainResult<ResolutionReceipt> {
        if !actor.role.can_verify_resolution() {
            return Err(DomainError::InsufficientPermission(
                "only community members and officials can verify resolutions".into(),
            ));
        }
        let issue = self.require_issue(&input.issue_id).await?;
        if input.is_resolved {
            self.confirm_resolution(actor, issue, input.request_ts_ms).await
        } else {
            self.flag_false_resolution(actor, issue, input.request_ts_ms)
                .await
        }
    }

    async fn confirm_resolution(
        &self,
        actor: &LedgerActor,
        mut issue: IssueConsensusState,
        request_ts_ms: Option<i64>,
    ) -> DomainResult<ResolutionReceipt> {
        if actor.user_id() == issue.reporter_id {
            return Err(DomainError::InsufficientPermission(
                "reporters cannot verify their own resolution".into(),
            ));
        }
        if issue.status != IssueStatus::Resolved && !issue.resolution_verified {
            return Err(DomainError::Validation(
                "issue is not marked resolved".into(),
            ));
        }
        let now = request_ts_ms.unwrap_or_else(now_ms);
        let fresh = self
            .issues
            .set_issue_flag(&issue.issue_id, IssueFlag::ResolutionVerified, now)
            .await?;
        issue.apply_flag(IssueFlag::ResolutionVerified, now);

        let mut award = None;
        if !issue.rp_awarded_for_resolution {
            let outcome = self
                .accountant
                .award_issue_verified_resolved(&issue, actor.user_id(), request_ts_ms)
                .await?;
            if outcome.is_settled() {
                self.issues
                    .set_issue_flag(&issue.issue_id, IssueFlag::ResolutionAwarded, now)
                    .await?;
                issue.apply_flag(IssueFlag::ResolutionAwarded, now);
            }
            award = Some(outcome);
        }
        if fresh {
            info!(
                issue_id = %issue.issue_id,
                user_id = actor.user_id(),
                "issue resolution verified by community"
            );
            self.invalidate_impact(&issue.community_id).await;
        }
        Ok(ResolutionReceipt {
            issue,
            is_resolved: true,
            reopened: false,
            award,
        })
    }

    /// Rewards the verifier and reopens the issue. Escalating to a fake-issue
    /// penalty is a separate call.
    async fn flag_false_resolution(
        &self,
        actor: &LedgerActor,
        issue: IssueConsensusState,
        request_ts_ms: Option<i64>,
    ) -> DomainResult<ResolutionReceipt> {
        let key = issue_event_key(
            ReputationEventType::FalseResolutionFlagged,
            actor.user_id(),
            &issue.issue_id,
        );
        let retry = self.accountant.has_event(&key).await?;
        if issue.status != IssueStatus::Resolved && !retry {
            return Err(DomainError::Validation(
                "only resolved issues can be flagged as falsely resolved".into(),
            ));
        }
        if actor.user_id() == issue.reporter_id {
            return Err(DomainError::InsufficientPermission(
                "reporters cannot flag their own issue".into(),
            ));
        }

        let outcome = self
            .accountant
            .award_false_resolution_flagged(actor.user_id(), &issue, request_ts_ms)
            .await?;
        let now = request_ts_ms.unwrap_or_else(now_ms);
        let reopened = self.issues.reopen_issue(&issue.issue_id, now).await?;
        if reopened {
            warn!(
                issue_id = %issue.issue_id,
                user_id = actor.user_id(),
                "resolution flagged as false; issue reopened"
            );
            self.invalidate_impact(&issue.community_id).await;
        }
        let issue = self.require_issue(&issue.issue_id).await?;
        Ok(ResolutionReceipt {
            issue,
            is_resolved: false,
            reopened,
            award: Some(outcome),
        })
    }

    /// An official confirms the uploaded after photo; the uploader earns once.
    pub async fn verify_after_photo(
        &self,
        actor: &LedgerActor,
        issue_id: &str,
        uploader_id: &str,
        request_ts_ms: Option<i64>,
    ) -> DomainResult<ResolutionReceipt> {
        if !actor.role.is_official() {
            return Err(DomainError::InsufficientPermission(
                "only officials can verify after photos".into(),
            ));
        }
        let uploader_id = uploader_id.trim();
        if uploader_id.is_empty() {
            return Err(DomainError::Validation("uploader_id is required".into()));
        }
        let mut issue = self.require_issue(issue_id).await?;
        let now = request_ts_ms.unwrap_or_else(now_ms);
        self.issues
            .set_issue_flag(issue_id, IssueFlag::AfterPhotoVerified, now)
            .await?;
        issue.apply_flag(IssueFlag::AfterPhotoVerified, now);

        let mut award = None;
        if !issue.rp_awarded_for_after_photo {
            let outcome = self
                .accountant
                .award_after_photo(uploader_id, &issue, actor.user_id(), request_ts_ms)
                .await?;
            if outcome.is_settled() {
                self.issues
                    .set_issue_flag(issue_id, IssueFlag::AfterPhotoAwarded, now)
                    .await?;
                issue.apply_flag(IssueFlag::AfterPhotoAwarded, now);
            }
            award = Some(outcome);
        }
        Ok(ResolutionReceipt {
            is_resolved: issue.status == IssueStatus::Resolved,
            issue,
            reopened: false,
            award,
        })
    }

    /// Explicit, policy-gated penalty against the reporter of a fake issue.
    pub async fn apply_fake_issue_penalty(
        &self,
        actor: &LedgerActor,
        issue_id: &str,
        reason: Option<String>,
        request_ts_ms: Option<i64>,
    ) -> DomainResult<PenaltyReceipt> {
        if !actor.role.is_official() {
            return Err(DomainError::InsufficientPermission(
                "only officials can apply penalties".into(),
            ));
        }
        let mut issue = self.require_issue(issue_id).await?;
        let now = request_ts_ms.unwrap_or_else(now_ms);
        let fresh = self
            .issues
            .set_issue_flag(issue_id, IssueFlag::FlaggedAsFake, now)
            .await?;
        issue.apply_flag(IssueFlag::FlaggedAsFake, now);
        let reason = reason
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "fake issue report".to_string());
        let outcome = self
            .accountant
            .apply_fake_issue_penalty(&issue, actor.user_id(), &reason, request_ts_ms)
            .await?;
        if fresh {
            self.invalidate_impact(&issue.community_id).await;
        }
        Ok(PenaltyReceipt { issue, outcome })
    }

    pub async fn apply_spam_penalty(
        &self,
        actor: &LedgerActor,
        user_id: &str,
        community_id: &str,
        reason: Option<String>,
        request_ts_ms: Option<i64>,
    ) -> DomainResult<AwardOutcome> {
        if !actor.role.is_official() {
            return Err(DomainError::InsufficientPermission(
                "only officials can apply penalties".into(),
            ));
        }
        let reason = reason
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "spam".to_string());
        self.accountant
            .apply_spam_penalty(user_id, community_id, actor.user_id(), &reason, request_ts_ms)
            .await
    }

    async fn invalidate_impact(&self, community_id: &str) {
        if let Err(err) = self.events.impact_invalidated(community_id).await {
            warn!(community_id, error = %err, "impact invalidation dropped");
        }
    }

    async fn require_issue(&self, issue_id: &str) -> DomainResult<IssueConsensusState> {
        self.issues
            .get_issue(issue_id)
            .await?
            .ok_or(DomainError::IssueNotFound)
    }
}
