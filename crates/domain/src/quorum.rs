use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::DomainResult;
use crate::error::DomainError;
use crate::issues::{IssueConsensusState, IssueFlag};
use crate::jobs::now_ms;
use crate::ledger::LedgerConfig;
use crate::ports::events::{LedgerEventSink, QuorumNotification};
use crate::ports::issues::IssueRepository;
use crate::reputation::{AwardOutcome, ReputationAccountant};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuorumTransition {
    Pending { votes_needed: u32 },
    Resolved { consensus_accurate: bool },
    AlreadyResolved,
}

impl QuorumTransition {
    pub fn is_fresh_resolution(&self) -> bool {
        matches!(self, QuorumTransition::Resolved { .. })
    }
}

/// The check-and-set at the heart of quorum resolution.
///
/// Must run inside the same atomic unit as the tally increment. The first
/// caller to see the threshold crossed wins; everyone after sees
/// `AlreadyResolved`. Ties resolve to not accurate.
pub fn evaluate_quorum(
    issue: &mut IssueConsensusState,
    threshold: u32,
    now_ms: i64,
) -> QuorumTransition {
    if issue.quorum_met {
        return QuorumTransition::AlreadyResolved;
    }
    let total = issue.total_votes();
    if total < threshold {
        return QuorumTransition::Pending {
            votes_needed: threshold - total,
        };
    }
    let accurate = issue.correct_votes > issue.incorrect_votes;
    issue.quorum_met = true;
    issue.quorum_met_at_ms = Some(now_ms);
    issue.consensus_accurate = Some(accurate);
    issue.updated_at_ms = now_ms;
    QuorumTransition::Resolved {
        consensus_accurate: accurate,
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QuorumAwards {
    pub community_confirmed_report: Option<AwardOutcome>,
    pub accurate_categorization: Option<AwardOutcome>,
}

impl QuorumAwards {
    pub fn rp_awarded(&self) -> i64 {
        [&self.community_confirmed_report, &self.accurate_categorization]
            .into_iter()
            .flatten()
            .map(AwardOutcome::points_awarded)
            .sum()
    }

    fn any_applied(&self) -> bool {
        [&self.community_confirmed_report, &self.accurate_categorization]
            .into_iter()
            .flatten()
            .any(AwardOutcome::is_applied)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuorumResolution {
    pub issue: IssueConsensusState,
    pub transition: QuorumTransition,
    pub awards: QuorumAwards,
}

#[derive(Clone)]
pub struct QuorumResolver {
    issues: Arc<dyn IssueRepository>,
    accountant: ReputationAccountant,
    events: Arc<dyn LedgerEventSink>,
    config: LedgerConfig,
}

impl QuorumResolver {
    pub fn new(
        issues: Arc<dyn IssueRepository>,
        accountant: ReputationAccountant,
        events: Arc<dyn LedgerEventSink>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            issues,
            accountant,
            events,
            config,
        }
    }

    /// Re-runs the quorum check for an issue and re-issues any award whose
    /// flag is still unset. Safe to call any number of times.
    pub async fn try_resolve_quorum(&self, issue_id: &str) -> DomainResult<QuorumResolution> {
        let commit = self
            .issues
            .try_resolve_quorum(issue_id, self.config.quorum_threshold, now_ms())
            .await?;
        let recovering = matches!(commit.transition, QuorumTransition::AlreadyResolved);
        let resolution = self.after_commit(commit.issue, commit.transition).await;
        if recovering && resolution.awards.any_applied() {
            info!(issue_id, "recovered quorum awards after interrupted dispatch");
            self.notify(&resolution).await;
        }
        Ok(resolution)
    }

    /// Post-commit half of a vote: dispatch awards and side effects once the
    /// tally transaction has landed.
    pub(crate) async fn after_commit(
        &self,
        issue: IssueConsensusState,
        transition: QuorumTransition,
    ) -> QuorumResolution {
        if let QuorumTransition::Resolved { consensus_accurate } = &transition {
            counter!(
                "civic_ledger_quorum_resolved_total",
                "accurate" => if *consensus_accurate { "true" } else { "false" }
            )
            .increment(1);
            info!(
                issue_id = %issue.issue_id,
                community_id = %issue.community_id,
                consensus_accurate,
                correct_votes = issue.correct_votes,
                incorrect_votes = issue.incorrect_votes,
                "verification quorum resolved"
            );
        }

        let mut resolution = QuorumResolution {
            awards: QuorumAwards::default(),
            issue,
            transition,
        };
        if resolution.issue.quorum_met {
            resolution.awards = self.dispatch_awards(&mut resolution.issue).await;
        }
        if resolution.transition.is_fresh_resolution() {
            self.notify(&resolution).await;
        }
        resolution
    }

    /// Errors are logged, not returned: the quorum decision is already durable
    /// and a later `try_resolve_quorum` picks up anything left undone.
    async fn dispatch_awards(&self, issue: &mut IssueConsensusState) -> QuorumAwards {
        let mut awards = QuorumAwards::default();
        if !issue.is_confirmed_accurate() {
            return awards;
        }

        if !issue.rp_awarded_for_community_confirm {
            let outcome = self
                .accountant
                .award_community_confirmed_report(issue)
                .await;
            awards.community_confirmed_report = self
                .settle(issue, IssueFlag::CommunityConfirmAwarded, outcome)
                .await;
        }
        if !issue.rp_awarded_for_categorization {
            let outcome = self.accountant.award_accurate_categorization(issue).await;
            awards.accurate_categorization = self
                .settle(issue, IssueFlag::CategorizationAwarded, outcome)
                .await;
        }
        awards
    }

    async fn settle(
        &self,
        issue: &mut IssueConsensusState,
        flag: IssueFlag,
        outcome: DomainResult<AwardOutcome>,
    ) -> Option<AwardOutcome> {
        match outcome {
            Ok(outcome) => {
                if outcome.is_settled() {
                    let now = now_ms();
                    match self.issues.set_issue_flag(&issue.issue_id, flag, now).await {
                        Ok(_) => {
                            issue.apply_flag(flag, now);
                        }
                        Err(err) => warn!(
                            issue_id = %issue.issue_id,
                            flag = flag.field_name(),
                            error = %err,
                            "failed to record award flag"
                        ),
                    }
                }
                Some(outcome)
            }
            Err(err) => {
                warn!(
                    issue_id = %issue.issue_id,
                    flag = flag.field_name(),
                    error = %err,
                    "quorum award dispatch failed"
                );
                None
            }
        }
    }

    async fn notify(&self, resolution: &QuorumResolution) {
        let issue = &resolution.issue;
        let notification = QuorumNotification {
            issue_id: issue.issue_id.clone(),
            community_id: issue.community_id.clone(),
            reporter_id: issue.reporter_id.clone(),
            quorum_met: issue.quorum_met,
            is_accurate: issue.consensus_accurate.unwrap_or(false),
            rp_awarded: resolution.awards.rp_awarded(),
            resolved_at_ms: issue.quorum_met_at_ms.unwrap_or_else(now_ms),
        };
        if let Err(err) = self.events.quorum_resolved(&notification).await {
            warn!(issue_id = %issue.issue_id, error = %err, "quorum notification dropped");
        }
        if let Err(err) = self.events.impact_invalidated(&issue.community_id).await {
            warn!(
                community_id = %issue.community_id,
                error = %err,
                "impact invalidation dropped"
            );
        }
    }

    pub async fn require_issue(&self, issue_id: &str) -> DomainResult<IssueConsensusState> {
        self.issues
            .get_issue(issue_id)
            .await?
            .ok_or(DomainError::IssueNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::{IssueRegistration, IssueStatus};

    fn issue(correct: u32, incorrect: u32) -> IssueConsensusState {
        let mut state = IssueConsensusState::from_registration(
            &IssueRegistration {
                issue_id: "issue-1".into(),
                community_id: "c1".into(),
                reporter_id: "user-a".into(),
                category: None,
                status: IssueStatus::Reported,
                created_at_ms: Some(0),
                resolved_at_ms: None,
            },
            0,
        );
        state.correct_votes = correct;
        state.incorrect_votes = incorrect;
        state
    }

    #[test]
    fn pending_below_threshold() {
        let mut state = issue(1, 1);
        assert_eq!(
            evaluate_quorum(&mut state, 3, 10),
            QuorumTransition::Pending { votes_needed: 1 }
        );
        assert!(!state.quorum_met);
        assert_eq!(state.consensus_accurate, None);
    }

    #[test]
    fn resolves_once_at_threshold() {
        let mut state = issue(2, 1);
        assert_eq!(
            evaluate_quorum(&mut state, 3, 10),
            QuorumTransition::Resolved {
                consensus_accurate: true
            }
        );
        assert_eq!(state.quorum_met_at_ms, Some(10));

        state.incorrect_votes += 5;
        assert_eq!(
            evaluate_quorum(&mut state, 3, 20),
            QuorumTransition::AlreadyResolved
        );
        assert_eq!(state.consensus_accurate, Some(true));
        assert_eq!(state.quorum_met_at_ms, Some(10));
    }

    #[test]
    fn even_threshold_tie_is_not_accurate() {
        let mut state = issue(2, 2);
        assert_eq!(
            evaluate_quorum(&mut state, 4, 10),
            QuorumTransition::Resolved {
                consensus_accurate: false
            }
        );
    }

    #[test]
    fn majority_incorrect_is_not_accurate() {
        let mut state = issue(1, 2);
        assert_eq!(
            evaluate_quorum(&mut state, 3, 10),
            QuorumTransition::Resolved {
                consensus_accurate: false
            }
        );
    }
}
