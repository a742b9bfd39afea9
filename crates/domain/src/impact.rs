//! Per-community impact score, cached and recomputed from issue and account
//! aggregates. Writes are full-row replaces, so racing recomputes are harmless.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::DomainResult;
use crate::error::DomainError;
use crate::issues::{IssueConsensusState, IssueStatus};
use crate::jobs::now_ms;
use crate::ledger::LedgerConfig;
use crate::ports::BoxFuture;
use crate::ports::events::{EventSinkError, LedgerEventSink, QuorumNotification};
use crate::ports::impact::ImpactScoreRepository;
use crate::ports::issues::IssueRepository;
use crate::ports::reputation::ReputationRepository;
use crate::reputation::ReputationAccount;
use crate::roles::CivicRole;
use crate::util::round_to;

const MS_PER_HOUR: f64 = 60.0 * 60.0 * 1000.0;
const TREND_THRESHOLD_PERCENT: f64 = 1.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImpactTrend {
    pub direction: TrendDirection,
    pub change_percent: f64,
    pub previous_score: f64,
}

impl Default for ImpactTrend {
    fn default() -> Self {
        Self {
            direction: TrendDirection::Stable,
            change_percent: 0.0,
            previous_score: 0.0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ImpactMetrics {
    pub total_issues_reported: u32,
    pub verified_resolutions: u32,
    pub reopened_issues: u32,
    pub fake_issues: u32,
    pub community_verifications: u32,
    pub avg_resolution_time_hours: f64,
    pub sla_hours: u32,
    pub active_contributors: u32,
    pub total_rp: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleDistribution {
    pub residents: u32,
    pub civic_helpers: u32,
    pub community_validators: u32,
    pub civic_champions: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CommunityImpactScore {
    pub community_id: String,
    pub display_name: String,
    pub impact_score: f64,
    pub metrics: ImpactMetrics,
    pub role_distribution: RoleDistribution,
    pub trend: ImpactTrend,
    pub last_computed_at_ms: i64,
    pub compute_interval_hours: u32,
}

impl CommunityImpactScore {
    pub fn is_stale(&self, now_ms: i64) -> bool {
        let age_ms = now_ms.saturating_sub(self.last_computed_at_ms);
        age_ms as f64 >= f64::from(self.compute_interval_hours) * MS_PER_HOUR
    }
}

/// `ka__bengaluru` reads as `ka, bengaluru`.
pub fn community_display_name(community_id: &str) -> String {
    community_id.replace("__", ", ").replace('-', " ")
}

pub fn score_from_metrics(metrics: &ImpactMetrics) -> f64 {
    let resolution_score = f64::from(metrics.verified_resolutions) * 2.0;
    let reopened_penalty = f64::from(metrics.reopened_issues) * 3.0;
    let delay_penalty = if metrics.sla_hours > 0 {
        metrics.avg_resolution_time_hours / f64::from(metrics.sla_hours)
    } else {
        0.0
    };
    round_to(
        (resolution_score - reopened_penalty - delay_penalty).max(0.0),
        2,
    )
}

/// No trend is computed against a zero baseline.
pub fn trend_between(previous_score: f64, current_score: f64) -> ImpactTrend {
    if previous_score <= 0.0 {
        return ImpactTrend {
            previous_score,
            ..ImpactTrend::default()
        };
    }
    let change = (current_score - previous_score) / previous_score * 100.0;
    let direction = if change > TREND_THRESHOLD_PERCENT {
        TrendDirection::Up
    } else if change < -TREND_THRESHOLD_PERCENT {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    };
    ImpactTrend {
        direction,
        change_percent: round_to(change, 1),
        previous_score,
    }
}

pub fn aggregate_metrics(
    issues: &[IssueConsensusState],
    accounts: &[ReputationAccount],
    sla_hours: u32,
) -> (ImpactMetrics, RoleDistribution) {
    let mut metrics = ImpactMetrics {
        sla_hours,
        ..ImpactMetrics::default()
    };
    let mut resolution_hours = Vec::new();
    for issue in issues {
        metrics.total_issues_reported += 1;
        metrics.community_verifications += issue.total_votes();
        if issue.resolution_verified {
            metrics.verified_resolutions += 1;
        }
        if issue.was_reopened {
            metrics.reopened_issues += 1;
        }
        if issue.flagged_as_fake {
            metrics.fake_issues += 1;
        }
        if issue.status == IssueStatus::Resolved {
            if let Some(resolved_at) = issue.resolved_at_ms {
                let elapsed = resolved_at.saturating_sub(issue.created_at_ms).max(0);
                resolution_hours.push(elapsed as f64 / MS_PER_HOUR);
            }
        }
    }
    if !resolution_hours.is_empty() {
        metrics.avg_resolution_time_hours =
            resolution_hours.iter().sum::<f64>() / resolution_hours.len() as f64;
    }

    let mut distribution = RoleDistribution::default();
    for account in accounts {
        metrics.active_contributors += 1;
        metrics.total_rp = metrics.total_rp.saturating_add(account.total_rp);
        match account.role {
            CivicRole::Resident => distribution.residents += 1,
            CivicRole::CivicHelper => distribution.civic_helpers += 1,
            CivicRole::CommunityValidator => distribution.community_validators += 1,
            CivicRole::CivicChampion => distribution.civic_champions += 1,
        }
    }
    (metrics, distribution)
}

#[derive(Clone)]
pub struct ImpactService {
    scores: Arc<dyn ImpactScoreRepository>,
    issues: Arc<dyn IssueRepository>,
    reputation: Arc<dyn ReputationRepository>,
    config: LedgerConfig,
}

impl ImpactService {
    pub fn new(
        scores: Arc<dyn ImpactScoreRepository>,
        issues: Arc<dyn IssueRepository>,
        reputation: Arc<dyn ReputationRepository>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            scores,
            issues,
            reputation,
            config,
        }
    }

    pub async fn get_or_recompute(&self, community_id: &str) -> DomainResult<CommunityImpactScore> {
        let community_id = validate_community_id(community_id)?;
        match self.scores.get(&community_id).await? {
            Some(score) if !score.is_stale(now_ms()) => Ok(score),
            Some(_) | None => self.recompute(&community_id).await,
        }
    }

    pub async fn recompute(&self, community_id: &str) -> DomainResult<CommunityImpactScore> {
        let community_id = validate_community_id(community_id)?;
        let previous = self.scores.get(&community_id).await?;
        let issues = self.issues.list_issues_by_community(&community_id).await?;
        let accounts = self
            .reputation
            .list_accounts_for_community(&community_id)
            .await?;
        let (metrics, role_distribution) =
            aggregate_metrics(&issues, &accounts, self.config.impact_sla_hours);
        let impact_score = score_from_metrics(&metrics);
        let previous_score = previous.map(|score| score.impact_score).unwrap_or(0.0);
        let score = CommunityImpactScore {
            display_name: community_display_name(&community_id),
            trend: trend_between(previous_score, impact_score),
            community_id,
            impact_score,
            metrics,
            role_distribution,
            last_computed_at_ms: now_ms(),
            compute_interval_hours: self.config.impact_compute_interval_hours,
        };
        self.scores.put(&score).await?;
        debug!(
            community_id = %score.community_id,
            impact_score = score.impact_score,
            "community impact score recomputed"
        );
        Ok(score)
    }
}

fn validate_community_id(community_id: &str) -> DomainResult<String> {
    let community_id = community_id.trim();
    if community_id.is_empty() {
        return Err(DomainError::Validation("community_id is required".into()));
    }
    Ok(community_id.to_string())
}

/// Sink for single-process deployments: recomputes impact in place and logs
/// notifications instead of queueing them.
#[derive(Clone)]
pub struct InlineImpactSink {
    impact: ImpactService,
}

impl InlineImpactSink {
    pub fn new(impact: ImpactService) -> Self {
        Self { impact }
    }
}

impl LedgerEventSink for InlineImpactSink {
    fn quorum_resolved(
        &self,
        notification: &QuorumNotification,
    ) -> BoxFuture<'_, Result<(), EventSinkError>> {
        let notification = notification.clone();
        Box::pin(async move {
            info!(
                issue_id = %notification.issue_id,
                user_id = %notification.reporter_id,
                is_accurate = notification.is_accurate,
                rp_awarded = notification.rp_awarded,
                "quorum notification"
            );
            Ok(())
        })
    }

    fn impact_invalidated(&self, community_id: &str) -> BoxFuture<'_, Result<(), EventSinkError>> {
        let community_id = community_id.to_string();
        Box::pin(async move {
            if let Err(err) = self.impact.recompute(&community_id).await {
                warn!(community_id = %community_id, error = %err, "inline impact recompute failed");
                return Err(EventSinkError::Unavailable(err.to_string()));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_splits_state_and_district() {
        assert_eq!(community_display_name("ka__bengaluru"), "ka, bengaluru");
        assert_eq!(
            community_display_name("mh__navi-mumbai"),
            "mh, navi mumbai"
        );
    }

    #[test]
    fn score_never_drops_below_zero() {
        let metrics = ImpactMetrics {
            verified_resolutions: 1,
            reopened_issues: 4,
            sla_hours: 72,
            ..ImpactMetrics::default()
        };
        assert_eq!(score_from_metrics(&metrics), 0.0);
    }

    #[test]
    fn score_applies_delay_penalty_against_sla() {
        let metrics = ImpactMetrics {
            verified_resolutions: 5,
            reopened_issues: 1,
            avg_resolution_time_hours: 36.0,
            sla_hours: 72,
            ..ImpactMetrics::default()
        };
        assert_eq!(score_from_metrics(&metrics), 6.5);
    }

    #[test]
    fn trend_uses_one_percent_band() {
        assert_eq!(trend_between(10.0, 10.05).direction, TrendDirection::Stable);
        let up = trend_between(10.0, 12.0);
        assert_eq!(up.direction, TrendDirection::Up);
        assert_eq!(up.change_percent, 20.0);
        assert_eq!(trend_between(10.0, 9.0).direction, TrendDirection::Down);
    }

    #[test]
    fn zero_baseline_is_stable() {
        let trend = trend_between(0.0, 8.0);
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.change_percent, 0.0);
    }

    #[test]
    fn staleness_follows_compute_interval() {
        let score = CommunityImpactScore {
            community_id: "c1".into(),
            display_name: "c1".into(),
            impact_score: 0.0,
            metrics: ImpactMetrics::default(),
            role_distribution: RoleDistribution::default(),
            trend: ImpactTrend::default(),
            last_computed_at_ms: 0,
            compute_interval_hours: 6,
        };
        assert!(!score.is_stale(5 * 60 * 60 * 1000));
        assert!(score.is_stale(6 * 60 * 60 * 1000));
    }
}
