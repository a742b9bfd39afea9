use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::cooldown::CooldownState;
use crate::error::DomainError;
use crate::jobs::now_ms;
use crate::ports::reputation::ReputationRepository;
use crate::reputation::{
    ActivityEntry, EVENT_RULES, ReputationAccount, ReputationEvent, ReputationEventType,
    ReputationStats,
};
use crate::roles::{CivicRole, NextRoleThreshold, next_role_threshold};

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 20;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReputationProfile {
    pub user_id: String,
    pub community_id: String,
    pub total_rp: u64,
    pub role: CivicRole,
    pub role_display_name: String,
    pub next_role: NextRoleThreshold,
    pub stats: ReputationStats,
    pub cooldown: CooldownState,
    pub last_activity_at_ms: Option<i64>,
}

impl ReputationProfile {
    /// Presents the account as readers should see it: an expired cooldown
    /// reads as inactive even before the next write clears it.
    pub fn from_account(account: ReputationAccount, now_ms: i64) -> Self {
        let mut cooldown = account.cooldown;
        cooldown.refresh(now_ms);
        Self {
            role_display_name: account.role.display_name().to_string(),
            next_role: next_role_threshold(account.total_rp),
            user_id: account.user_id,
            community_id: account.community_id,
            total_rp: account.total_rp,
            role: account.role,
            stats: account.stats,
            cooldown,
            last_activity_at_ms: account.last_activity_at_ms,
        }
    }

    pub fn empty(user_id: &str, community_id: &str) -> Self {
        Self::from_account(ReputationAccount::new(user_id, community_id, 0), 0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub total_rp: u64,
    pub role: CivicRole,
    pub role_display_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoleTier {
    pub role: CivicRole,
    pub display_name: String,
    pub threshold: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventPoints {
    pub event_type: ReputationEventType,
    pub points: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoleProgression {
    pub roles: Vec<RoleTier>,
    pub points: Vec<EventPoints>,
}

pub fn role_progression() -> RoleProgression {
    RoleProgression {
        roles: CivicRole::ALL
            .iter()
            .map(|role| RoleTier {
                role: *role,
                display_name: role.display_name().to_string(),
                threshold: role.threshold(),
            })
            .collect(),
        points: EVENT_RULES
            .iter()
            .map(|rule| EventPoints {
                event_type: rule.event_type,
                points: rule.points,
            })
            .collect(),
    }
}

/// Orders by RP descending; equal totals fall back to user id for a stable page.
pub fn leaderboard_order(left: &ReputationAccount, right: &ReputationAccount) -> Ordering {
    right
        .total_rp
        .cmp(&left.total_rp)
        .then_with(|| left.user_id.cmp(&right.user_id))
}

pub fn rank_accounts(mut accounts: Vec<ReputationAccount>, limit: usize) -> Vec<LeaderboardEntry> {
    accounts.sort_by(leaderboard_order);
    accounts
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, account)| LeaderboardEntry {
            rank: index + 1,
            role_display_name: account.role.display_name().to_string(),
            user_id: account.user_id,
            total_rp: account.total_rp,
            role: account.role,
        })
        .collect()
}

pub fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}

#[derive(Clone)]
pub struct ReputationQueryService {
    repository: Arc<dyn ReputationRepository>,
}

impl ReputationQueryService {
    pub fn new(repository: Arc<dyn ReputationRepository>) -> Self {
        Self { repository }
    }

    /// Users with no activity in the community get a zeroed profile.
    pub async fn get_account(
        &self,
        user_id: &str,
        community_id: &str,
    ) -> DomainResult<ReputationProfile> {
        let community_id = require("community_id", community_id)?;
        Ok(self
            .repository
            .get_account(user_id, &community_id)
            .await?
            .map(|account| ReputationProfile::from_account(account, now_ms()))
            .unwrap_or_else(|| ReputationProfile::empty(user_id, &community_id)))
    }

    pub async fn get_user_communities(
        &self,
        user_id: &str,
    ) -> DomainResult<Vec<ReputationProfile>> {
        let now = now_ms();
        let mut profiles = self
            .repository
            .list_accounts_for_user(user_id)
            .await?
            .into_iter()
            .map(|account| ReputationProfile::from_account(account, now))
            .collect::<Vec<_>>();
        profiles.sort_by(|left, right| {
            right
                .total_rp
                .cmp(&left.total_rp)
                .then_with(|| left.community_id.cmp(&right.community_id))
        });
        Ok(profiles)
    }

    pub async fn get_community_leaderboard(
        &self,
        community_id: &str,
        limit: Option<usize>,
    ) -> DomainResult<Vec<LeaderboardEntry>> {
        let community_id = require("community_id", community_id)?;
        let limit = clamp_limit(limit, DEFAULT_LEADERBOARD_LIMIT, MAX_LEADERBOARD_LIMIT);
        let accounts = self
            .repository
            .list_top_accounts(&community_id, limit)
            .await?;
        Ok(rank_accounts(accounts, limit))
    }

    pub async fn get_event_history(
        &self,
        user_id: &str,
        community_id: Option<&str>,
        limit: Option<usize>,
    ) -> DomainResult<Vec<ReputationEvent>> {
        let community_id = community_id
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let limit = clamp_limit(limit, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT);
        self.repository
            .list_events(user_id, community_id, limit)
            .await
    }

    pub async fn get_activity(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> DomainResult<Vec<ActivityEntry>> {
        let limit = clamp_limit(limit, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT);
        self.repository.list_activity(user_id, limit).await
    }

    pub fn get_role_progression(&self) -> RoleProgression {
        role_progression()
    }
}

fn require(field: &str, value: &str) -> DomainResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(user_id: &str, total_rp: u64) -> ReputationAccount {
        let mut account = ReputationAccount::new(user_id, "c1", 0);
        account.total_rp = total_rp;
        account.role = crate::roles::classify(total_rp);
        account
    }

    #[test]
    fn leaderboard_orders_by_rp_then_user() {
        let ranked = rank_accounts(
            vec![account("b", 20), account("a", 20), account("c", 130)],
            10,
        );
        let order: Vec<_> = ranked.iter().map(|entry| entry.user_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].role, CivicRole::CommunityValidator);
    }

    #[test]
    fn leaderboard_respects_limit() {
        let accounts = (0..5).map(|i| account(&format!("u{i}"), i)).collect();
        assert_eq!(rank_accounts(accounts, 2).len(), 2);
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None, 20, 100), 20);
        assert_eq!(clamp_limit(Some(0), 20, 100), 1);
        assert_eq!(clamp_limit(Some(500), 20, 100), 100);
    }

    #[test]
    fn progression_lists_every_role_and_rule() {
        let progression = role_progression();
        assert_eq!(progression.roles.len(), 4);
        assert_eq!(progression.roles[1].threshold, 50);
        assert_eq!(progression.points.len(), EVENT_RULES.len());
    }

    #[test]
    fn empty_profile_points_at_civic_helper() {
        let profile = ReputationProfile::empty("u1", "c1");
        assert_eq!(profile.total_rp, 0);
        assert_eq!(profile.role, CivicRole::Resident);
        assert_eq!(profile.next_role.rp_needed, Some(50));
    }
}
