use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Reported,
    Acknowledged,
    InProgress,
    Resolved,
    Rejected,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Reported => "reported",
            IssueStatus::Acknowledged => "acknowledged",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reported" => Some(IssueStatus::Reported),
            "acknowledged" => Some(IssueStatus::Acknowledged),
            "in_progress" => Some(IssueStatus::InProgress),
            "resolved" => Some(IssueStatus::Resolved),
            "rejected" => Some(IssueStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consensus and award bookkeeping attached to an externally-owned issue.
///
/// `quorum_met` and `consensus_accurate` move one way only. The `rp_awarded_*`
/// flags let a re-entered quorum workflow skip awards that already landed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IssueConsensusState {
    pub issue_id: String,
    pub community_id: String,
    pub reporter_id: String,
    pub category: Option<String>,
    pub status: IssueStatus,
    pub correct_votes: u32,
    pub incorrect_votes: u32,
    pub quorum_met: bool,
    pub quorum_met_at_ms: Option<i64>,
    pub consensus_accurate: Option<bool>,
    pub resolution_verified: bool,
    pub after_photo_verified: bool,
    pub was_reopened: bool,
    pub reopened_count: u32,
    pub flagged_as_fake: bool,
    pub rp_awarded_for_community_confirm: bool,
    pub rp_awarded_for_categorization: bool,
    pub rp_awarded_for_resolution: bool,
    pub rp_awarded_for_after_photo: bool,
    pub created_at_ms: i64,
    pub resolved_at_ms: Option<i64>,
    pub updated_at_ms: i64,
}

impl IssueConsensusState {
    pub fn from_registration(registration: &IssueRegistration, now_ms: i64) -> Self {
        let mut state = Self {
            issue_id: registration.issue_id.clone(),
            community_id: registration.community_id.clone(),
            reporter_id: registration.reporter_id.clone(),
            category: registration.category.clone(),
            status: registration.status,
            correct_votes: 0,
            incorrect_votes: 0,
            quorum_met: false,
            quorum_met_at_ms: None,
            consensus_accurate: None,
            resolution_verified: false,
            after_photo_verified: false,
            was_reopened: false,
            reopened_count: 0,
            flagged_as_fake: false,
            rp_awarded_for_community_confirm: false,
            rp_awarded_for_categorization: false,
            rp_awarded_for_resolution: false,
            rp_awarded_for_after_photo: false,
            created_at_ms: registration.created_at_ms.unwrap_or(now_ms),
            resolved_at_ms: None,
            updated_at_ms: now_ms,
        };
        state.apply_registration(registration, now_ms);
        state
    }

    /// Syncs collaborator-owned fields; counters and one-way flags are untouched.
    pub fn apply_registration(&mut self, registration: &IssueRegistration, now_ms: i64) {
        self.category = registration.category.clone();
        self.status = registration.status;
        if registration.resolved_at_ms.is_some() {
            self.resolved_at_ms = registration.resolved_at_ms;
        }
        if self.status == IssueStatus::Resolved && self.resolved_at_ms.is_none() {
            self.resolved_at_ms = Some(now_ms);
        }
        self.updated_at_ms = now_ms;
    }

    pub fn total_votes(&self) -> u32 {
        self.correct_votes.saturating_add(self.incorrect_votes)
    }

    pub fn is_confirmed_accurate(&self) -> bool {
        self.quorum_met && self.consensus_accurate == Some(true)
    }

    /// Applies a one-way flag. Returns `false` when it was already set.
    pub fn apply_flag(&mut self, flag: IssueFlag, now_ms: i64) -> bool {
        let slot = match flag {
            IssueFlag::CommunityConfirmAwarded => &mut self.rp_awarded_for_community_confirm,
            IssueFlag::CategorizationAwarded => &mut self.rp_awarded_for_categorization,
            IssueFlag::ResolutionVerified => &mut self.resolution_verified,
            IssueFlag::ResolutionAwarded => &mut self.rp_awarded_for_resolution,
            IssueFlag::AfterPhotoVerified => &mut self.after_photo_verified,
            IssueFlag::AfterPhotoAwarded => &mut self.rp_awarded_for_after_photo,
            IssueFlag::FlaggedAsFake => &mut self.flagged_as_fake,
        };
        if *slot {
            return false;
        }
        *slot = true;
        self.updated_at_ms = now_ms;
        true
    }

    /// Sends a resolved issue back to work. No-op for any other status.
    pub fn reopen(&mut self, now_ms: i64) -> bool {
        if self.status != IssueStatus::Resolved {
            return false;
        }
        self.status = IssueStatus::InProgress;
        self.was_reopened = true;
        self.reopened_count = self.reopened_count.saturating_add(1);
        self.resolution_verified = false;
        self.resolved_at_ms = None;
        self.updated_at_ms = now_ms;
        true
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueFlag {
    CommunityConfirmAwarded,
    CategorizationAwarded,
    ResolutionVerified,
    ResolutionAwarded,
    AfterPhotoVerified,
    AfterPhotoAwarded,
    FlaggedAsFake,
}

impl IssueFlag {
    pub fn field_name(&self) -> &'static str {
        match self {
            IssueFlag::CommunityConfirmAwarded => "rp_awarded_for_community_confirm",
            IssueFlag::CategorizationAwarded => "rp_awarded_for_categorization",
            IssueFlag::ResolutionVerified => "resolution_verified",
            IssueFlag::ResolutionAwarded => "rp_awarded_for_resolution",
            IssueFlag::AfterPhotoVerified => "after_photo_verified",
            IssueFlag::AfterPhotoAwarded => "rp_awarded_for_after_photo",
            IssueFlag::FlaggedAsFake => "flagged_as_fake",
        }
    }
}

/// Issue identity pushed in by the reporting subsystem.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IssueRegistration {
    pub issue_id: String,
    pub community_id: String,
    pub reporter_id: String,
    pub category: Option<String>,
    pub status: IssueStatus,
    pub created_at_ms: Option<i64>,
    pub resolved_at_ms: Option<i64>,
}

pub fn validate_registration(registration: &IssueRegistration) -> DomainResult<IssueRegistration> {
    let issue_id = registration.issue_id.trim().to_string();
    let community_id = registration.community_id.trim().to_string();
    let reporter_id = registration.reporter_id.trim().to_string();
    if issue_id.is_empty() {
        return Err(DomainError::Validation("issue_id is required".into()));
    }
    if community_id.is_empty() {
        return Err(DomainError::Validation("community_id is required".into()));
    }
    if reporter_id.is_empty() {
        return Err(DomainError::Validation("reporter_id is required".into()));
    }
    let category = registration
        .category
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    if let (Some(created), Some(resolved)) =
        (registration.created_at_ms, registration.resolved_at_ms)
    {
        if resolved < created {
            return Err(DomainError::Validation(
                "resolved_at cannot precede created_at".into(),
            ));
        }
    }
    Ok(IssueRegistration {
        issue_id,
        community_id,
        reporter_id,
        category,
        status: registration.status,
        created_at_ms: registration.created_at_ms,
        resolved_at_ms: registration.resolved_at_ms,
    })
}

/// Reporter and community are fixed once an issue is known to the ledger.
pub fn ensure_identity_unchanged(
    existing: &IssueConsensusState,
    registration: &IssueRegistration,
) -> DomainResult<()> {
    if existing.community_id != registration.community_id
        || existing.reporter_id != registration.reporter_id
    {
        return Err(DomainError::Conflict);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(status: IssueStatus) -> IssueRegistration {
        IssueRegistration {
            issue_id: "issue-1".into(),
            community_id: "ka__bengaluru".into(),
            reporter_id: "user-a".into(),
            category: Some("pothole".into()),
            status,
            created_at_ms: Some(1_000),
            resolved_at_ms: None,
        }
    }

    #[test]
    fn resolving_stamps_resolved_at() {
        let mut state =
            IssueConsensusState::from_registration(&registration(IssueStatus::Reported), 2_000);
        assert_eq!(state.resolved_at_ms, None);
        state.apply_registration(&registration(IssueStatus::Resolved), 5_000);
        assert_eq!(state.resolved_at_ms, Some(5_000));
        assert_eq!(state.created_at_ms, 1_000);
    }

    #[test]
    fn flags_are_one_way() {
        let mut state =
            IssueConsensusState::from_registration(&registration(IssueStatus::Resolved), 2_000);
        assert!(state.apply_flag(IssueFlag::ResolutionVerified, 3_000));
        assert!(!state.apply_flag(IssueFlag::ResolutionVerified, 4_000));
        assert_eq!(state.updated_at_ms, 3_000);
    }

    #[test]
    fn reopen_only_applies_to_resolved_issues() {
        let mut state =
            IssueConsensusState::from_registration(&registration(IssueStatus::Resolved), 2_000);
        assert!(state.reopen(3_000));
        assert_eq!(state.status, IssueStatus::InProgress);
        assert_eq!(state.reopened_count, 1);
        assert!(state.was_reopened);
        assert!(!state.reopen(4_000));
        assert_eq!(state.reopened_count, 1);
    }

    #[test]
    fn registration_requires_identity() {
        let mut input = registration(IssueStatus::Reported);
        input.reporter_id = "  ".into();
        assert!(matches!(
            validate_registration(&input),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn identity_change_is_a_conflict() {
        let state =
            IssueConsensusState::from_registration(&registration(IssueStatus::Reported), 2_000);
        let mut moved = registration(IssueStatus::Reported);
        moved.community_id = "ka__mysuru".into();
        assert!(matches!(
            ensure_identity_unchanged(&state, &moved),
            Err(DomainError::Conflict)
        ));
    }
}
