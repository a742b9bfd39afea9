//! Community-scoped RP ledger: event rules, accounts, and the Accountant that
//! applies awards and penalties exactly once per idempotency key.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::DomainResult;
use crate::cooldown::CooldownState;
use crate::error::DomainError;
use crate::issues::IssueConsensusState;
use crate::jobs::now_ms;
use crate::ledger::LedgerConfig;
use crate::ports::reputation::{AwardCommit, AwardCommitOutcome, ReputationRepository};
use crate::roles::{CivicRole, classify};
use crate::util::{composite_key, ledger_hash, uuid_v7_without_dashes};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReputationEventType {
    IssueVerifiedResolved,
    AfterPhotoUploaded,
    AccurateCategorization,
    FalseResolutionFlagged,
    CommunityConfirmedReport,
    FakeIssuePenalty,
    SpamPenalty,
}

/// Display counter bumped by each event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatCounter {
    IssuesVerified,
    AfterPhotosUploaded,
    AccurateCategorizations,
    FalseResolutionsFlagged,
    CommunityConfirmedReports,
    FakeIssuePenalties,
    SpamPenalties,
}

#[derive(Clone, Copy, Debug)]
pub struct EventRule {
    pub event_type: ReputationEventType,
    pub points: i64,
    pub counter: StatCounter,
}

pub const EVENT_RULES: [EventRule; 7] = [
    EventRule {
        event_type: ReputationEventType::IssueVerifiedResolved,
        points: 10,
        counter: StatCounter::IssuesVerified,
    },
    EventRule {
        event_type: ReputationEventType::AfterPhotoUploaded,
        points: 8,
        counter: StatCounter::AfterPhotosUploaded,
    },
    EventRule {
        event_type: ReputationEventType::AccurateCategorization,
        points: 5,
        counter: StatCounter::AccurateCategorizations,
    },
    EventRule {
        event_type: ReputationEventType::FalseResolutionFlagged,
        points: 12,
        counter: StatCounter::FalseResolutionsFlagged,
    },
    EventRule {
        event_type: ReputationEventType::CommunityConfirmedReport,
        points: 15,
        counter: StatCounter::CommunityConfirmedReports,
    },
    EventRule {
        event_type: ReputationEventType::FakeIssuePenalty,
        points: -20,
        counter: StatCounter::FakeIssuePenalties,
    },
    EventRule {
        event_type: ReputationEventType::SpamPenalty,
        points: -10,
        counter: StatCounter::SpamPenalties,
    },
];

impl ReputationEventType {
    pub const ALL: [ReputationEventType; 7] = [
        ReputationEventType::IssueVerifiedResolved,
        ReputationEventType::AfterPhotoUploaded,
        ReputationEventType::AccurateCategorization,
        ReputationEventType::FalseResolutionFlagged,
        ReputationEventType::CommunityConfirmedReport,
        ReputationEventType::FakeIssuePenalty,
        ReputationEventType::SpamPenalty,
    ];

    /// Rows of `EVENT_RULES` are laid out in declaration order.
    pub fn rule(&self) -> EventRule {
        let index = match self {
            ReputationEventType::IssueVerifiedResolved => 0,
            ReputationEventType::AfterPhotoUploaded => 1,
            ReputationEventType::AccurateCategorization => 2,
            ReputationEventType::FalseResolutionFlagged => 3,
            ReputationEventType::CommunityConfirmedReport => 4,
            ReputationEventType::FakeIssuePenalty => 5,
            ReputationEventType::SpamPenalty => 6,
        };
        EVENT_RULES[index]
    }

    pub fn points(&self) -> i64 {
        self.rule().points
    }

    pub fn is_penalty(&self) -> bool {
        self.points() < 0
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReputationEventType::IssueVerifiedResolved => "issue_verified_resolved",
            ReputationEventType::AfterPhotoUploaded => "after_photo_uploaded",
            ReputationEventType::AccurateCategorization => "accurate_categorization",
            ReputationEventType::FalseResolutionFlagged => "false_resolution_flagged",
            ReputationEventType::CommunityConfirmedReport => "community_confirmed_report",
            ReputationEventType::FakeIssuePenalty => "fake_issue_penalty",
            ReputationEventType::SpamPenalty => "spam_penalty",
        }
    }
}

impl fmt::Display for ReputationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic key for issue-scoped events so retries collapse to one row.
pub fn issue_event_key(event_type: ReputationEventType, user_id: &str, issue_id: &str) -> String {
    composite_key(event_type.as_str(), &[user_id, issue_id])
}

/// Spam penalties are not issue-scoped, so their key carries the request time.
pub fn spam_penalty_key(user_id: &str, community_id: &str, occurred_at_ms: i64) -> String {
    let occurred_at = occurred_at_ms.to_string();
    composite_key("spam_penalty", &[user_id, community_id, &occurred_at])
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReputationStats {
    pub issues_verified: u32,
    pub after_photos_uploaded: u32,
    pub accurate_categorizations: u32,
    pub false_resolutions_flagged: u32,
    pub community_confirmed_reports: u32,
    pub fake_issue_penalties: u32,
    pub spam_penalties: u32,
}

impl ReputationStats {
    pub fn bump(&mut self, counter: StatCounter) {
        let slot = match counter {
            StatCounter::IssuesVerified => &mut self.issues_verified,
            StatCounter::AfterPhotosUploaded => &mut self.after_photos_uploaded,
            StatCounter::AccurateCategorizations => &mut self.accurate_categorizations,
            StatCounter::FalseResolutionsFlagged => &mut self.false_resolutions_flagged,
            StatCounter::CommunityConfirmedReports => &mut self.community_confirmed_reports,
            StatCounter::FakeIssuePenalties => &mut self.fake_issue_penalties,
            StatCounter::SpamPenalties => &mut self.spam_penalties,
        };
        *slot = slot.saturating_add(1);
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReputationAccount {
    pub user_id: String,
    pub community_id: String,
    pub total_rp: u64,
    pub role: CivicRole,
    pub stats: ReputationStats,
    pub cooldown: CooldownState,
    pub last_activity_at_ms: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    /// Bumped on every committed award; guards concurrent read-modify-write.
    pub version: u64,
}

impl ReputationAccount {
    pub fn new(user_id: &str, community_id: &str, now_ms: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            community_id: community_id.to_string(),
            total_rp: 0,
            role: CivicRole::Resident,
            stats: ReputationStats::default(),
            cooldown: CooldownState::default(),
            last_activity_at_ms: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            version: 0,
        }
    }

    pub fn key(&self) -> String {
        account_key(&self.user_id, &self.community_id)
    }
}

pub fn account_key(user_id: &str, community_id: &str) -> String {
    composite_key("account", &[user_id, community_id])
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    System,
    Verification,
    Official,
    CommunityVote,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReputationEvent {
    pub event_id: String,
    pub user_id: String,
    pub community_id: String,
    pub event_type: ReputationEventType,
    pub points: i64,
    pub related_issue: Option<String>,
    pub related_vote: Option<String>,
    pub quorum_met: bool,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
    pub triggered_by: TriggeredBy,
    pub previous_rp: u64,
    pub new_rp: u64,
    pub event_hash: String,
    pub created_at_ms: i64,
}

#[derive(Serialize)]
struct EventHashInput<'a> {
    event_id: &'a str,
    user_id: &'a str,
    community_id: &'a str,
    event_type: ReputationEventType,
    points: i64,
    related_issue: Option<&'a str>,
    related_vote: Option<&'a str>,
    quorum_met: bool,
    idempotency_key: &'a str,
    metadata: &'a serde_json::Value,
    triggered_by: TriggeredBy,
    previous_rp: u64,
    new_rp: u64,
    created_at_ms: i64,
}

impl ReputationEvent {
    pub fn compute_hash(&self) -> DomainResult<String> {
        ledger_hash(&EventHashInput {
            event_id: &self.event_id,
            user_id: &self.user_id,
            community_id: &self.community_id,
            event_type: self.event_type,
            points: self.points,
            related_issue: self.related_issue.as_deref(),
            related_vote: self.related_vote.as_deref(),
            quorum_met: self.quorum_met,
            idempotency_key: &self.idempotency_key,
            metadata: &self.metadata,
            triggered_by: self.triggered_by,
            previous_rp: self.previous_rp,
            new_rp: self.new_rp,
            created_at_ms: self.created_at_ms,
        })
    }

    pub fn verify_hash(&self) -> bool {
        self.compute_hash()
            .map(|hash| hash == self.event_hash)
            .unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    RpAwarded,
    RpDeducted,
    RoleChanged,
    CooldownApplied,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub activity_id: String,
    pub user_id: String,
    pub community_id: String,
    pub activity_type: ActivityType,
    pub event_type: Option<ReputationEventType>,
    pub points: i64,
    pub previous_rp: u64,
    pub new_rp: u64,
    pub previous_role: CivicRole,
    pub new_role: CivicRole,
    pub related_issue: Option<String>,
    pub description: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CooldownGrant {
    pub duration_hours: u32,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AwardOptions {
    pub idempotency_key: String,
    pub related_issue: Option<String>,
    pub related_vote: Option<String>,
    pub quorum_met: bool,
    pub metadata: serde_json::Value,
    pub triggered_by: TriggeredBy,
    pub occurred_at_ms: Option<i64>,
    /// Applied atomically with the event; only spam penalties set this.
    pub cooldown: Option<CooldownGrant>,
}

impl AwardOptions {
    pub fn new(idempotency_key: impl Into<String>, triggered_by: TriggeredBy) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            related_issue: None,
            related_vote: None,
            quorum_met: false,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            triggered_by,
            occurred_at_ms: None,
            cooldown: None,
        }
    }

    pub fn for_issue(mut self, issue: &IssueConsensusState) -> Self {
        self.related_issue = Some(issue.issue_id.clone());
        self.quorum_met = issue.quorum_met;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, occurred_at_ms: Option<i64>) -> Self {
        self.occurred_at_ms = occurred_at_ms;
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AwardReceipt {
    pub event_id: String,
    pub event_type: ReputationEventType,
    pub points_awarded: i64,
    pub previous_rp: u64,
    pub new_rp: u64,
    pub role: CivicRole,
    pub previous_role: CivicRole,
    pub role_changed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AwardOutcome {
    Applied(AwardReceipt),
    AlreadyAwarded,
    CooldownActive { expires_at_ms: Option<i64> },
}

impl AwardOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, AwardOutcome::Applied(_))
    }

    /// The ledger holds the event, whether this call or an earlier one wrote it.
    pub fn is_settled(&self) -> bool {
        matches!(self, AwardOutcome::Applied(_) | AwardOutcome::AlreadyAwarded)
    }

    pub fn points_awarded(&self) -> i64 {
        match self {
            AwardOutcome::Applied(receipt) => receipt.points_awarded,
            _ => 0,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            AwardOutcome::Applied(_) => "applied",
            AwardOutcome::AlreadyAwarded => "already_awarded",
            AwardOutcome::CooldownActive { .. } => "cooldown",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AwardPlan {
    Commit(Box<AwardCommit>, AwardReceipt),
    Suppressed { expires_at_ms: Option<i64> },
}

/// Computes the next account state for one award without touching storage.
///
/// Positive events are suppressed while a cooldown is live; penalties always
/// apply. The new total is floored at zero.
pub fn plan_award(
    current: Option<ReputationAccount>,
    user_id: &str,
    community_id: &str,
    event_type: ReputationEventType,
    options: &AwardOptions,
    now_ms: i64,
) -> DomainResult<AwardPlan> {
    let expected_version = current.as_ref().map(|account| account.version);
    let mut account =
        current.unwrap_or_else(|| ReputationAccount::new(user_id, community_id, now_ms));
    let rule = event_type.rule();

    let cooldown_live = account.cooldown.refresh(now_ms);
    if rule.points > 0 && cooldown_live {
        return Ok(AwardPlan::Suppressed {
            expires_at_ms: account.cooldown.expires_at_ms,
        });
    }

    let previous_rp = account.total_rp;
    let previous_role = account.role;
    let new_rp = apply_points(previous_rp, rule.points);
    let new_role = classify(new_rp);

    account.total_rp = new_rp;
    account.role = new_role;
    account.stats.bump(rule.counter);
    account.last_activity_at_ms = Some(now_ms);
    account.updated_at_ms = now_ms;
    account.version = expected_version.map_or(1, |version| version + 1);
    if let Some(grant) = &options.cooldown {
        account.cooldown =
            CooldownState::started(now_ms, grant.duration_hours, grant.reason.clone());
    }

    let mut event = ReputationEvent {
        event_id: uuid_v7_without_dashes(),
        user_id: user_id.to_string(),
        community_id: community_id.to_string(),
        event_type,
        points: rule.points,
        related_issue: options.related_issue.clone(),
        related_vote: options.related_vote.clone(),
        quorum_met: options.quorum_met,
        idempotency_key: options.idempotency_key.clone(),
        metadata: options.metadata.clone(),
        triggered_by: options.triggered_by,
        previous_rp,
        new_rp,
        event_hash: String::new(),
        created_at_ms: now_ms,
    };
    event.event_hash = event.compute_hash()?;

    let mut activities = vec![activity(
        &event,
        if rule.points >= 0 {
            ActivityType::RpAwarded
        } else {
            ActivityType::RpDeducted
        },
        previous_role,
        new_role,
        format!("{} ({:+} RP)", event_type.as_str(), rule.points),
    )];
    if previous_role != new_role {
        activities.push(activity(
            &event,
            ActivityType::RoleChanged,
            previous_role,
            new_role,
            format!("role changed from {previous_role} to {new_role}"),
        ));
    }
    if let Some(grant) = &options.cooldown {
        activities.push(activity(
            &event,
            ActivityType::CooldownApplied,
            new_role,
            new_role,
            format!("cooldown for {} hours: {}", grant.duration_hours, grant.reason),
        ));
    }

    let receipt = AwardReceipt {
        event_id: event.event_id.clone(),
        event_type,
        points_awarded: rule.points,
        previous_rp,
        new_rp,
        role: new_role,
        previous_role,
        role_changed: previous_role != new_role,
    };
    Ok(AwardPlan::Commit(
        Box::new(AwardCommit {
            account,
            expected_version,
            event,
            activities,
        }),
        receipt,
    ))
}

fn apply_points(total_rp: u64, points: i64) -> u64 {
    if points >= 0 {
        total_rp.saturating_add(points.unsigned_abs())
    } else {
        total_rp.saturating_sub(points.unsigned_abs())
    }
}

fn activity(
    event: &ReputationEvent,
    activity_type: ActivityType,
    previous_role: CivicRole,
    new_role: CivicRole,
    description: String,
) -> ActivityEntry {
    let (points, previous_rp, new_rp) = match activity_type {
        ActivityType::RpAwarded | ActivityType::RpDeducted => {
            (event.points, event.previous_rp, event.new_rp)
        }
        _ => (0, event.new_rp, event.new_rp),
    };
    ActivityEntry {
        activity_id: uuid_v7_without_dashes(),
        user_id: event.user_id.clone(),
        community_id: event.community_id.clone(),
        activity_type,
        event_type: Some(event.event_type),
        points,
        previous_rp,
        new_rp,
        previous_role,
        new_role,
        related_issue: event.related_issue.clone(),
        description,
        created_at_ms: event.created_at_ms,
    }
}

#[derive(Clone)]
pub struct ReputationAccountant {
    repository: Arc<dyn ReputationRepository>,
    config: LedgerConfig,
}

impl ReputationAccountant {
    pub fn new(repository: Arc<dyn ReputationRepository>, config: LedgerConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub async fn award(
        &self,
        user_id: &str,
        community_id: &str,
        event_type: ReputationEventType,
        options: AwardOptions,
    ) -> DomainResult<AwardOutcome> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".into()));
        }
        if community_id.trim().is_empty() {
            return Err(DomainError::Validation("community_id is required".into()));
        }
        if options.idempotency_key.trim().is_empty() {
            return Err(DomainError::Validation("idempotency_key is required".into()));
        }
        let outcome = self
            .award_with_retry(user_id, community_id, event_type, &options)
            .await?;
        counter!(
            "civic_ledger_awards_total",
            "event_type" => event_type.as_str(),
            "result" => outcome.metric_label()
        )
        .increment(1);
        match &outcome {
            AwardOutcome::Applied(receipt) => info!(
                user_id,
                community_id,
                event_type = event_type.as_str(),
                idempotency_key = %options.idempotency_key,
                points = receipt.points_awarded,
                new_rp = receipt.new_rp,
                role = %receipt.role,
                "reputation award applied"
            ),
            AwardOutcome::AlreadyAwarded => debug!(
                user_id,
                community_id,
                event_type = event_type.as_str(),
                idempotency_key = %options.idempotency_key,
                "reputation award already applied"
            ),
            AwardOutcome::CooldownActive { expires_at_ms } => info!(
                user_id,
                community_id,
                event_type = event_type.as_str(),
                expires_at_ms = ?expires_at_ms,
                "reputation award suppressed by cooldown"
            ),
        }
        Ok(outcome)
    }

    async fn award_with_retry(
        &self,
        user_id: &str,
        community_id: &str,
        event_type: ReputationEventType,
        options: &AwardOptions,
    ) -> DomainResult<AwardOutcome> {
        let now = options.occurred_at_ms.unwrap_or_else(now_ms);
        for attempt in 0..=self.config.award_retry_limit {
            if self
                .repository
                .find_event_by_key(&options.idempotency_key)
                .await?
                .is_some()
            {
                return Ok(AwardOutcome::AlreadyAwarded);
            }
            let current = self.repository.get_account(user_id, community_id).await?;
            let (commit, receipt) =
                match plan_award(current, user_id, community_id, event_type, options, now)? {
                    AwardPlan::Suppressed { expires_at_ms } => {
                        return Ok(AwardOutcome::CooldownActive { expires_at_ms });
                    }
                    AwardPlan::Commit(commit, receipt) => (commit, receipt),
                };
            match self.repository.commit_award(&commit).await? {
                AwardCommitOutcome::Committed => return Ok(AwardOutcome::Applied(receipt)),
                AwardCommitOutcome::DuplicateKey => return Ok(AwardOutcome::AlreadyAwarded),
                AwardCommitOutcome::StaleAccount => {
                    debug!(user_id, community_id, attempt, "account changed mid-award; retrying");
                }
            }
        }
        warn!(
            user_id,
            community_id,
            event_type = event_type.as_str(),
            "award abandoned after repeated account contention"
        );
        Err(DomainError::Conflict)
    }

    /// Reporter bonus once quorum confirms the report.
    pub async fn award_community_confirmed_report(
        &self,
        issue: &IssueConsensusState,
    ) -> DomainResult<AwardOutcome> {
        ensure_confirmed_accurate(issue)?;
        self.award_for_issue(
            &issue.reporter_id,
            issue,
            ReputationEventType::CommunityConfirmedReport,
            TriggeredBy::CommunityVote,
            serde_json::json!({
                "correct_votes": issue.correct_votes,
                "incorrect_votes": issue.incorrect_votes,
            }),
        )
        .await
    }

    pub async fn award_accurate_categorization(
        &self,
        issue: &IssueConsensusState,
    ) -> DomainResult<AwardOutcome> {
        ensure_confirmed_accurate(issue)?;
        self.award_for_issue(
            &issue.reporter_id,
            issue,
            ReputationEventType::AccurateCategorization,
            TriggeredBy::CommunityVote,
            serde_json::json!({ "category": issue.category }),
        )
        .await
    }

    pub async fn award_issue_verified_resolved(
        &self,
        issue: &IssueConsensusState,
        verifier_id: &str,
        occurred_at_ms: Option<i64>,
    ) -> DomainResult<AwardOutcome> {
        if !issue.resolution_verified {
            return Err(DomainError::Validation(
                "issue resolution has not been verified".into(),
            ));
        }
        self.award(
            &issue.reporter_id,
            &issue.community_id,
            ReputationEventType::IssueVerifiedResolved,
            AwardOptions::new(
                issue_event_key(
                    ReputationEventType::IssueVerifiedResolved,
                    &issue.reporter_id,
                    &issue.issue_id,
                ),
                TriggeredBy::Verification,
            )
            .for_issue(issue)
            .with_metadata(serde_json::json!({ "verified_by": verifier_id }))
            .at(occurred_at_ms),
        )
        .await
    }

    pub async fn award_false_resolution_flagged(
        &self,
        verifier_id: &str,
        issue: &IssueConsensusState,
        occurred_at_ms: Option<i64>,
    ) -> DomainResult<AwardOutcome> {
        self.award(
            verifier_id,
            &issue.community_id,
            ReputationEventType::FalseResolutionFlagged,
            AwardOptions::new(
                issue_event_key(
                    ReputationEventType::FalseResolutionFlagged,
                    verifier_id,
                    &issue.issue_id,
                ),
                TriggeredBy::Verification,
            )
            .for_issue(issue)
            .with_metadata(serde_json::json!({ "previous_status": issue.status }))
            .at(occurred_at_ms),
        )
        .await
    }

    pub async fn award_after_photo(
        &self,
        uploader_id: &str,
        issue: &IssueConsensusState,
        verified_by: &str,
        occurred_at_ms: Option<i64>,
    ) -> DomainResult<AwardOutcome> {
        if !issue.after_photo_verified {
            return Err(DomainError::Validation(
                "after photo has not been verified".into(),
            ));
        }
        self.award(
            uploader_id,
            &issue.community_id,
            ReputationEventType::AfterPhotoUploaded,
            AwardOptions::new(
                issue_event_key(
                    ReputationEventType::AfterPhotoUploaded,
                    uploader_id,
                    &issue.issue_id,
                ),
                TriggeredBy::Official,
            )
            .for_issue(issue)
            .with_metadata(serde_json::json!({ "verified_by": verified_by }))
            .at(occurred_at_ms),
        )
        .await
    }

    pub async fn apply_fake_issue_penalty(
        &self,
        issue: &IssueConsensusState,
        applied_by: &str,
        reason: &str,
        occurred_at_ms: Option<i64>,
    ) -> DomainResult<AwardOutcome> {
        self.award(
            &issue.reporter_id,
            &issue.community_id,
            ReputationEventType::FakeIssuePenalty,
            AwardOptions::new(
                issue_event_key(
                    ReputationEventType::FakeIssuePenalty,
                    &issue.reporter_id,
                    &issue.issue_id,
                ),
                TriggeredBy::Official,
            )
            .for_issue(issue)
            .with_metadata(serde_json::json!({ "reason": reason, "applied_by": applied_by }))
            .at(occurred_at_ms),
        )
        .await
    }

    /// Deducts spam points and starts the cooldown in the same commit.
    pub async fn apply_spam_penalty(
        &self,
        user_id: &str,
        community_id: &str,
        applied_by: &str,
        reason: &str,
        occurred_at_ms: Option<i64>,
    ) -> DomainResult<AwardOutcome> {
        let now = occurred_at_ms.unwrap_or_else(now_ms);
        let mut options = AwardOptions::new(
            spam_penalty_key(user_id, community_id, now),
            TriggeredBy::Official,
        )
        .with_metadata(serde_json::json!({ "reason": reason, "applied_by": applied_by }))
        .at(Some(now));
        options.cooldown = Some(CooldownGrant {
            duration_hours: self.config.spam_cooldown_hours,
            reason: reason.to_string(),
        });
        self.award(user_id, community_id, ReputationEventType::SpamPenalty, options)
            .await
    }

    async fn award_for_issue(
        &self,
        user_id: &str,
        issue: &IssueConsensusState,
        event_type: ReputationEventType,
        triggered_by: TriggeredBy,
        metadata: serde_json::Value,
    ) -> DomainResult<AwardOutcome> {
        self.award(
            user_id,
            &issue.community_id,
            event_type,
            AwardOptions::new(
                issue_event_key(event_type, user_id, &issue.issue_id),
                triggered_by,
            )
            .for_issue(issue)
            .with_metadata(metadata),
        )
        .await
    }

    pub async fn has_event(&self, idempotency_key: &str) -> DomainResult<bool> {
        Ok(self
            .repository
            .find_event_by_key(idempotency_key)
            .await?
            .is_some())
    }
}

fn ensure_confirmed_accurate(issue: &IssueConsensusState) -> DomainResult<()> {
    if issue.is_confirmed_accurate() {
        Ok(())
    } else {
        Err(DomainError::QuorumNotYetMet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(key: &str) -> AwardOptions {
        AwardOptions::new(key, TriggeredBy::System)
    }

    fn commit_of(plan: AwardPlan) -> (AwardCommit, AwardReceipt) {
        match plan {
            AwardPlan::Commit(commit, receipt) => (*commit, receipt),
            AwardPlan::Suppressed { .. } => panic!("expected commit"),
        }
    }

    #[test]
    fn event_rules_cover_every_event_type_once() {
        for event_type in ReputationEventType::ALL {
            let matches = EVENT_RULES
                .iter()
                .filter(|rule| rule.event_type == event_type)
                .count();
            assert_eq!(matches, 1, "{event_type}");
            assert_eq!(event_type.rule().event_type, event_type);
        }
        assert_eq!(ReputationEventType::AfterPhotoUploaded.rule().points, 8);
        assert_eq!(ReputationEventType::FalseResolutionFlagged.rule().points, 12);
        assert_eq!(ReputationEventType::CommunityConfirmedReport.points(), 15);
        assert_eq!(ReputationEventType::FakeIssuePenalty.points(), -20);
        assert!(ReputationEventType::SpamPenalty.is_penalty());
    }

    #[test]
    fn first_award_creates_account() {
        let plan = plan_award(
            None,
            "user-a",
            "ka__bengaluru",
            ReputationEventType::CommunityConfirmedReport,
            &options("k1"),
            1_000,
        )
        .unwrap();
        let (commit, receipt) = commit_of(plan);
        assert_eq!(commit.expected_version, None);
        assert_eq!(commit.account.version, 1);
        assert_eq!(commit.account.total_rp, 15);
        assert_eq!(commit.account.stats.community_confirmed_reports, 1);
        assert_eq!(receipt.previous_rp, 0);
        assert_eq!(receipt.new_rp, 15);
        assert!(!receipt.role_changed);
        assert!(commit.event.verify_hash());
    }

    #[test]
    fn penalties_floor_at_zero() {
        let mut account = ReputationAccount::new("user-a", "c1", 0);
        account.total_rp = 5;
        account.version = 3;
        let (commit, receipt) = commit_of(
            plan_award(
                Some(account),
                "user-a",
                "c1",
                ReputationEventType::FakeIssuePenalty,
                &options("k2"),
                1_000,
            )
            .unwrap(),
        );
        assert_eq!(commit.account.total_rp, 0);
        assert_eq!(receipt.points_awarded, -20);
        assert_eq!(commit.expected_version, Some(3));
        assert_eq!(commit.account.version, 4);
        assert_eq!(commit.activities[0].activity_type, ActivityType::RpDeducted);
    }

    #[test]
    fn penalty_demotes_role_and_logs_change() {
        let mut account = ReputationAccount::new("user-a", "c1", 0);
        account.total_rp = 55;
        account.role = CivicRole::CivicHelper;
        let (commit, receipt) = commit_of(
            plan_award(
                Some(account),
                "user-a",
                "c1",
                ReputationEventType::SpamPenalty,
                &options("k3"),
                1_000,
            )
            .unwrap(),
        );
        assert_eq!(commit.account.role, CivicRole::Resident);
        assert!(receipt.role_changed);
        assert!(
            commit
                .activities
                .iter()
                .any(|entry| entry.activity_type == ActivityType::RoleChanged)
        );
    }

    #[test]
    fn live_cooldown_suppresses_positive_awards_only() {
        let mut account = ReputationAccount::new("user-a", "c1", 0);
        account.total_rp = 30;
        account.cooldown = CooldownState::started(0, 24, "spam");

        let plan = plan_award(
            Some(account.clone()),
            "user-a",
            "c1",
            ReputationEventType::IssueVerifiedResolved,
            &options("k4"),
            1_000,
        )
        .unwrap();
        assert!(matches!(plan, AwardPlan::Suppressed { expires_at_ms: Some(_) }));

        let plan = plan_award(
            Some(account),
            "user-a",
            "c1",
            ReputationEventType::FakeIssuePenalty,
            &options("k5"),
            1_000,
        )
        .unwrap();
        assert!(matches!(plan, AwardPlan::Commit(..)));
    }

    #[test]
    fn expired_cooldown_is_cleared_on_award() {
        let mut account = ReputationAccount::new("user-a", "c1", 0);
        account.cooldown = CooldownState::started(0, 1, "spam");
        let (commit, _) = commit_of(
            plan_award(
                Some(account),
                "user-a",
                "c1",
                ReputationEventType::AccurateCategorization,
                &options("k6"),
                2 * 60 * 60 * 1000,
            )
            .unwrap(),
        );
        assert!(!commit.account.cooldown.active);
        assert_eq!(commit.account.total_rp, 5);
    }

    #[test]
    fn cooldown_grant_is_applied_with_penalty() {
        let mut opts = options("k7");
        opts.cooldown = Some(CooldownGrant {
            duration_hours: 24,
            reason: "spam".into(),
        });
        let (commit, _) = commit_of(
            plan_award(None, "user-a", "c1", ReputationEventType::SpamPenalty, &opts, 1_000)
                .unwrap(),
        );
        assert!(commit.account.cooldown.is_active(1_000));
        assert_eq!(commit.account.stats.spam_penalties, 1);
        assert!(
            commit
                .activities
                .iter()
                .any(|entry| entry.activity_type == ActivityType::CooldownApplied)
        );
    }

    #[test]
    fn issue_keys_are_deterministic() {
        assert_eq!(
            issue_event_key(ReputationEventType::CommunityConfirmedReport, "user-a", "issue-1"),
            "community_confirmed_report:6:user-a:7:issue-1"
        );
    }

    #[test]
    fn issue_keys_separate_ids_containing_underscores() {
        let first = issue_event_key(ReputationEventType::FalseResolutionFlagged, "e_1", "x");
        let second = issue_event_key(ReputationEventType::FalseResolutionFlagged, "e", "1_x");
        assert_ne!(first, second);
        assert_ne!(account_key("a:b", "c"), account_key("a", "b:c"));
    }
}
