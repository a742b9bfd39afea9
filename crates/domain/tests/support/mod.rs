#![allow(dead_code)]

use std::sync::Arc;

use civic_domain::auth::Role;
use civic_domain::identity::{ActorIdentity, LedgerActor};
use civic_domain::issues::{IssueRegistration, IssueStatus};
use civic_domain::ledger::{Ledger, LedgerConfig, LedgerPorts};
use civic_domain::memory::{
    InMemoryImpactRepository, InMemoryIssueRepository, InMemoryReputationRepository,
    RecordingEventSink,
};
use civic_domain::verification::{CastVote, VoteOutcome, VoteReceipt};

pub const COMMUNITY: &str = "ka__bengaluru";

pub struct Harness {
    pub ledger: Ledger,
    pub issues: InMemoryIssueRepository,
    pub reputation: InMemoryReputationRepository,
    pub sink: RecordingEventSink,
}

pub fn harness() -> Harness {
    harness_with(LedgerConfig::default())
}

pub fn harness_with(config: LedgerConfig) -> Harness {
    let issues = InMemoryIssueRepository::new();
    let reputation = InMemoryReputationRepository::new();
    let sink = RecordingEventSink::new();
    let ledger = Ledger::new(
        LedgerPorts {
            issues: Arc::new(issues.clone()),
            reputation: Arc::new(reputation.clone()),
            impact: Arc::new(InMemoryImpactRepository::new()),
            events: Arc::new(sink.clone()),
        },
        config,
    );
    Harness {
        ledger,
        issues,
        reputation,
        sink,
    }
}

pub fn member(user_id: &str) -> LedgerActor {
    LedgerActor::new(ActorIdentity::with_user_id(user_id), Role::Community, true)
}

pub fn official() -> LedgerActor {
    LedgerActor::new(ActorIdentity::with_user_id("official-1"), Role::Official, true)
}

pub fn registration(issue_id: &str, reporter_id: &str, status: IssueStatus) -> IssueRegistration {
    IssueRegistration {
        issue_id: issue_id.to_string(),
        community_id: COMMUNITY.to_string(),
        reporter_id: reporter_id.to_string(),
        category: Some("pothole".to_string()),
        status,
        created_at_ms: None,
        resolved_at_ms: None,
    }
}

impl Harness {
    pub async fn report(&self, issue_id: &str, reporter_id: &str) {
        self.ledger
            .verification
            .upsert_issue(
                &official(),
                registration(issue_id, reporter_id, IssueStatus::Reported),
            )
            .await
            .expect("register issue");
    }

    pub async fn set_status(&self, issue_id: &str, reporter_id: &str, status: IssueStatus) {
        self.ledger
            .verification
            .upsert_issue(&official(), registration(issue_id, reporter_id, status))
            .await
            .expect("update issue");
    }

    pub async fn vote(&self, issue_id: &str, voter_id: &str, outcome: VoteOutcome) -> VoteReceipt {
        self.ledger
            .verification
            .record_vote(
                &member(voter_id),
                CastVote {
                    issue_id: issue_id.to_string(),
                    outcome,
                    remark: None,
                    request_ts_ms: None,
                },
            )
            .await
            .expect("record vote")
    }

    pub async fn rp(&self, user_id: &str) -> u64 {
        self.ledger
            .queries
            .get_account(user_id, COMMUNITY)
            .await
            .expect("profile")
            .total_rp
    }
}
