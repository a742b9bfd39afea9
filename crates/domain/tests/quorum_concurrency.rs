mod support;

use rand::Rng;
use rand::seq::SliceRandom;

use civic_domain::quorum::QuorumTransition;
use civic_domain::reputation::ReputationEventType;
use civic_domain::verification::{CastVote, VoteOutcome};

use support::{COMMUNITY, harness, member};

const ROUNDS: usize = 40;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_votes_resolve_quorum_exactly_once() {
    for round in 0..ROUNDS {
        let h = harness();
        let issue_id = format!("issue-{round}");
        h.report(&issue_id, "reporter").await;

        let mut ballots = vec![
            ("voter-1", VoteOutcome::Correct, 0usize),
            ("voter-2", VoteOutcome::Correct, 0usize),
            ("voter-3", VoteOutcome::Incorrect, 0usize),
        ];
        {
            let mut rng = rand::thread_rng();
            ballots.shuffle(&mut rng);
            for ballot in &mut ballots {
                ballot.2 = rng.gen_range(0..4);
            }
        }

        let mut handles = Vec::new();
        for (voter, outcome, yields) in ballots {
            let verification = h.ledger.verification.clone();
            let issue_id = issue_id.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..yields {
                    tokio::task::yield_now().await;
                }
                verification
                    .record_vote(
                        &member(voter),
                        CastVote {
                            issue_id,
                            outcome,
                            remark: None,
                            request_ts_ms: None,
                        },
                    )
                    .await
            }));
        }

        let mut resolved = 0;
        for handle in handles {
            let receipt = handle.await.expect("vote task").expect("vote");
            match receipt.quorum {
                QuorumTransition::Resolved { consensus_accurate } => {
                    assert!(consensus_accurate, "round {round}");
                    resolved += 1;
                }
                QuorumTransition::Pending { .. } | QuorumTransition::AlreadyResolved => {}
            }
        }
        assert_eq!(resolved, 1, "round {round}");

        let history = h
            .ledger
            .queries
            .get_event_history("reporter", Some(COMMUNITY), None)
            .await
            .unwrap();
        let confirmed = history
            .iter()
            .filter(|event| event.event_type == ReputationEventType::CommunityConfirmedReport)
            .count();
        assert_eq!(confirmed, 1, "round {round}");
        assert_eq!(h.rp("reporter").await, 20, "round {round}");
        assert_eq!(h.sink.notifications().await.len(), 1, "round {round}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_awards_collapse_to_one() {
    use civic_domain::reputation::{AwardOptions, TriggeredBy};

    let h = harness();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let accountant = h.ledger.accountant.clone();
        handles.push(tokio::spawn(async move {
            accountant
                .award(
                    "user-a",
                    COMMUNITY,
                    ReputationEventType::FalseResolutionFlagged,
                    AwardOptions::new(
                        "false_resolution_flagged_user-a_issue-1",
                        TriggeredBy::Verification,
                    ),
                )
                .await
        }));
    }
    let mut applied = 0;
    for handle in handles {
        if handle.await.expect("award task").expect("award").is_applied() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(h.rp("user-a").await, 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_distinct_awards_all_land() {
    use civic_domain::reputation::{AwardOptions, TriggeredBy};

    let h = harness();
    let mut handles = Vec::new();
    for index in 0..8 {
        let accountant = h.ledger.accountant.clone();
        handles.push(tokio::spawn(async move {
            accountant
                .award(
                    "user-a",
                    COMMUNITY,
                    ReputationEventType::AccurateCategorization,
                    AwardOptions::new(format!("bonus-{index}"), TriggeredBy::System),
                )
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.expect("award task").expect("award").is_applied());
    }
    assert_eq!(h.rp("user-a").await, 40);
}
