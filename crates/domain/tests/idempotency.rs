use std::sync::Arc;
use std::time::Duration;

use civic_domain::idempotency::{
    BeginOutcome, IdempotencyConfig, IdempotencyService, InMemoryIdempotencyStore,
    ledger_request_key,
};
use civic_domain::ports::idempotency::IdempotencyResponse;
use serde_json::json;

fn service(in_progress_ttl: Duration) -> IdempotencyService {
    IdempotencyService::new(
        Arc::new(InMemoryIdempotencyStore::new("civic-test")),
        IdempotencyConfig {
            in_progress_ttl,
            completed_ttl: Duration::from_secs(60),
        },
    )
}

#[tokio::test]
async fn repeated_vote_request_replays_stored_response() {
    let service = service(Duration::from_secs(60));
    let key = ledger_request_key("vote", "issue-1", "user-b", "req-1");
    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::Started);

    let response = IdempotencyResponse {
        status_code: 201,
        body: json!({ "vote": { "issue_id": "issue-1", "outcome": "correct" } }),
    };
    service.complete(&key, response.clone()).await.unwrap();

    assert_eq!(
        service.begin(&key).await.unwrap(),
        BeginOutcome::Replay(response)
    );
}

#[tokio::test]
async fn concurrent_duplicate_request_sees_in_progress() {
    let service = service(Duration::from_secs(60));
    let key = ledger_request_key("spam_penalty", "ka__bengaluru", "official-1", "req-2");
    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::Started);
    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::InProgress);
}

#[tokio::test]
async fn abandoned_request_can_restart_after_ttl() {
    let service = service(Duration::from_millis(10));
    let key = ledger_request_key("resolution", "issue-3", "user-e", "req-3");
    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::Started);

    tokio::time::sleep(Duration::from_millis(25)).await;

    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::Started);
}

#[tokio::test]
async fn same_request_id_from_different_voters_is_independent() {
    let service = service(Duration::from_secs(60));
    let first = ledger_request_key("vote", "issue-4", "user-b", "shared");
    let second = ledger_request_key("vote", "issue-4", "user-c", "shared");
    assert_eq!(service.begin(&first).await.unwrap(), BeginOutcome::Started);
    assert_eq!(service.begin(&second).await.unwrap(), BeginOutcome::Started);
}

#[tokio::test]
async fn failed_request_runs_again_after_abandon() {
    let service = service(Duration::from_secs(60));
    let key = ledger_request_key("vote", "issue-5", "user-b", "req-5");
    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::Started);

    service.abandon(&key).await.unwrap();

    assert_eq!(service.begin(&key).await.unwrap(), BeginOutcome::Started);
}
