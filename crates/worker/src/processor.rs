use std::sync::Arc;
use std::time::Instant;

use civic_domain::impact::ImpactService;
use civic_domain::jobs::{ImpactRecomputePayload, backoff_ms, now_ms};
use civic_domain::ports::events::QuorumNotification;
use civic_domain::ports::jobs::{JobEnvelope, JobQueue, JobQueueError, JobType};
use civic_infra::notifications::NotificationClient;
use tracing::{info, warn};

use crate::observability;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl RetryPolicy {
    /// Returns the rescheduled envelope, or `None` once attempts are spent.
    pub fn reschedule(&self, job: &JobEnvelope, now_ms: i64) -> Option<JobEnvelope> {
        if job.attempt >= job.max_attempts {
            return None;
        }
        let delay = backoff_ms(self.base_ms, job.attempt, self.max_ms);
        let mut next = job.clone().with_run_at(now_ms.saturating_add(delay as i64));
        next.attempt = job.next_attempt();
        Some(next)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retry(String),
    Failed(String),
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Retry(_) => "retry",
            JobOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Clone)]
pub struct JobProcessor {
    queue: Arc<dyn JobQueue>,
    impact: ImpactService,
    notifications: NotificationClient,
    retry: RetryPolicy,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        impact: ImpactService,
        notifications: NotificationClient,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            impact,
            notifications,
            retry,
        }
    }

    /// Runs one dequeued job and settles it on the queue: ack on completion
    /// or terminal failure, delayed retry otherwise.
    pub async fn process(&self, job: JobEnvelope) -> Result<JobOutcome, JobQueueError> {
        let started = Instant::now();
        let outcome = self.run(&job).await;
        observability::register_job_processed(
            job_type_label(&job.job_type),
            outcome.label(),
            started.elapsed().as_secs_f64() * 1000.0,
        );

        match &outcome {
            JobOutcome::Completed => {
                self.queue.ack(&job.job_id).await?;
            }
            JobOutcome::Retry(reason) => match self.retry.reschedule(&job, now_ms()) {
                Some(next) => {
                    warn!(
                        job_id = %job.job_id,
                        attempt = job.attempt,
                        next_run_at_ms = next.run_at_ms,
                        reason = %reason,
                        "job failed, retry scheduled"
                    );
                    self.queue.retry_later(&next).await?;
                }
                None => {
                    warn!(
                        job_id = %job.job_id,
                        attempts = job.attempt,
                        reason = %reason,
                        "job exhausted retries"
                    );
                    self.queue.ack(&job.job_id).await?;
                }
            },
            JobOutcome::Failed(reason) => {
                warn!(job_id = %job.job_id, reason = %reason, "job dropped");
                self.queue.ack(&job.job_id).await?;
            }
        }
        Ok(outcome)
    }

    async fn run(&self, job: &JobEnvelope) -> JobOutcome {
        match job.job_type {
            JobType::ImpactRecompute => self.recompute_impact(job).await,
            JobType::QuorumNotification => self.notify_reporter(job).await,
        }
    }

    async fn recompute_impact(&self, job: &JobEnvelope) -> JobOutcome {
        let payload: ImpactRecomputePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => return JobOutcome::Failed(format!("invalid payload: {err}")),
        };
        match self.impact.recompute(&payload.community_id).await {
            Ok(score) => {
                info!(
                    job_id = %job.job_id,
                    community_id = %score.community_id,
                    impact_score = score.impact_score,
                    "community impact recomputed"
                );
                JobOutcome::Completed
            }
            Err(err) => JobOutcome::Retry(err.to_string()),
        }
    }

    async fn notify_reporter(&self, job: &JobEnvelope) -> JobOutcome {
        let notification: QuorumNotification = match serde_json::from_value(job.payload.clone())
        {
            Ok(notification) => notification,
            Err(err) => return JobOutcome::Failed(format!("invalid payload: {err}")),
        };
        let started = Instant::now();
        let result = self
            .notifications
            .send_quorum_resolved(&notification, &job.request_id)
            .await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(true) => {
                observability::register_webhook_delivery("delivered", None, elapsed_ms);
                JobOutcome::Completed
            }
            Ok(false) => JobOutcome::Completed,
            Err(err) => {
                let result = if err.is_retryable() { "retryable" } else { "rejected" };
                observability::register_webhook_delivery(result, err.status_code(), elapsed_ms);
                if err.is_retryable() {
                    JobOutcome::Retry(err.to_string())
                } else {
                    JobOutcome::Failed(err.to_string())
                }
            }
        }
    }
}

fn job_type_label(job_type: &JobType) -> &'static str {
    match job_type {
        JobType::ImpactRecompute => "impact_recompute",
        JobType::QuorumNotification => "quorum_notification",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use civic_domain::jobs::{JobDefaults, impact_recompute_job_id, new_job};
    use civic_domain::ledger::LedgerConfig;
    use civic_domain::memory::{
        InMemoryImpactRepository, InMemoryIssueRepository, InMemoryReputationRepository,
    };
    use civic_domain::ports::BoxFuture;
    use civic_domain::ports::impact::ImpactScoreRepository;
    use civic_infra::config::AppConfig;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingQueue {
        acked: Mutex<Vec<String>>,
        retried: Mutex<Vec<JobEnvelope>>,
    }

    impl JobQueue for RecordingQueue {
        fn enqueue(&self, _job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
            Box::pin(async { Ok(()) })
        }

        fn enqueue_if_absent(
            &self,
            _job: &JobEnvelope,
            _dedupe_ttl_ms: u64,
        ) -> BoxFuture<'_, Result<bool, JobQueueError>> {
            Box::pin(async { Ok(true) })
        }

        fn dequeue(
            &self,
            _timeout: Duration,
        ) -> BoxFuture<'_, Result<Option<JobEnvelope>, JobQueueError>> {
            Box::pin(async { Ok(None) })
        }

        fn ack(&self, job_id: &str) -> BoxFuture<'_, Result<(), JobQueueError>> {
            self.acked.lock().unwrap().push(job_id.to_string());
            Box::pin(async { Ok(()) })
        }

        fn promote_due(
            &self,
            _now_ms: i64,
            _limit: usize,
        ) -> BoxFuture<'_, Result<usize, JobQueueError>> {
            Box::pin(async { Ok(0) })
        }

        fn retry_later(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
            self.retried.lock().unwrap().push(job.clone());
            Box::pin(async { Ok(()) })
        }

        fn requeue_processing(&self, _limit: usize) -> BoxFuture<'_, Result<usize, JobQueueError>> {
            Box::pin(async { Ok(0) })
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            app_env: "test".into(),
            port: 0,
            log_level: "info".into(),
            data_backend: "memory".into(),
            surreal_endpoint: "ws://127.0.0.1:8000".into(),
            surreal_ns: "civic".into(),
            surreal_db: "ledger".into(),
            surreal_user: "root".into(),
            surreal_pass: "root".into(),
            redis_url: "redis://127.0.0.1:6379".into(),
            jwt_secret: "secret".into(),
            worker_queue_prefix: "civic:jobs".into(),
            worker_poll_interval_ms: 1000,
            worker_promote_batch: 10,
            worker_backoff_base_ms: 1000,
            worker_backoff_max_ms: 60000,
            worker_metrics_port: 0,
            impact_dedupe_ttl_ms: 30000,
            notification_webhook_url: String::new(),
            notification_timeout_ms: 5000,
            quorum_threshold: 3,
            spam_cooldown_hours: 24,
            impact_compute_interval_hours: 6,
            impact_sla_hours: 72,
        }
    }

    fn processor(
        queue: Arc<RecordingQueue>,
        scores: Arc<InMemoryImpactRepository>,
    ) -> JobProcessor {
        let impact = ImpactService::new(
            scores,
            Arc::new(InMemoryIssueRepository::new()),
            Arc::new(InMemoryReputationRepository::new()),
            LedgerConfig::default(),
        );
        JobProcessor::new(
            queue,
            impact,
            NotificationClient::from_config(&test_config()),
            RetryPolicy {
                base_ms: 1_000,
                max_ms: 60_000,
            },
        )
    }

    fn job(job_type: JobType, payload: serde_json::Value, max_attempts: u32) -> JobEnvelope {
        new_job(
            impact_recompute_job_id("ka__bengaluru"),
            job_type,
            payload,
            "req-1".into(),
            "corr-1".into(),
            JobDefaults { max_attempts },
        )
    }

    #[test]
    fn reschedule_backs_off_until_attempts_are_spent() {
        let policy = RetryPolicy {
            base_ms: 1_000,
            max_ms: 3_000,
        };
        let first = job(JobType::ImpactRecompute, json!({}), 3);
        let second = policy.reschedule(&first, 10_000).expect("retry");
        assert_eq!(second.attempt, 2);
        assert_eq!(second.run_at_ms, 11_000);

        let third = policy.reschedule(&second, 20_000).expect("retry");
        assert_eq!(third.attempt, 3);
        assert_eq!(third.run_at_ms, 22_000);

        assert!(policy.reschedule(&third, 30_000).is_none());
    }

    #[tokio::test]
    async fn impact_job_recomputes_and_acks() {
        let queue = Arc::new(RecordingQueue::default());
        let scores = Arc::new(InMemoryImpactRepository::new());
        let processor = processor(queue.clone(), scores.clone());

        let payload = json!({ "community_id": "ka__bengaluru", "requested_ms": 1 });
        let outcome = processor
            .process(job(JobType::ImpactRecompute, payload, 5))
            .await
            .expect("process");

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(queue.acked.lock().unwrap().len(), 1);
        let stored = scores.get("ka__bengaluru").await.expect("get");
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_without_retry() {
        let queue = Arc::new(RecordingQueue::default());
        let processor = processor(queue.clone(), Arc::new(InMemoryImpactRepository::new()));

        let outcome = processor
            .process(job(JobType::QuorumNotification, json!({ "issue_id": 7 }), 5))
            .await
            .expect("process");

        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert!(queue.retried.lock().unwrap().is_empty());
        assert_eq!(queue.acked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_community_is_retried_with_backoff() {
        let queue = Arc::new(RecordingQueue::default());
        let processor = processor(queue.clone(), Arc::new(InMemoryImpactRepository::new()));

        let payload = json!({ "community_id": "  ", "requested_ms": 1 });
        let outcome = processor
            .process(job(JobType::ImpactRecompute, payload, 5))
            .await
            .expect("process");

        assert!(matches!(outcome, JobOutcome::Retry(_)));
        let retried = queue.retried.lock().unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].attempt, 2);
    }

    #[tokio::test]
    async fn notification_without_webhook_completes() {
        let queue = Arc::new(RecordingQueue::default());
        let processor = processor(queue.clone(), Arc::new(InMemoryImpactRepository::new()));

        let payload = json!({
            "issue_id": "issue-1",
            "community_id": "ka__bengaluru",
            "reporter_id": "reporter-a",
            "quorum_met": true,
            "is_accurate": true,
            "rp_awarded": 20,
            "resolved_at_ms": 1
        });
        let outcome = processor
            .process(job(JobType::QuorumNotification, payload, 5))
            .await
            .expect("process");

        assert_eq!(outcome, JobOutcome::Completed);
    }
}
