use std::sync::Arc;

use civic_domain::jobs::{
    ImpactRecomputePayload, JobDefaults, impact_recompute_job_id, new_job, now_ms,
    quorum_notification_job_id,
};
use civic_domain::ports::BoxFuture;
use civic_domain::ports::events::{EventSinkError, LedgerEventSink, QuorumNotification};
use civic_domain::ports::jobs::{JobEnvelope, JobQueue, JobQueueError, JobType};
use civic_domain::util::uuid_v7_without_dashes;

const NOTIFICATION_DEDUPE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Turns ledger side effects into queued jobs for the worker. A recompute
/// request for a community that already has one queued within the dedupe
/// window is dropped.
#[derive(Clone)]
pub struct JobQueueEventSink {
    queue: Arc<dyn JobQueue>,
    impact_dedupe_ttl_ms: u64,
}

impl JobQueueEventSink {
    pub fn new(queue: Arc<dyn JobQueue>, impact_dedupe_ttl_ms: u64) -> Self {
        Self {
            queue,
            impact_dedupe_ttl_ms,
        }
    }

    fn job(job_id: String, job_type: JobType, payload: serde_json::Value) -> JobEnvelope {
        let request_id = uuid_v7_without_dashes();
        new_job(
            job_id,
            job_type,
            payload,
            request_id.clone(),
            request_id,
            JobDefaults::default(),
        )
    }
}

fn unavailable(err: JobQueueError) -> EventSinkError {
    EventSinkError::Unavailable(err.to_string())
}

impl LedgerEventSink for JobQueueEventSink {
    fn quorum_resolved(
        &self,
        notification: &QuorumNotification,
    ) -> BoxFuture<'_, Result<(), EventSinkError>> {
        let payload = serde_json::to_value(notification)
            .map_err(|err| EventSinkError::Serialization(err.to_string()));
        let job_id = quorum_notification_job_id(&notification.issue_id);
        Box::pin(async move {
            let job = Self::job(job_id, JobType::QuorumNotification, payload?);
            let queued = self
                .queue
                .enqueue_if_absent(&job, NOTIFICATION_DEDUPE_TTL_MS)
                .await
                .map_err(unavailable)?;
            tracing::debug!(job_id = %job.job_id, queued, "quorum notification job");
            Ok(())
        })
    }

    fn impact_invalidated(&self, community_id: &str) -> BoxFuture<'_, Result<(), EventSinkError>> {
        let payload = serde_json::to_value(ImpactRecomputePayload {
            community_id: community_id.to_string(),
            requested_ms: now_ms(),
        })
        .map_err(|err| EventSinkError::Serialization(err.to_string()));
        let job_id = impact_recompute_job_id(community_id);
        Box::pin(async move {
            let job = Self::job(job_id, JobType::ImpactRecompute, payload?);
            let queued = self
                .queue
                .enqueue_if_absent(&job, self.impact_dedupe_ttl_ms)
                .await
                .map_err(unavailable)?;
            tracing::debug!(job_id = %job.job_id, queued, "impact recompute job");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingQueue {
        seen: Mutex<HashSet<String>>,
        queued: Mutex<Vec<JobEnvelope>>,
    }

    impl JobQueue for RecordingQueue {
        fn enqueue(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
            let job = job.clone();
            Box::pin(async move {
                self.queued.lock().await.push(job);
                Ok(())
            })
        }

        fn enqueue_if_absent(
            &self,
            job: &JobEnvelope,
            _dedupe_ttl_ms: u64,
        ) -> BoxFuture<'_, Result<bool, JobQueueError>> {
            let job = job.clone();
            Box::pin(async move {
                if !self.seen.lock().await.insert(job.job_id.clone()) {
                    return Ok(false);
                }
                self.queued.lock().await.push(job);
                Ok(true)
            })
        }

        fn dequeue(
            &self,
            _timeout: Duration,
        ) -> BoxFuture<'_, Result<Option<JobEnvelope>, JobQueueError>> {
            Box::pin(async move { Ok(self.queued.lock().await.pop()) })
        }

        fn ack(&self, _job_id: &str) -> BoxFuture<'_, Result<(), JobQueueError>> {
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
            self.enqueue(job)
        }

        fn requeue_processing(&self, _limit: usize) -> BoxFuture<'_, Result<usize, JobQueueError>> {
            Box::pin(async { Ok(0) })
        }
    }

    #[tokio::test]
    async fn impact_invalidations_collapse_per_community() {
        let queue = Arc::new(RecordingQueue::default());
        let sink = JobQueueEventSink::new(queue.clone(), 30_000);

        sink.impact_invalidated("ka__bengaluru").await.expect("first");
        sink.impact_invalidated("ka__bengaluru").await.expect("second");
        sink.impact_invalidated("mh__pune").await.expect("other");

        let queued = queue.queued.lock().await;
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].job_id, "impact_recompute:ka__bengaluru");
        assert_eq!(queued[0].job_type, JobType::ImpactRecompute);
        let payload: ImpactRecomputePayload =
            serde_json::from_value(queued[0].payload.clone()).expect("payload");
        assert_eq!(payload.community_id, "ka__bengaluru");
    }

    #[tokio::test]
    async fn quorum_notification_carries_outcome() {
        let queue = Arc::new(RecordingQueue::default());
        let sink = JobQueueEventSink::new(queue.clone(), 30_000);
        let notification = QuorumNotification {
            issue_id: "issue-7".into(),
            community_id: "ka__bengaluru".into(),
            reporter_id: "reporter".into(),
            quorum_met: true,
            is_accurate: true,
            rp_awarded: 20,
            resolved_at_ms: 1_700_000_000_000,
        };

        sink.quorum_resolved(&notification).await.expect("queued");

        let queued = queue.queued.lock().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].job_id, "quorum_notification:issue-7");
        let payload: QuorumNotification =
            serde_json::from_value(queued[0].payload.clone()).expect("payload");
        assert_eq!(payload, notification);
    }
}
