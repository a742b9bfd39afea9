use std::time::Duration;

use civic_domain::jobs::now_ms;
use civic_domain::ports::BoxFuture;
use civic_domain::ports::jobs::{JobEnvelope, JobQueue, JobQueueError};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

const DEFAULT_PREFIX: &str = "civic:jobs";

/// KEYS: payloads, ready, delayed. ARGV: job id, payload, run_at, now.
const ENQUEUE_SCRIPT: &str = r#"
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    if tonumber(ARGV[3]) <= tonumber(ARGV[4]) then
        redis.call('RPUSH', KEYS[2], ARGV[1])
    else
        redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
    end
    return 1
"#;

/// Same as `ENQUEUE_SCRIPT` guarded by a marker key. KEYS[4]: marker, ARGV[5]: ttl.
const ENQUEUE_IF_ABSENT_SCRIPT: &str = r#"
    if redis.call('SET', KEYS[4], 1, 'PX', ARGV[5], 'NX') == false then
        return 0
    end
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    if tonumber(ARGV[3]) <= tonumber(ARGV[4]) then
        redis.call('RPUSH', KEYS[2], ARGV[1])
    else
        redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
    end
    return 1
"#;

/// KEYS: delayed, ready. ARGV: now, limit.
const PROMOTE_SCRIPT: &str = r#"
    local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
    for _, job_id in ipairs(due) do
        redis.call('ZREM', KEYS[1], job_id)
        redis.call('RPUSH', KEYS[2], job_id)
    end
    return #due
"#;

/// KEYS: payloads, processing, ready, delayed. ARGV: job id, payload, run_at, now.
const RETRY_SCRIPT: &str = r#"
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    redis.call('LREM', KEYS[2], 1, ARGV[1])
    if tonumber(ARGV[3]) <= tonumber(ARGV[4]) then
        redis.call('LPUSH', KEYS[3], ARGV[1])
    else
        redis.call('ZADD', KEYS[4], ARGV[3], ARGV[1])
    end
    return 1
"#;

/// Ready list, delayed sorted set and an in-flight list, with payloads kept
/// in a hash keyed by job id.
#[derive(Clone)]
pub struct RedisJobQueue {
    manager: ConnectionManager,
    ready_key: String,
    delayed_key: String,
    processing_key: String,
    payload_key: String,
    dedupe_prefix: String,
}

#[derive(Debug, Clone)]
pub struct JobQueueMetricsSnapshot {
    pub ready: u64,
    pub delayed: u64,
    pub processing: u64,
}

fn op_err(err: redis::RedisError) -> JobQueueError {
    JobQueueError::Operation(err.to_string())
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str) -> Result<Self, JobQueueError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, JobQueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| JobQueueError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| JobQueueError::Unavailable(err.to_string()))?;
        let prefix = prefix.into();
        Ok(Self {
            manager,
            ready_key: format!("{prefix}:ready"),
            delayed_key: format!("{prefix}:delayed"),
            processing_key: format!("{prefix}:processing"),
            payload_key: format!("{prefix}:payloads"),
            dedupe_prefix: format!("{prefix}:dedupe"),
        })
    }

    fn serialize(job: &JobEnvelope) -> Result<String, JobQueueError> {
        serde_json::to_string(job).map_err(|err| JobQueueError::Serialization(err.to_string()))
    }

    fn deserialize(payload: &str) -> Result<JobEnvelope, JobQueueError> {
        serde_json::from_str(payload).map_err(|err| JobQueueError::Serialization(err.to_string()))
    }

    fn dedupe_key(&self, job_id: &str) -> String {
        format!("{}:{job_id}", self.dedupe_prefix)
    }

    pub async fn metrics_snapshot(&self) -> Result<JobQueueMetricsSnapshot, JobQueueError> {
        let mut conn = self.manager.clone();
        let ready: u64 = conn.llen(&self.ready_key).await.map_err(op_err)?;
        let delayed: u64 = conn.zcard(&self.delayed_key).await.map_err(op_err)?;
        let processing: u64 = conn.llen(&self.processing_key).await.map_err(op_err)?;
        Ok(JobQueueMetricsSnapshot {
            ready,
            delayed,
            processing,
        })
    }
}

impl JobQueue for RedisJobQueue {
    fn enqueue(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let payload = Self::serialize(job);
        let job_id = job.job_id.clone();
        let run_at_ms = job.run_at_ms;
        Box::pin(async move {
            let payload = payload?;
            let mut conn = self.manager.clone();
            let _: i64 = redis::Script::new(ENQUEUE_SCRIPT)
                .key(&self.payload_key)
                .key(&self.ready_key)
                .key(&self.delayed_key)
                .arg(&job_id)
                .arg(payload)
                .arg(run_at_ms)
                .arg(now_ms())
                .invoke_async(&mut conn)
                .await
                .map_err(op_err)?;
            Ok(())
        })
    }

    fn enqueue_if_absent(
        &self,
        job: &JobEnvelope,
        dedupe_ttl_ms: u64,
    ) -> BoxFuture<'_, Result<bool, JobQueueError>> {
        let payload = Self::serialize(job);
        let job_id = job.job_id.clone();
        let run_at_ms = job.run_at_ms;
        let marker = self.dedupe_key(&job.job_id);
        Box::pin(async move {
            let payload = payload?;
            let mut conn = self.manager.clone();
            let inserted: i64 = redis::Script::new(ENQUEUE_IF_ABSENT_SCRIPT)
                .key(&self.payload_key)
                .key(&self.ready_key)
                .key(&self.delayed_key)
                .key(&marker)
                .arg(&job_id)
                .arg(payload)
                .arg(run_at_ms)
                .arg(now_ms())
                .arg(dedupe_ttl_ms.max(1))
                .invoke_async(&mut conn)
                .await
                .map_err(op_err)?;
            Ok(inserted == 1)
        })
    }

    fn dequeue(
        &self,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Option<JobEnvelope>, JobQueueError>> {
        let timeout_secs = timeout.as_secs().max(1);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let job_id: Option<String> = redis::cmd("BRPOPLPUSH")
                .arg(&self.ready_key)
                .arg(&self.processing_key)
                .arg(timeout_secs)
                .query_async(&mut conn)
                .await
                .map_err(op_err)?;
            let Some(job_id) = job_id else {
                return Ok(None);
            };
            let payload: Option<String> = conn
                .hget(&self.payload_key, &job_id)
                .await
                .map_err(op_err)?;
            match payload {
                Some(payload) => Ok(Some(Self::deserialize(&payload)?)),
                None => {
                    let _: i64 = conn
                        .lrem(&self.processing_key, 1, &job_id)
                        .await
                        .map_err(op_err)?;
                    Err(JobQueueError::Operation(format!(
                        "missing payload for job_id {job_id}"
                    )))
                }
            }
        })
    }

    fn ack(&self, job_id: &str) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job_id = job_id.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: () = redis::pipe()
                .atomic()
                .lrem(&self.processing_key, 1, &job_id)
                .ignore()
                .hdel(&self.payload_key, &job_id)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(op_err)?;
            Ok(())
        })
    }

    fn promote_due(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(0);
            }
            let mut conn = self.manager.clone();
            let moved: i64 = redis::Script::new(PROMOTE_SCRIPT)
                .key(&self.delayed_key)
                .key(&self.ready_key)
                .arg(now_ms)
                .arg(limit as i64)
                .invoke_async(&mut conn)
                .await
                .map_err(op_err)?;
            Ok(moved.max(0) as usize)
        })
    }

    fn retry_later(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let payload = Self::serialize(job);
        let job_id = job.job_id.clone();
        let run_at_ms = job.run_at_ms;
        Box::pin(async move {
            let payload = payload?;
            let mut conn = self.manager.clone();
            let _: i64 = redis::Script::new(RETRY_SCRIPT)
                .key(&self.payload_key)
                .key(&self.processing_key)
                .key(&self.ready_key)
                .key(&self.delayed_key)
                .arg(&job_id)
                .arg(payload)
                .arg(run_at_ms)
                .arg(now_ms())
                .invoke_async(&mut conn)
                .await
                .map_err(op_err)?;
            Ok(())
        })
    }

    fn requeue_processing(&self, limit: usize) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(0);
            }
            let mut conn = self.manager.clone();
            let mut moved = 0usize;
            while moved < limit {
                let job_id: Option<String> = redis::cmd("RPOPLPUSH")
                    .arg(&self.processing_key)
                    .arg(&self.ready_key)
                    .query_async(&mut conn)
                    .await
                    .map_err(op_err)?;
                if job_id.is_none() {
                    break;
                }
                moved += 1;
            }
            if moved > 0 {
                tracing::warn!(moved, "requeued in-flight jobs left by a previous worker");
            }
            Ok(moved)
        })
    }
}
