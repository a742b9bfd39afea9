use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ports::jobs::{JobEnvelope, JobType};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImpactRecomputePayload {
    pub community_id: String,
    pub requested_ms: i64,
}

#[derive(Clone, Debug)]
pub struct JobDefaults {
    pub max_attempts: u32,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(pow).min(max_ms)
}

/// One recompute job per community at a time; the id doubles as the dedupe key.
pub fn impact_recompute_job_id(community_id: &str) -> String {
    format!("impact_recompute:{community_id}")
}

pub fn quorum_notification_job_id(issue_id: &str) -> String {
    format!("quorum_notification:{issue_id}")
}

pub fn new_job(
    job_id: String,
    job_type: JobType,
    payload: serde_json::Value,
    request_id: String,
    correlation_id: String,
    defaults: JobDefaults,
) -> JobEnvelope {
    let now = now_ms();
    JobEnvelope {
        job_id,
        job_type,
        payload,
        request_id,
        correlation_id,
        attempt: 1,
        max_attempts: defaults.max_attempts,
        run_at_ms: now,
        created_at_ms: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_ms_returns_zero_for_zero_attempt() {
        assert_eq!(backoff_ms(1_000, 0, 60_000), 0);
    }

    #[test]
    fn backoff_ms_doubles_until_cap() {
        assert_eq!(backoff_ms(500, 1, 60_000), 500);
        assert_eq!(backoff_ms(500, 3, 60_000), 2_000);
        assert_eq!(backoff_ms(500, 20, 8_000), 8_000);
    }

    #[test]
    fn job_ids_are_stable_per_subject() {
        assert_eq!(
            impact_recompute_job_id("ka__bengaluru"),
            impact_recompute_job_id("ka__bengaluru")
        );
        assert_eq!(
            quorum_notification_job_id("issue-1"),
            "quorum_notification:issue-1"
        );
    }

    #[test]
    fn new_job_starts_at_first_attempt() {
        let job = new_job(
            impact_recompute_job_id("ka__bengaluru"),
            JobType::ImpactRecompute,
            json!({"community_id": "ka__bengaluru", "requested_ms": 1}),
            "req-1".to_string(),
            "corr-1".to_string(),
            JobDefaults { max_attempts: 3 },
        );
        assert_eq!(job.attempt, 1);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.created_at_ms, job.run_at_ms);
        assert_eq!(job.job_type, JobType::ImpactRecompute);
    }
}
