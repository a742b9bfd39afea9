use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const HTTP_REQUESTS_TOTAL: &str = "civic_api_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "civic_api_http_request_duration_seconds";
const IDEMPOTENT_REPLAYS_TOTAL: &str = "civic_api_idempotent_replays_total";
const IDEMPOTENT_RELEASES_TOTAL: &str = "civic_api_idempotent_releases_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// 4xx responses are ledger rejections; only 5xx count as faults.
pub fn register_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status_class" => status_class(status),
        "outcome" => outcome(status)
    )
    .increment(1);
    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "route" => route.to_string(),
        "outcome" => outcome(status)
    )
    .record(elapsed.as_secs_f64());
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

fn outcome(status: StatusCode) -> &'static str {
    if status.is_server_error() {
        "fault"
    } else if status.is_client_error() {
        "rejected"
    } else {
        "ok"
    }
}

pub fn register_idempotent_replay(operation: &'static str) {
    counter!(IDEMPOTENT_REPLAYS_TOTAL, "operation" => operation).increment(1);
}

/// A mutation failed and its request id was handed back for retry.
pub fn register_idempotent_release(operation: &'static str) {
    counter!(IDEMPOTENT_RELEASES_TOTAL, "operation" => operation).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_rejections_not_faults() {
        assert_eq!(outcome(StatusCode::CONFLICT), "rejected");
        assert_eq!(status_class(StatusCode::CONFLICT), "4xx");
        assert_eq!(outcome(StatusCode::INTERNAL_SERVER_ERROR), "fault");
        assert_eq!(outcome(StatusCode::CREATED), "ok");
    }
}
