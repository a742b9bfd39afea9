use std::time::Duration;

use civic_domain::ports::events::QuorumNotification;
use civic_domain::util::format_ms_rfc3339;
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::AppConfig;

const EVENT_HEADER: &str = "X-Civic-Event";
const REQUEST_ID_HEADER: &str = "X-Request-Id";
const OCCURRED_AT_HEADER: &str = "X-Civic-Occurred-At";
const QUORUM_EVENT: &str = "quorum.resolved";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification endpoint rejected payload with status {0}")]
    Rejected(u16),
    #[error("notification endpoint returned status {0}")]
    Upstream(u16),
    #[error("notification transport failed: {0}")]
    Transport(String),
}

impl NotificationError {
    /// Client errors other than throttling will not succeed on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NotificationError::Rejected(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            NotificationError::Rejected(code) | NotificationError::Upstream(code) => Some(*code),
            NotificationError::Transport(_) => None,
        }
    }
}

fn classify(status: StatusCode) -> Result<(), NotificationError> {
    if status.is_success() {
        return Ok(());
    }
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        return Err(NotificationError::Rejected(status.as_u16()));
    }
    Err(NotificationError::Upstream(status.as_u16()))
}

/// Posts quorum outcomes to the reporter notification channel.
#[derive(Debug, Clone)]
pub struct NotificationClient {
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl NotificationClient {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_millis(config.notification_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            webhook_url: config.notification_webhook().map(str::to_string),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Returns `Ok(false)` when no endpoint is configured.
    pub async fn send_quorum_resolved(
        &self,
        notification: &QuorumNotification,
        request_id: &str,
    ) -> Result<bool, NotificationError> {
        let Some(url) = self.webhook_url.as_deref() else {
            tracing::debug!(issue_id = %notification.issue_id, "notification webhook disabled");
            return Ok(false);
        };
        let response = self
            .http
            .post(url)
            .header(EVENT_HEADER, QUORUM_EVENT)
            .header(REQUEST_ID_HEADER, request_id)
            .header(
                OCCURRED_AT_HEADER,
                format_ms_rfc3339(notification.resolved_at_ms),
            )
            .json(notification)
            .send()
            .await
            .map_err(|err| NotificationError::Transport(err.to_string()))?;
        classify(response.status())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_final_except_throttling() {
        let rejected = classify(StatusCode::UNPROCESSABLE_ENTITY).expect_err("rejected");
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.status_code(), Some(422));

        let throttled = classify(StatusCode::TOO_MANY_REQUESTS).expect_err("throttled");
        assert!(throttled.is_retryable());

        let upstream = classify(StatusCode::BAD_GATEWAY).expect_err("upstream");
        assert!(upstream.is_retryable());

        assert!(classify(StatusCode::NO_CONTENT).is_ok());
    }

    #[test]
    fn transport_failures_retry_without_status() {
        let err = NotificationError::Transport("connection reset".into());
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), None);
    }
}
