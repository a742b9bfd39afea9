use serde::Deserialize;

use civic_domain::ledger::LedgerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub worker_queue_prefix: String,
    pub worker_poll_interval_ms: u64,
    pub worker_promote_batch: usize,
    pub worker_backoff_base_ms: u64,
    pub worker_backoff_max_ms: u64,
    pub worker_metrics_port: u16,
    pub impact_dedupe_ttl_ms: u64,
    pub notification_webhook_url: String,
    pub notification_timeout_ms: u64,
    pub quorum_threshold: u32,
    pub spam_cooldown_hours: u32,
    pub impact_compute_interval_hours: u32,
    pub impact_sla_hours: u32,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "civic")?
            .set_default("surreal_db", "ledger")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("jwt_secret", "dev-secret")?
            .set_default("worker_queue_prefix", "civic:jobs")?
            .set_default("worker_poll_interval_ms", 1000)?
            .set_default("worker_promote_batch", 50)?
            .set_default("worker_backoff_base_ms", 1000)?
            .set_default("worker_backoff_max_ms", 60000)?
            .set_default("worker_metrics_port", 9091)?
            .set_default("impact_dedupe_ttl_ms", 30000)?
            .set_default("notification_webhook_url", "")?
            .set_default("notification_timeout_ms", 5000)?
            .set_default("quorum_threshold", 3)?
            .set_default("spam_cooldown_hours", 24)?
            .set_default("impact_compute_interval_hours", 6)?
            .set_default("impact_sla_hours", 72)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        let config: Self = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.quorum_threshold == 0 {
            return Err(config::ConfigError::Message(
                "quorum_threshold must be at least 1".into(),
            ));
        }
        if self.impact_sla_hours == 0 {
            return Err(config::ConfigError::Message(
                "impact_sla_hours must be at least 1".into(),
            ));
        }
        match self.data_backend.as_str() {
            "memory" | "surreal" => Ok(()),
            other => Err(config::ConfigError::Message(format!(
                "unsupported data_backend '{other}'"
            ))),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn uses_surreal(&self) -> bool {
        self.data_backend.eq_ignore_ascii_case("surreal")
    }

    pub fn notification_webhook(&self) -> Option<&str> {
        let url = self.notification_webhook_url.trim();
        (!url.is_empty()).then_some(url)
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            quorum_threshold: self.quorum_threshold,
            spam_cooldown_hours: self.spam_cooldown_hours,
            impact_compute_interval_hours: self.impact_compute_interval_hours,
            impact_sla_hours: self.impact_sla_hours,
            ..LedgerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
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
            worker_promote_batch: 50,
            worker_backoff_base_ms: 1000,
            worker_backoff_max_ms: 60000,
            worker_metrics_port: 9091,
            impact_dedupe_ttl_ms: 30000,
            notification_webhook_url: "  ".into(),
            notification_timeout_ms: 5000,
            quorum_threshold: 5,
            spam_cooldown_hours: 12,
            impact_compute_interval_hours: 6,
            impact_sla_hours: 48,
        }
    }

    #[test]
    fn ledger_config_carries_rule_overrides() {
        let ledger = config().ledger_config();
        assert_eq!(ledger.quorum_threshold, 5);
        assert_eq!(ledger.spam_cooldown_hours, 12);
        assert_eq!(ledger.impact_sla_hours, 48);
        assert_eq!(ledger.award_retry_limit, LedgerConfig::default().award_retry_limit);
    }

    #[test]
    fn blank_webhook_disables_delivery() {
        assert_eq!(config().notification_webhook(), None);
        let mut with_hook = config();
        with_hook.notification_webhook_url = "https://hooks.example/civic".into();
        assert_eq!(
            with_hook.notification_webhook(),
            Some("https://hooks.example/civic")
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut bad = config();
        bad.data_backend = "mongo".into();
        assert!(bad.validate().is_err());
        let mut zero = config();
        zero.quorum_threshold = 0;
        assert!(zero.validate().is_err());
    }
}
