use std::sync::Arc;

use civic_domain::idempotency::{IdempotencyConfig, IdempotencyService, InMemoryIdempotencyStore};
use civic_domain::impact::{ImpactService, InlineImpactSink};
use civic_domain::ledger::{Ledger, LedgerPorts};
use civic_domain::memory::{
    InMemoryImpactRepository, InMemoryIssueRepository, InMemoryReputationRepository,
};
use civic_domain::ports::idempotency::IdempotencyStore;
use civic_infra::config::AppConfig;
use civic_infra::db::{self, DbConfig, SurrealAdapter};
use civic_infra::events::JobQueueEventSink;
use civic_infra::idempotency::RedisIdempotencyStore;
use civic_infra::jobs::RedisJobQueue;
use civic_infra::repositories::{
    SurrealImpactRepository, SurrealIssueRepository, SurrealReputationRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub ledger: Ledger,
    pub idempotency: IdempotencyService,
    pub db: Option<SurrealAdapter>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        if !config.uses_surreal() {
            tracing::warn!("memory data backend selected; ledger state is not persisted");
            let store = InMemoryIdempotencyStore::new("civic:idemp");
            return Ok(Self::in_memory(config, Arc::new(store)));
        }

        let db_config = DbConfig::from_app_config(&config);
        let client = db::connect(&db_config).await?;
        db::ensure_schema(&client).await?;
        let queue = RedisJobQueue::connect_with_prefix(
            &config.redis_url,
            config.worker_queue_prefix.clone(),
        )
        .await?;
        let store = RedisIdempotencyStore::connect(&config.redis_url).await?;

        let ports = LedgerPorts {
            issues: Arc::new(SurrealIssueRepository::with_client(client.clone())),
            reputation: Arc::new(SurrealReputationRepository::with_client(client.clone())),
            impact: Arc::new(SurrealImpactRepository::with_client(client.clone())),
            events: Arc::new(JobQueueEventSink::new(
                Arc::new(queue),
                config.impact_dedupe_ttl_ms,
            )),
        };
        let ledger = Ledger::new(ports, config.ledger_config());
        Ok(Self {
            idempotency: IdempotencyService::new(Arc::new(store), IdempotencyConfig::default()),
            ledger,
            db: Some(SurrealAdapter::new(client)),
            config,
        })
    }

    /// Process-local ledger. Impact invalidations recompute inline since there
    /// is no worker to hand them to.
    pub fn in_memory(config: AppConfig, store: Arc<dyn IdempotencyStore>) -> Self {
        let issues = Arc::new(InMemoryIssueRepository::new());
        let reputation = Arc::new(InMemoryReputationRepository::new());
        let impact = Arc::new(InMemoryImpactRepository::new());
        let ledger_config = config.ledger_config();
        let inline = ImpactService::new(
            impact.clone(),
            issues.clone(),
            reputation.clone(),
            ledger_config.clone(),
        );
        let ports = LedgerPorts {
            issues,
            reputation,
            impact,
            events: Arc::new(InlineImpactSink::new(inline)),
        };
        Self {
            ledger: Ledger::new(ports, ledger_config),
            idempotency: IdempotencyService::new(store, IdempotencyConfig::default()),
            db: None,
            config,
        }
    }
}
