mod observability;
mod processor;

use std::sync::Arc;
use std::time::Duration;

use civic_domain::impact::ImpactService;
use civic_domain::jobs::now_ms;
use civic_domain::ports::jobs::JobQueue;
use civic_infra::config::AppConfig;
use civic_infra::db::{self, DbConfig};
use civic_infra::jobs::RedisJobQueue;
use civic_infra::logging::init_tracing;
use civic_infra::notifications::NotificationClient;
use civic_infra::repositories::{
    SurrealImpactRepository, SurrealIssueRepository, SurrealReputationRepository,
};
use tracing::{error, info, warn};

use crate::processor::{JobProcessor, RetryPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config, "civic-worker")?;
    observability::init_metrics(config.worker_metrics_port)?;

    if !config.uses_surreal() {
        anyhow::bail!(
            "the worker requires data_backend=surreal; the memory backend recomputes inline"
        );
    }

    let client = db::connect(&DbConfig::from_app_config(&config)).await?;
    db::ensure_schema(&client).await?;
    let ledger_config = config.ledger_config();
    let impact = ImpactService::new(
        Arc::new(SurrealImpactRepository::with_client(client.clone())),
        Arc::new(SurrealIssueRepository::with_client(client.clone())),
        Arc::new(SurrealReputationRepository::with_client(client)),
        ledger_config,
    );

    let queue = Arc::new(
        RedisJobQueue::connect_with_prefix(&config.redis_url, config.worker_queue_prefix.clone())
            .await?,
    );
    let notifications = NotificationClient::from_config(&config);
    if !notifications.is_enabled() {
        warn!(
            "notification webhook not configured; quorum notifications will be acknowledged only"
        );
    }
    let processor = JobProcessor::new(
        queue.clone(),
        impact,
        notifications,
        RetryPolicy {
            base_ms: config.worker_backoff_base_ms,
            max_ms: config.worker_backoff_max_ms,
        },
    );

    let recovered = queue.requeue_processing(config.worker_promote_batch).await?;
    info!(
        recovered,
        queue_prefix = %config.worker_queue_prefix,
        "worker started"
    );

    run(&config, queue, &processor).await;
    info!("worker shutdown");
    Ok(())
}

async fn run(config: &AppConfig, queue: Arc<RedisJobQueue>, processor: &JobProcessor) {
    let poll = Duration::from_millis(config.worker_poll_interval_ms.max(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        if let Err(err) = queue.promote_due(now_ms(), config.worker_promote_batch).await {
            warn!(error = %err, "failed to promote delayed jobs");
        }
        match queue.metrics_snapshot().await {
            Ok(snapshot) => observability::set_queue_depth_gauge(
                snapshot.ready,
                snapshot.delayed,
                snapshot.processing,
            ),
            Err(err) => warn!(error = %err, "failed to read queue depth"),
        }

        let next = tokio::select! {
            _ = &mut shutdown => break,
            next = queue.dequeue(poll) => next,
        };

        match next {
            Ok(Some(job)) => {
                observability::set_queue_lag_ms(now_ms() - job.run_at_ms);
                let job_id = job.job_id.clone();
                if let Err(err) = processor.process(job).await {
                    error!(job_id = %job_id, error = %err, "failed to settle job");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "dequeue failed");
                tokio::time::sleep(poll).await;
            }
        }
    }
}
