use std::sync::Arc;
use std::time::Duration;

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tokio::time::timeout;

use crate::config::AppConfig;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Tables and lookup indexes used by the ledger repositories. Record ids carry
/// the natural keys (vote key, idempotency key, account key), so uniqueness is
/// enforced by `CREATE` on the id itself.
const SCHEMA: &str = "\
    DEFINE TABLE IF NOT EXISTS civic_issue SCHEMALESS;\n\
    DEFINE INDEX IF NOT EXISTS civic_issue_community ON civic_issue FIELDS community_id;\n\
    DEFINE TABLE IF NOT EXISTS issue_vote SCHEMALESS;\n\
    DEFINE INDEX IF NOT EXISTS issue_vote_issue ON issue_vote FIELDS issue_id;\n\
    DEFINE TABLE IF NOT EXISTS reputation_account SCHEMALESS;\n\
    DEFINE INDEX IF NOT EXISTS reputation_account_user ON reputation_account FIELDS user_id;\n\
    DEFINE INDEX IF NOT EXISTS reputation_account_community ON reputation_account\n\
        FIELDS community_id;\n\
    DEFINE TABLE IF NOT EXISTS reputation_event SCHEMALESS;\n\
    DEFINE INDEX IF NOT EXISTS reputation_event_key ON reputation_event\n\
        FIELDS idempotency_key UNIQUE;\n\
    DEFINE INDEX IF NOT EXISTS reputation_event_user ON reputation_event\n\
        FIELDS user_id, created_at_ms;\n\
    DEFINE TABLE IF NOT EXISTS reputation_activity SCHEMALESS;\n\
    DEFINE INDEX IF NOT EXISTS reputation_activity_user ON reputation_activity\n\
        FIELDS user_id, created_at_ms;\n\
    DEFINE TABLE IF NOT EXISTS community_impact SCHEMALESS;\n";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }

    /// The websocket engine wants `host:port`; configs usually carry a URL.
    pub fn address(&self) -> &str {
        self.endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.endpoint)
            .trim_end_matches('/')
    }
}

pub async fn connect(config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(config.address()).await?;
    db.signin(Root {
        username: &config.username,
        password: &config.password,
    })
    .await?;
    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await?;
    tracing::info!(
        endpoint = %config.endpoint,
        namespace = %config.namespace,
        database = %config.database,
        "connected to surrealdb"
    );
    Ok(Arc::new(db))
}

pub async fn ensure_schema(client: &Surreal<Client>) -> anyhow::Result<()> {
    client.query(SCHEMA).await?.check()?;
    tracing::debug!("ledger schema ensured");
    Ok(())
}

#[derive(Clone)]
pub struct SurrealAdapter {
    client: Arc<Surreal<Client>>,
}

impl SurrealAdapter {
    pub fn new(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        timeout(HEALTH_TIMEOUT, self.client.health())
            .await
            .map_err(|_| anyhow::anyhow!("surreal health check timed out"))?
            .map_err(|err| anyhow::anyhow!("surreal health check failed: {err}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> DbConfig {
        DbConfig {
            endpoint: endpoint.to_string(),
            namespace: "civic".into(),
            database: "ledger".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }

    #[test]
    fn address_strips_scheme_and_trailing_slash() {
        assert_eq!(config("ws://127.0.0.1:8000").address(), "127.0.0.1:8000");
        assert_eq!(config("wss://db.civic.example/").address(), "db.civic.example");
        assert_eq!(config("localhost:8000").address(), "localhost:8000");
    }
}
