use std::sync::Arc;

use civic_domain::DomainResult;
use civic_domain::impact::CommunityImpactScore;
use civic_domain::ports::BoxFuture;
use civic_domain::ports::impact::ImpactScoreRepository;
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;

use super::{decode_row, map_surreal_error};
use crate::db::{DbConfig, connect};

#[derive(Clone)]
pub struct SurrealImpactRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealImpactRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(connect(db_config).await?))
    }
}

impl ImpactScoreRepository for SurrealImpactRepository {
    fn get(&self, community_id: &str) -> BoxFuture<'_, DomainResult<Option<CommunityImpactScore>>> {
        let community_id = community_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * OMIT id FROM ONLY type::thing('community_impact', $community_id);")
                .bind(("community_id", community_id))
                .await
                .map_err(map_surreal_error)?;
            let row: Option<Value> = response.take(0).map_err(map_surreal_error)?;
            row.map(|row| decode_row(row, "impact score")).transpose()
        })
    }

    fn put(&self, score: &CommunityImpactScore) -> BoxFuture<'_, DomainResult<()>> {
        let score = score.clone();
        let client = self.client.clone();
        Box::pin(async move {
            client
                .query("UPSERT type::thing('community_impact', $community_id) CONTENT $score;")
                .bind(("community_id", score.community_id.clone()))
                .bind(("score", score))
                .await
                .map_err(map_surreal_error)?
                .check()
                .map_err(map_surreal_error)?;
            Ok(())
        })
    }
}
