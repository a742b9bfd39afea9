use std::time::Duration;

use civic_domain::ports::BoxFuture;
use civic_domain::ports::idempotency::{
    ClaimOutcome, IdempotencyError, IdempotencyKey, IdempotencyRecord, IdempotencyStore,
};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

const DEFAULT_PREFIX: &str = "civic:idemp";

/// Claims the key or returns whatever is already stored, in one round trip.
/// KEYS[1]: cache key. ARGV: payload, ttl ms.
const CLAIM_SCRIPT: &str = r#"
    if redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2], 'NX') then
        return false
    end
    return redis.call('GET', KEYS[1])
"#;

/// Request replay cache for ledger mutations, shared across API replicas.
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    manager: ConnectionManager,
    prefix: String,
}

fn store_err(err: redis::RedisError) -> IdempotencyError {
    IdempotencyError::Store(err.to_string())
}

impl RedisIdempotencyStore {
    pub async fn connect(redis_url: &str) -> Result<Self, IdempotencyError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, IdempotencyError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| IdempotencyError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| IdempotencyError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn ttl_ms(ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).max(1)
    }

    fn encode(record: &IdempotencyRecord) -> Result<String, IdempotencyError> {
        serde_json::to_string(record)
            .map_err(|err| IdempotencyError::Serialization(err.to_string()))
    }

    fn decode(payload: &str) -> Result<IdempotencyRecord, IdempotencyError> {
        serde_json::from_str(payload)
            .map_err(|err| IdempotencyError::Serialization(err.to_string()))
    }
}

impl IdempotencyStore for RedisIdempotencyStore {
    fn get(
        &self,
        key: &IdempotencyKey,
    ) -> BoxFuture<'_, Result<Option<IdempotencyRecord>, IdempotencyError>> {
        let cache_key = key.cache_key(&self.prefix);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let payload: Option<String> = conn.get(cache_key).await.map_err(store_err)?;
            payload.as_deref().map(Self::decode).transpose()
        })
    }

    fn claim(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<ClaimOutcome, IdempotencyError>> {
        let cache_key = key.cache_key(&self.prefix);
        let payload = Self::encode(record);
        Box::pin(async move {
            let payload = payload?;
            let mut conn = self.manager.clone();
            let existing: Option<String> = redis::Script::new(CLAIM_SCRIPT)
                .key(&cache_key)
                .arg(payload)
                .arg(Self::ttl_ms(ttl))
                .invoke_async(&mut conn)
                .await
                .map_err(store_err)?;
            match existing {
                None => Ok(ClaimOutcome::Claimed),
                Some(payload) => Ok(ClaimOutcome::Held(Self::decode(&payload)?)),
            }
        })
    }

    fn replace(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), IdempotencyError>> {
        let cache_key = key.cache_key(&self.prefix);
        let payload = Self::encode(record);
        Box::pin(async move {
            let payload = payload?;
            let mut conn = self.manager.clone();
            let _: () = conn
                .pset_ex(&cache_key, payload, Self::ttl_ms(ttl))
                .await
                .map_err(store_err)?;
            Ok(())
        })
    }

    fn release(&self, key: &IdempotencyKey) -> BoxFuture<'_, Result<(), IdempotencyError>> {
        let cache_key = key.cache_key(&self.prefix);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: () = conn.del(&cache_key).await.map_err(store_err)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use civic_domain::ports::idempotency::IdempotencyResponse;
    use serde_json::json;

    use super::*;

    #[test]
    fn records_round_trip_through_the_cache_encoding() {
        let record = IdempotencyRecord::Completed {
            response: IdempotencyResponse {
                status_code: 201,
                body: json!({ "vote": { "issue_id": "issue-1" } }),
            },
        };
        let encoded = RedisIdempotencyStore::encode(&record).unwrap();
        assert!(encoded.contains("\"state\":\"completed\""));
        assert_eq!(RedisIdempotencyStore::decode(&encoded).unwrap(), record);
    }

    #[test]
    fn ttl_never_rounds_to_zero() {
        assert_eq!(RedisIdempotencyStore::ttl_ms(Duration::from_micros(10)), 1);
    }
}
