//! Redis-backed repositories.
//!
//! Layout (all values are JSON):
//! - `{prefix}:cta` hash, field = CTA id
//! - `{prefix}:behaviour_tag` hash, field = tag name
//! - `{prefix}:sm:{tenant}:{user}` string, the user's snapshot

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use thunder_core::config::RedisConfig;
use thunder_core::snapshot::UserDataSnapshot;
use thunder_core::types::{BehaviourTag, Cta, CtaId, CtaStatus};
use thunder_core::{ThunderError, ThunderResult};
use tracing::{debug, info, warn};

use crate::repository::{BehaviourTagsRepository, CtaRepository, StateMachineRepository};

/// Redis store shared by the definition repositories and the snapshot store.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisStore {
    /// Connect to the first configured Redis node.
    pub async fn new(config: &RedisConfig) -> ThunderResult<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str()).map_err(storage_error)?;
        let conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| ThunderError::Storage(format!("timed out connecting to {url}")))?
        .map_err(storage_error)?;

        let mut ping_conn = conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut ping_conn)
            .await
            .map_err(storage_error)?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            ttl_secs: config.ttl_secs,
        })
    }

    fn cta_key(&self) -> String {
        format!("{}:cta", self.key_prefix)
    }

    fn behaviour_tag_key(&self) -> String {
        format!("{}:behaviour_tag", self.key_prefix)
    }

    fn snapshot_key(&self, tenant_id: &str, user_id: i64) -> String {
        format!("{}:sm:{}:{}", self.key_prefix, tenant_id, user_id)
    }

    /// Loads a whole hash, skipping entries that fail to decode.
    async fn load_hash<T: DeserializeOwned>(&self, key: &str) -> ThunderResult<Vec<T>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(key).await.map_err(storage_error)?;
        let mut out = Vec::with_capacity(raw.len());
        for (field, json) in raw {
            match serde_json::from_str(&json) {
                Ok(value) => out.push(value),
                Err(e) => warn!(key, field = %field, error = %e, "Skipping undecodable record"),
            }
        }
        Ok(out)
    }

    async fn live_ctas(&self) -> ThunderResult<(HashMap<CtaId, Cta>, HashMap<CtaId, Cta>)> {
        let ctas: Vec<Cta> = self.load_hash(&self.cta_key()).await?;
        Ok(split_by_status(ctas))
    }
}

/// Partitions one read of the CTA hash into (active, paused). Other statuses
/// are dropped.
fn split_by_status(ctas: Vec<Cta>) -> (HashMap<CtaId, Cta>, HashMap<CtaId, Cta>) {
    let mut active = HashMap::new();
    let mut paused = HashMap::new();
    for cta in ctas {
        match cta.cta_status {
            CtaStatus::Active => {
                active.insert(cta.id, cta);
            }
            CtaStatus::Paused => {
                paused.insert(cta.id, cta);
            }
            _ => {}
        }
    }
    (active, paused)
}

fn storage_error(e: redis::RedisError) -> ThunderError {
    ThunderError::Storage(e.to_string())
}

#[async_trait]
impl CtaRepository for RedisStore {
    async fn find_all_with_status_active(&self) -> ThunderResult<HashMap<CtaId, Cta>> {
        Ok(self.live_ctas().await?.0)
    }

    async fn find_all_with_status_paused(&self) -> ThunderResult<HashMap<CtaId, Cta>> {
        Ok(self.live_ctas().await?.1)
    }

    async fn find_all_live(&self) -> ThunderResult<(HashMap<CtaId, Cta>, HashMap<CtaId, Cta>)> {
        self.live_ctas().await
    }
}

#[async_trait]
impl BehaviourTagsRepository for RedisStore {
    async fn find_all(&self) -> ThunderResult<HashMap<String, BehaviourTag>> {
        let tags: Vec<BehaviourTag> = self.load_hash(&self.behaviour_tag_key()).await?;
        Ok(tags.into_iter().map(|tag| (tag.name.clone(), tag)).collect())
    }
}

#[async_trait]
impl StateMachineRepository for RedisStore {
    async fn find(&self, tenant_id: &str, user_id: i64) -> ThunderResult<Option<UserDataSnapshot>> {
        let key = self.snapshot_key(tenant_id, user_id);
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(&key).await.map_err(storage_error)?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => {
                debug!(tenant_id, user_id, "No stored snapshot");
                Ok(None)
            }
        }
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        user_id: i64,
        snapshot: &UserDataSnapshot,
    ) -> ThunderResult<()> {
        let key = self.snapshot_key(tenant_id, user_id);
        let json = serde_json::to_string(snapshot)?;
        let mut conn = self.conn.clone();

        if self.ttl_secs > 0 {
            conn.set_ex::<_, _, ()>(&key, &json, self.ttl_secs)
                .await
                .map_err(storage_error)?;
        } else {
            conn.set::<_, _, ()>(&key, &json)
                .await
                .map_err(storage_error)?;
        }
        Ok(())
    }
}
