//! In-memory store backed by DashMap.
//!
//! Implements every repository interface for development and tests; the
//! Redis store is the production counterpart.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use thunder_core::snapshot::UserDataSnapshot;
use thunder_core::types::{BehaviourTag, Cta, CtaId, CtaStatus};
use thunder_core::ThunderResult;
use tracing::info;

use crate::repository::{BehaviourTagsRepository, CtaRepository, StateMachineRepository};

#[derive(Default)]
pub struct MemoryStore {
    ctas: DashMap<CtaId, Cta>,
    behaviour_tags: DashMap<String, BehaviourTag>,
    snapshots: DashMap<(String, i64), UserDataSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Memory store initialized (development mode)");
        Self::default()
    }

    pub fn put_cta(&self, cta: Cta) {
        self.ctas.insert(cta.id, cta);
    }

    pub fn remove_cta(&self, id: CtaId) -> Option<Cta> {
        self.ctas.remove(&id).map(|(_, cta)| cta)
    }

    pub fn put_behaviour_tag(&self, tag: BehaviourTag) {
        self.behaviour_tags.insert(tag.name.clone(), tag);
    }

    /// Number of persisted user snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    fn ctas_with_status(&self, status: CtaStatus) -> HashMap<CtaId, Cta> {
        self.ctas
            .iter()
            .filter(|r| r.value().cta_status == status)
            .map(|r| (*r.key(), r.value().clone()))
            .collect()
    }
}

#[async_trait]
impl CtaRepository for MemoryStore {
    async fn find_all_with_status_active(&self) -> ThunderResult<HashMap<CtaId, Cta>> {
        Ok(self.ctas_with_status(CtaStatus::Active))
    }

    async fn find_all_with_status_paused(&self) -> ThunderResult<HashMap<CtaId, Cta>> {
        Ok(self.ctas_with_status(CtaStatus::Paused))
    }
}

#[async_trait]
impl BehaviourTagsRepository for MemoryStore {
    async fn find_all(&self) -> ThunderResult<HashMap<String, BehaviourTag>> {
        Ok(self
            .behaviour_tags
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }
}

#[async_trait]
impl StateMachineRepository for MemoryStore {
    async fn find(&self, tenant_id: &str, user_id: i64) -> ThunderResult<Option<UserDataSnapshot>> {
        Ok(self
            .snapshots
            .get(&(tenant_id.to_string(), user_id))
            .map(|r| r.value().clone()))
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        user_id: i64,
        snapshot: &UserDataSnapshot,
    ) -> ThunderResult<()> {
        self.snapshots
            .insert((tenant_id.to_string(), user_id), snapshot.clone());
        Ok(())
    }
}
