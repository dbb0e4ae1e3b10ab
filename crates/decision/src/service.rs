//! SDK-facing service: loads the user's snapshot, runs the engine against the
//! current cache generation and persists the result when it changed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thunder_cache::{StateMachineRepository, StaticDataCache};
use thunder_core::config::TenantConfig;
use thunder_core::snapshot::{CtaResponse, CtaSnapshotRequest, UserDataSnapshot};
use thunder_core::types::EpochMillis;
use thunder_core::{ThunderError, ThunderResult};
use tracing::{debug, info, warn};

use crate::engine::{DecisionContext, DecisionEngine};
use crate::merge::{archive_stale, merge_delta};

/// Source of a user's cohort memberships.
#[async_trait]
pub trait UserCohortsClient: Send + Sync {
    async fn cohorts(&self, tenant_id: &str, user_id: i64) -> ThunderResult<Vec<String>>;
}

/// Gives every user the same configured cohorts.
#[derive(Debug, Clone, Default)]
pub struct StaticCohortsClient {
    cohorts: Vec<String>,
}

impl StaticCohortsClient {
    pub fn new(cohorts: Vec<String>) -> Self {
        Self { cohorts }
    }
}

#[async_trait]
impl UserCohortsClient for StaticCohortsClient {
    async fn cohorts(&self, _tenant_id: &str, _user_id: i64) -> ThunderResult<Vec<String>> {
        Ok(self.cohorts.clone())
    }
}

pub struct SdkService {
    cache: Arc<StaticDataCache>,
    store: Arc<dyn StateMachineRepository>,
    cohorts: Arc<dyn UserCohortsClient>,
    tenants: TenantConfig,
}

impl SdkService {
    pub fn new(
        cache: Arc<StaticDataCache>,
        store: Arc<dyn StateMachineRepository>,
        cohorts: Arc<dyn UserCohortsClient>,
        tenants: TenantConfig,
    ) -> Self {
        Self {
            cache,
            store,
            cohorts,
            tenants,
        }
    }

    pub fn cache(&self) -> &Arc<StaticDataCache> {
        &self.cache
    }

    fn authorise(&self, tenant_id: &str) -> ThunderResult<()> {
        if self.tenants.is_allowed(tenant_id) {
            Ok(())
        } else {
            warn!(tenant_id, "Rejected request for unauthorised tenant");
            Err(ThunderError::TenantNotAuthorised(tenant_id.to_string()))
        }
    }

    async fn load(&self, tenant_id: &str, user_id: i64) -> ThunderResult<UserDataSnapshot> {
        Ok(self.store.find(tenant_id, user_id).await?.unwrap_or_default())
    }

    async fn persist(&self, tenant_id: &str, user_id: i64, snapshot: &UserDataSnapshot) -> ThunderResult<()> {
        self.store.upsert(tenant_id, user_id, snapshot).await?;
        metrics::counter!("sdk.snapshot.persisted").increment(1);
        debug!(tenant_id, user_id, "Snapshot persisted");
        Ok(())
    }

    /// Decides the user's eligible CTAs on app launch.
    pub async fn app_launch(
        &self,
        tenant_id: &str,
        user_id: i64,
        request: &CtaSnapshotRequest,
    ) -> ThunderResult<CtaResponse> {
        self.app_launch_at(tenant_id, user_id, request, Utc::now().timestamp_millis())
            .await
    }

    /// [`Self::app_launch`] at a fixed instant.
    pub async fn app_launch_at(
        &self,
        tenant_id: &str,
        user_id: i64,
        request: &CtaSnapshotRequest,
        now: EpochMillis,
    ) -> ThunderResult<CtaResponse> {
        self.authorise(tenant_id)?;
        metrics::counter!("sdk.app_launch").increment(1);

        let master = self.cache.snapshot();
        let cohorts = self.cohorts.cohorts(tenant_id, user_id).await?;
        let stored = self.load(tenant_id, user_id).await?;

        let mut snapshot = stored.clone();
        merge_delta(&mut snapshot, request);
        archive_stale(&mut snapshot, &master, tenant_id, now);

        let ctx = DecisionContext {
            tenant_id,
            cohorts: &cohorts,
            now,
        };
        let response = DecisionEngine::new(&master).decide(&ctx, &mut snapshot, request);

        if snapshot != stored {
            self.persist(tenant_id, user_id, &snapshot).await?;
        }

        info!(
            tenant_id,
            user_id,
            eligible = response.ctas.len(),
            "App launch evaluated"
        );
        Ok(response)
    }

    /// Folds a client delta into the stored snapshot without evaluating.
    /// Returns whether anything was written.
    pub async fn merge(
        &self,
        tenant_id: &str,
        user_id: i64,
        request: &CtaSnapshotRequest,
    ) -> ThunderResult<bool> {
        self.merge_at(tenant_id, user_id, request, Utc::now().timestamp_millis())
            .await
    }

    pub async fn merge_at(
        &self,
        tenant_id: &str,
        user_id: i64,
        request: &CtaSnapshotRequest,
        now: EpochMillis,
    ) -> ThunderResult<bool> {
        self.authorise(tenant_id)?;

        let master = self.cache.snapshot();
        let stored = self.load(tenant_id, user_id).await?;

        let mut snapshot = stored.clone();
        merge_delta(&mut snapshot, request);
        archive_stale(&mut snapshot, &master, tenant_id, now);
        // An unknown CTA is inserted by the merge and dropped again by archival.
        if snapshot == stored {
            debug!(tenant_id, user_id, "Delta snapshot changed nothing");
            return Ok(false);
        }

        self.persist(tenant_id, user_id, &snapshot).await?;
        Ok(true)
    }
}
