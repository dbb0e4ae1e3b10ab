//! In-process snapshot of every CTA and BehaviourTag definition.
//! Rebuilt wholesale on refresh and published with a single pointer swap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use thunder_core::types::{BehaviourTag, Cta, CtaId, EpochMillis};
use thunder_core::{ThunderError, ThunderResult};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::repository::{BehaviourTagsRepository, CtaRepository};

/// One consistent generation of definitions. Never mutated once published.
#[derive(Debug, Clone, Default)]
pub struct MasterData {
    pub active_ctas: HashMap<CtaId, Cta>,
    pub paused_ctas: HashMap<CtaId, Cta>,
    pub behaviour_tags: HashMap<String, BehaviourTag>,
    pub loaded_at: Option<EpochMillis>,
}

/// Read-mostly cache of definitions. Readers clone an `Arc` under a read lock
/// held for a pointer copy; fetches happen outside any lock readers touch.
pub struct StaticDataCache {
    cta_repository: Arc<dyn CtaRepository>,
    behaviour_tags_repository: Arc<dyn BehaviourTagsRepository>,
    current: RwLock<Arc<MasterData>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl StaticDataCache {
    /// Creates an empty cache. Nothing is served until the first refresh.
    pub fn new(
        cta_repository: Arc<dyn CtaRepository>,
        behaviour_tags_repository: Arc<dyn BehaviourTagsRepository>,
    ) -> Self {
        Self {
            cta_repository,
            behaviour_tags_repository,
            current: RwLock::new(Arc::new(MasterData::default())),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// First load at startup. Unlike periodic refreshes, a failure here is
    /// fatal to the caller.
    pub async fn initiate(&self) -> ThunderResult<()> {
        info!("initiating cache...");
        self.refresh().await?;
        info!("cache initiated...");
        Ok(())
    }

    /// Fetches CTAs and tags concurrently and swaps them in together.
    /// Any failed fetch leaves the previous generation in place.
    pub async fn refresh(&self) -> ThunderResult<()> {
        let _guard = self.refresh_lock.lock().await;
        debug!("updating cache...");

        let fetched = tokio::try_join!(
            self.cta_repository.find_all_live(),
            self.behaviour_tags_repository.find_all(),
        );

        match fetched {
            Ok(((active_ctas, paused_ctas), behaviour_tags)) => {
                let master = MasterData {
                    active_ctas,
                    paused_ctas,
                    behaviour_tags,
                    loaded_at: Some(Utc::now().timestamp_millis()),
                };
                info!(
                    active = master.active_ctas.len(),
                    paused = master.paused_ctas.len(),
                    behaviour_tags = master.behaviour_tags.len(),
                    "cache updated..."
                );
                *self.current.write() = Arc::new(master);
                metrics::counter!("cache.refresh.success").increment(1);
                Ok(())
            }
            Err(e) => {
                metrics::counter!("cache.refresh.errors").increment(1);
                error!(error = %e, "error while updating cache");
                Err(ThunderError::CacheRefresh(e.to_string()))
            }
        }
    }

    /// Refreshes on a fixed period until the handle is aborted.
    pub fn spawn_refresh_loop(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately; initiate() already loaded.
            interval.tick().await;
            loop {
                interval.tick().await;
                // Failures are logged and counted in refresh(); stale data stays.
                let _ = cache.refresh().await;
            }
        })
    }

    /// Shared read-only view of the current generation.
    pub fn snapshot(&self) -> Arc<MasterData> {
        self.current.read().clone()
    }

    pub fn find_all_active_cta(&self) -> HashMap<CtaId, Cta> {
        self.snapshot().active_ctas.clone()
    }

    pub fn find_all_paused_cta(&self) -> HashMap<CtaId, Cta> {
        self.snapshot().paused_ctas.clone()
    }

    pub fn find_all_behaviour_tags(&self) -> HashMap<String, BehaviourTag> {
        self.snapshot().behaviour_tags.clone()
    }
}
