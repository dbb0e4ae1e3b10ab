//! Narrow async interfaces to the stores behind the decision engine.

use std::collections::HashMap;

use async_trait::async_trait;
use thunder_core::snapshot::UserDataSnapshot;
use thunder_core::types::{BehaviourTag, Cta, CtaId};
use thunder_core::ThunderResult;

/// Source of CTA definitions, keyed by CTA id.
#[async_trait]
pub trait CtaRepository: Send + Sync {
    async fn find_all_with_status_active(&self) -> ThunderResult<HashMap<CtaId, Cta>>;

    async fn find_all_with_status_paused(&self) -> ThunderResult<HashMap<CtaId, Cta>>;

    /// Active and paused CTAs in one call. Stores that keep both in one
    /// place override this to read them once.
    async fn find_all_live(&self) -> ThunderResult<(HashMap<CtaId, Cta>, HashMap<CtaId, Cta>)> {
        tokio::try_join!(
            self.find_all_with_status_active(),
            self.find_all_with_status_paused()
        )
    }
}

/// Source of BehaviourTag definitions, keyed by tag name.
#[async_trait]
pub trait BehaviourTagsRepository: Send + Sync {
    async fn find_all(&self) -> ThunderResult<HashMap<String, BehaviourTag>>;
}

/// Per-user snapshot persistence. Writes are last-write-wins.
#[async_trait]
pub trait StateMachineRepository: Send + Sync {
    async fn find(&self, tenant_id: &str, user_id: i64) -> ThunderResult<Option<UserDataSnapshot>>;

    async fn upsert(
        &self,
        tenant_id: &str,
        user_id: i64,
        snapshot: &UserDataSnapshot,
    ) -> ThunderResult<()>;
}
