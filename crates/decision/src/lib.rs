//! CTA decision engine: exposure capping, relation rules and the per-CTA
//! state machines, composed per request by [`engine::DecisionEngine`] and
//! wrapped with storage by [`service::SdkService`].

#![warn(clippy::unwrap_used)]

pub mod engine;
pub mod evaluator;
pub mod exposure;
pub mod merge;
pub mod relation;
pub mod service;
pub mod state_machine;

pub use engine::{DecisionContext, DecisionEngine};
pub use exposure::{ExposureCap, ExposureVerdict};
pub use service::{SdkService, StaticCohortsClient, UserCohortsClient};
pub use state_machine::Advance;
