#![warn(clippy::unwrap_used)]

pub mod client;
pub mod memory;
pub mod repository;
pub mod static_data;

pub use client::RedisStore;
pub use memory::MemoryStore;
pub use repository::{BehaviourTagsRepository, CtaRepository, StateMachineRepository};
pub use static_data::{MasterData, StaticDataCache};
