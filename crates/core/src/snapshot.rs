//! Per-user state that the client round-trips and the store persists, plus
//! the request/response envelopes of the SDK API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    CtaId, CtaRelationRule, EpochMillis, LifespanFrequency, Rule, SessionFrequency,
    WindowFrequency,
};

/// Closed set of values a state machine context may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Map(BTreeMap<String, ContextValue>),
}

impl ContextValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ContextValue::Int(v) => Some(*v as f64),
            ContextValue::Float(v) => Some(*v),
            ContextValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Rendering used for group-by keys and string comparisons.
    pub fn as_key(&self) -> Option<String> {
        match self {
            ContextValue::Bool(v) => Some(v.to_string()),
            ContextValue::Int(v) => Some(v.to_string()),
            ContextValue::Float(v) => Some(v.to_string()),
            ContextValue::String(s) => Some(s.clone()),
            ContextValue::Map(_) => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_string())
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Int(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

pub type Context = BTreeMap<String, ContextValue>;

/// One running instance of a CTA's state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachine {
    pub current_state: String,
    pub last_transition_at: EpochMillis,
    pub created_at: EpochMillis,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: Context,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reset: bool,
}

impl StateMachine {
    pub fn new(start_state: &str, now: EpochMillis) -> Self {
        Self {
            current_state: start_state.to_string(),
            last_transition_at: now,
            created_at: now,
            context: Context::new(),
            reset: false,
        }
    }
}

/// Everything the client knows about one CTA.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineSnapshot {
    pub cta_id: String,
    #[serde(default)]
    pub active_state_machines: BTreeMap<String, StateMachine>,
    #[serde(default)]
    pub reset_at: Vec<EpochMillis>,
    #[serde(default)]
    pub action_done_at: Vec<EpochMillis>,
}

impl StateMachineSnapshot {
    pub fn new(cta_id: CtaId) -> Self {
        Self {
            cta_id: cta_id.to_string(),
            ..Default::default()
        }
    }

    /// Sorts and de-duplicates both timestamp histories.
    pub fn normalize(&mut self) {
        normalize_timestamps(&mut self.reset_at);
        normalize_timestamps(&mut self.action_done_at);
    }
}

pub fn normalize_timestamps(timestamps: &mut Vec<EpochMillis>) {
    timestamps.sort_unstable();
    timestamps.dedup();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaReset {
    pub cta_id: String,
    pub reset_at: EpochMillis,
}

/// Exposure caps as evaluated, plus the tag-level reset history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviourExposureRule {
    #[serde(default)]
    pub session: Option<SessionFrequency>,
    #[serde(default)]
    pub lifespan: Option<LifespanFrequency>,
    #[serde(default)]
    pub window: Option<WindowFrequency>,
    #[serde(default)]
    pub ctas_reset_at: Vec<CtaReset>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaRelationSnapshot {
    #[serde(default)]
    pub shown_cta: Option<CtaRelationRule>,
    #[serde(default)]
    pub hide_cta: Option<CtaRelationRule>,
    /// CTA ids the client currently considers shown.
    #[serde(default)]
    pub active_ctas: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviourTagSnapshot {
    pub behaviour_tag_name: String,
    #[serde(default)]
    pub exposure_rule: BehaviourExposureRule,
    #[serde(default)]
    pub cta_relation: CtaRelationSnapshot,
}

/// The persisted per-(tenant, user) record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataSnapshot {
    #[serde(default)]
    pub state_machines: BTreeMap<CtaId, StateMachineSnapshot>,
    #[serde(default)]
    pub behaviour_tags: BTreeMap<String, BehaviourTagSnapshot>,
}

// ─── SDK request / response ────────────────────────────────────────────────

/// An interaction reported by the client that may move a state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaEvent {
    pub cta_id: String,
    pub name: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub properties: Context,
}

/// Explicit reset of one state machine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaResetRequest {
    pub cta_id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaSnapshotRequest {
    #[serde(default)]
    pub ctas: Vec<StateMachineSnapshot>,
    #[serde(default)]
    pub behaviour_tags: Vec<BehaviourTagSnapshot>,
    #[serde(default)]
    pub events: Vec<CtaEvent>,
    #[serde(default)]
    pub resets: Vec<CtaResetRequest>,
}

impl CtaSnapshotRequest {
    pub fn is_empty(&self) -> bool {
        self.ctas.is_empty()
            && self.behaviour_tags.is_empty()
            && self.events.is_empty()
            && self.resets.is_empty()
    }
}

/// An eligible CTA together with the user's refreshed state for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCtaAndStateMachine {
    pub cta_id: String,
    pub name: String,
    pub priority: i32,
    pub rule: Rule,
    pub behaviour_tag_name: String,
    pub active_state_machines: BTreeMap<String, StateMachine>,
    pub reset_at: Vec<EpochMillis>,
    pub action_done_at: Vec<EpochMillis>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaResponse {
    pub ctas: Vec<UserCtaAndStateMachine>,
    pub behaviour_tags: Vec<BehaviourTagSnapshot>,
}
