//! Server-held CTA and BehaviourTag definitions.
//!
//! These are authored elsewhere and only ever read by the decision engine.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::snapshot::ContextValue;

/// Milliseconds since the Unix epoch. Every timestamp on the wire uses this.
pub type EpochMillis = i64;

/// Numeric CTA identity as stored by the authoring subsystem.
pub type CtaId = i64;

/// Instance id used when a CTA has no group-by configuration.
pub const DEFAULT_INSTANCE_ID: &str = "default";

/// A call-to-action definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cta {
    pub id: CtaId,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cta_status: CtaStatus,
    #[serde(default)]
    pub rule: Rule,
    #[serde(default)]
    pub behaviour_tags: Vec<String>,
    #[serde(default)]
    pub start_time: Option<EpochMillis>,
    #[serde(default)]
    pub end_time: Option<EpochMillis>,
    /// Bumped by the authoring subsystem on every update.
    #[serde(default)]
    pub generation_id: u64,
    #[serde(default)]
    pub created_at: EpochMillis,
    #[serde(default)]
    pub last_updated_at: Option<EpochMillis>,
}

impl Cta {
    /// `start_time <= now < end_time`, with either bound optional.
    pub fn is_live_at(&self, now: EpochMillis) -> bool {
        let started = self.start_time.map_or(true, |start| start <= now);
        let not_ended = self.end_time.map_or(true, |end| now < end);
        started && not_ended
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CtaStatus {
    Draft,
    Scheduled,
    Active,
    Paused,
    Expired,
    Concluded,
}

/// A named grouping of CTAs sharing exposure and relation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviourTag {
    pub name: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exposure_rule: Option<ExposureRule>,
    #[serde(default)]
    pub cta_relation: Option<CtaRelation>,
    #[serde(default)]
    pub linked_ctas: BTreeSet<String>,
}

// ─── Exposure (frequency capping) ──────────────────────────────────────────

/// Up to three independent frequency caps. An absent cap imposes nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionFrequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowFrequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifespan: Option<LifespanFrequency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFrequency {
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowFrequency {
    pub limit: u32,
    pub unit: WindowUnit,
    pub value: u32,
}

impl WindowFrequency {
    /// Length of the trailing window.
    pub fn span(&self) -> chrono::Duration {
        let value = i64::from(self.value);
        match self.unit {
            WindowUnit::Seconds => chrono::Duration::seconds(value),
            WindowUnit::Minutes => chrono::Duration::minutes(value),
            WindowUnit::Hours => chrono::Duration::hours(value),
            WindowUnit::Days => chrono::Duration::days(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifespanFrequency {
    pub limit: u32,
}

// ─── Relations ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaRelation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shown_cta: Option<CtaRelationRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_cta: Option<CtaRelationRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaRelationRule {
    #[serde(default)]
    pub cta_list: BTreeSet<String>,
}

// ─── State machine definition ──────────────────────────────────────────────

/// Per-CTA state machine definition plus the targeting knobs that ride along
/// with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default = "default_start_state")]
    pub start_state: String,
    /// state -> event name -> candidate transitions, first match wins.
    #[serde(default)]
    pub state_transition: BTreeMap<String, BTreeMap<String, Vec<StateTransitionCondition>>>,
    #[serde(default)]
    pub terminal_states: Vec<String>,
    #[serde(default)]
    pub reset_states: Vec<String>,
    #[serde(default)]
    pub state_to_action: BTreeMap<String, String>,
    /// Trigger properties copied into the instance context. Empty copies all.
    #[serde(default)]
    pub context_params: Vec<String>,
    #[serde(default)]
    pub group_by_config: Option<GroupByConfig>,
    #[serde(default)]
    pub priority: i32,
    /// Instances older than this (by `createdAt`) are archived.
    #[serde(default, rename = "stateMachineTTL", alias = "stateMachineTtl")]
    pub state_machine_ttl: Option<i64>,
    #[serde(default)]
    pub cohort_eligibility: Option<CohortEligibility>,
    /// CTA-level frequency caps, evaluated against the CTA's own history.
    #[serde(default)]
    pub frequency: Option<ExposureRule>,
    /// Rendered by the client; opaque here.
    #[serde(default)]
    pub actions: Vec<serde_json::Value>,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            start_state: default_start_state(),
            state_transition: BTreeMap::new(),
            terminal_states: Vec::new(),
            reset_states: Vec::new(),
            state_to_action: BTreeMap::new(),
            context_params: Vec::new(),
            group_by_config: None,
            priority: 0,
            state_machine_ttl: None,
            cohort_eligibility: None,
            frequency: None,
            actions: Vec::new(),
        }
    }
}

impl Rule {
    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminal_states.iter().any(|s| s == state)
    }

    pub fn is_reset_state(&self, state: &str) -> bool {
        self.reset_states.iter().any(|s| s == state)
    }

    /// Candidate transitions out of `state` for `event`.
    pub fn transitions(&self, state: &str, event: &str) -> &[StateTransitionCondition] {
        self.state_transition
            .get(state)
            .and_then(|by_event| by_event.get(event))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionCondition {
    pub transition_to: String,
    #[serde(default)]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub operator: FilterOperator,
    #[serde(default)]
    pub filter: Vec<PropertyFilter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilter {
    pub property_name: String,
    pub comparison_type: ComparisonType,
    pub comparison_value: ContextValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonType {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEquals,
    LessThan,
    LessThanEquals,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupByConfig {
    #[serde(default)]
    pub max_active_state_machine_count: Option<usize>,
    #[serde(default)]
    pub group_by_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortEligibility {
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_start_state() -> String {
    "start".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_span_units() {
        let window = |unit| WindowFrequency { limit: 1, unit, value: 2 };
        assert_eq!(window(WindowUnit::Seconds).span().num_seconds(), 2);
        assert_eq!(window(WindowUnit::Minutes).span().num_seconds(), 120);
        assert_eq!(window(WindowUnit::Hours).span().num_seconds(), 7200);
        assert_eq!(window(WindowUnit::Days).span().num_seconds(), 172_800);
    }

    #[test]
    fn test_cta_validity_window() {
        let cta: Cta = serde_json::from_value(serde_json::json!({
            "id": 7,
            "ctaStatus": "ACTIVE",
            "startTime": 1_000,
            "endTime": 2_000
        }))
        .unwrap();

        assert!(!cta.is_live_at(999));
        assert!(cta.is_live_at(1_000));
        assert!(cta.is_live_at(1_999));
        assert!(!cta.is_live_at(2_000));
        assert_eq!(cta.tenant_id, "default");
        assert_eq!(cta.rule.start_state, "start");
    }

    #[test]
    fn test_rule_deserializes_transitions() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "startState": "idle",
            "stateTransition": {
                "idle": { "viewed": [{ "transitionTo": "seen" }] }
            },
            "terminalStates": ["seen"],
            "stateMachineTTL": 60_000
        }))
        .unwrap();

        assert_eq!(rule.transitions("idle", "viewed")[0].transition_to, "seen");
        assert!(rule.transitions("idle", "clicked").is_empty());
        assert!(rule.is_terminal("seen"));
        assert_eq!(rule.state_machine_ttl, Some(60_000));
    }
}
