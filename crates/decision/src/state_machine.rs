//! Per-CTA finite state machine.
//!
//! A CTA's rule describes states and the events that move between them. Each
//! user holds one or more running instances per CTA (one per group-by key),
//! all sharing the CTA's `resetAt` and `actionDoneAt` history.

use serde::Serialize;
use thunder_core::snapshot::{Context, StateMachine, StateMachineSnapshot};
use thunder_core::types::{EpochMillis, Rule, DEFAULT_INSTANCE_ID};
use tracing::debug;

use crate::evaluator::select_transition;

/// An interaction that may move an instance.
#[derive(Debug, Clone, Copy)]
pub struct TriggerEvent<'a> {
    pub name: &'a str,
    pub properties: &'a Context,
}

/// What [`advance`] did to the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Advance {
    Created,
    Transitioned,
    ReachedTerminal,
    Reset,
    Unchanged,
}

/// Instance id an event addresses: the explicit id, else the rule's group-by
/// keys read from the event properties, else the default instance.
pub fn instance_id_for(rule: &Rule, explicit: Option<&str>, properties: &Context) -> String {
    if let Some(id) = explicit.filter(|id| !id.is_empty()) {
        return id.to_string();
    }

    let keys = rule
        .group_by_config
        .as_ref()
        .map(|g| g.group_by_keys.as_slice())
        .unwrap_or_default();
    if keys.is_empty() {
        return DEFAULT_INSTANCE_ID.to_string();
    }

    let parts: Option<Vec<String>> = keys
        .iter()
        .map(|key| properties.get(key).and_then(|v| v.as_key()))
        .collect();
    match parts {
        Some(parts) => parts.join("_"),
        None => DEFAULT_INSTANCE_ID.to_string(),
    }
}

/// Whether another instance may be started under the rule's group-by limit.
fn has_capacity(rule: &Rule, snapshot: &StateMachineSnapshot) -> bool {
    match rule
        .group_by_config
        .as_ref()
        .and_then(|g| g.max_active_state_machine_count)
    {
        Some(max) => snapshot.active_state_machines.len() < max,
        None => true,
    }
}

/// Moves one instance forward.
///
/// A missing instance is created in the start state first, unless the
/// group-by limit is already reached. Events with no matching transition,
/// and any event on an instance in a terminal state, leave it unchanged.
pub fn advance(
    rule: &Rule,
    snapshot: &mut StateMachineSnapshot,
    instance_id: &str,
    now: EpochMillis,
    trigger: Option<&TriggerEvent<'_>>,
) -> Advance {
    let mut created = false;
    if !snapshot.active_state_machines.contains_key(instance_id) {
        if !has_capacity(rule, snapshot) {
            debug!(cta_id = %snapshot.cta_id, instance_id, "Instance limit reached, event ignored");
            return Advance::Unchanged;
        }
        snapshot
            .active_state_machines
            .insert(instance_id.to_string(), StateMachine::new(&rule.start_state, now));
        created = true;
    }
    let unchanged = if created { Advance::Created } else { Advance::Unchanged };

    let Some(trigger) = trigger else {
        return unchanged;
    };
    let Some(instance) = snapshot.active_state_machines.get_mut(instance_id) else {
        return unchanged;
    };
    if rule.is_terminal(&instance.current_state) {
        return unchanged;
    }

    let conditions = rule.transitions(&instance.current_state, trigger.name);
    let Some(condition) = select_transition(conditions, trigger.properties) else {
        return unchanged;
    };

    let from = std::mem::replace(&mut instance.current_state, condition.transition_to.clone());
    instance.last_transition_at = now;
    instance.reset = false;
    for (key, value) in trigger.properties {
        if rule.context_params.is_empty() || rule.context_params.contains(key) {
            instance.context.insert(key.clone(), value.clone());
        }
    }
    let to = instance.current_state.clone();

    debug!(
        cta_id = %snapshot.cta_id,
        instance_id,
        event = trigger.name,
        from = %from,
        to = %to,
        "State transition"
    );

    let mut outcome = Advance::Transitioned;
    if rule.is_terminal(&to) {
        snapshot.action_done_at.push(now);
        outcome = Advance::ReachedTerminal;
    }
    if rule.is_reset_state(&to) {
        reset(rule, snapshot, instance_id, now);
        outcome = Advance::Reset;
    }
    outcome
}

/// Starts a new session for the instance: records the reset and puts the
/// instance back in the start state with an empty context.
///
/// Resetting an instance that does not exist yet creates it, subject to the
/// same group-by limit as [`advance`]. Returns whether the reset was applied.
pub fn reset(rule: &Rule, snapshot: &mut StateMachineSnapshot, instance_id: &str, now: EpochMillis) -> bool {
    if !snapshot.active_state_machines.contains_key(instance_id) && !has_capacity(rule, snapshot) {
        debug!(cta_id = %snapshot.cta_id, instance_id, "Instance limit reached, reset ignored");
        return false;
    }
    snapshot.reset_at.push(now);

    let mut fresh = match snapshot.active_state_machines.remove(instance_id) {
        Some(previous) => StateMachine {
            created_at: previous.created_at,
            ..StateMachine::new(&rule.start_state, now)
        },
        None => StateMachine::new(&rule.start_state, now),
    };
    fresh.reset = true;
    snapshot
        .active_state_machines
        .insert(instance_id.to_string(), fresh);

    debug!(cta_id = %snapshot.cta_id, instance_id, "State machine reset");
    true
}
