//! Keeping the persisted user snapshot in shape: folding in what the client
//! sends and dropping what no longer matters.

use std::collections::{BTreeMap, HashSet};

use thunder_cache::MasterData;
use thunder_core::snapshot::{
    normalize_timestamps, BehaviourTagSnapshot, CtaSnapshotRequest, StateMachineSnapshot,
    UserDataSnapshot,
};
use thunder_core::types::{CtaId, EpochMillis};
use tracing::{debug, warn};

use crate::engine::parse_cta_id;

/// Folds the client's CTA and tag snapshots into `stored`.
///
/// Per instance the copy with the later (or equal) `lastTransitionAt` wins;
/// timestamp histories are unioned. Tag snapshots replace stored ones by name.
pub fn merge_delta(stored: &mut UserDataSnapshot, request: &CtaSnapshotRequest) {
    for incoming in &request.ctas {
        let Some(cta_id) = parse_cta_id(&incoming.cta_id) else {
            warn!(cta_id = %incoming.cta_id, "Dropping snapshot with non-numeric CTA id");
            continue;
        };
        merge_cta(stored, cta_id, incoming);
    }

    for incoming in &request.behaviour_tags {
        merge_tag(&mut stored.behaviour_tags, incoming);
    }
}

fn merge_cta(stored: &mut UserDataSnapshot, cta_id: CtaId, incoming: &StateMachineSnapshot) {
    let Some(existing) = stored.state_machines.get_mut(&cta_id) else {
        let mut fresh = incoming.clone();
        fresh.cta_id = cta_id.to_string();
        fresh.normalize();
        stored.state_machines.insert(cta_id, fresh);
        return;
    };

    for (instance_id, theirs) in &incoming.active_state_machines {
        match existing.active_state_machines.get(instance_id) {
            Some(ours) if ours.last_transition_at > theirs.last_transition_at => {}
            _ => {
                existing
                    .active_state_machines
                    .insert(instance_id.clone(), theirs.clone());
            }
        }
    }

    union_into(&mut existing.reset_at, &incoming.reset_at);
    union_into(&mut existing.action_done_at, &incoming.action_done_at);
}

fn merge_tag(stored: &mut BTreeMap<String, BehaviourTagSnapshot>, incoming: &BehaviourTagSnapshot) {
    if incoming.behaviour_tag_name.is_empty() {
        return;
    }
    stored.insert(incoming.behaviour_tag_name.clone(), incoming.clone());
}

/// Sorted, de-duplicated union.
fn union_into(target: &mut Vec<EpochMillis>, extra: &[EpochMillis]) {
    target.extend_from_slice(extra);
    normalize_timestamps(target);
}

/// Drops state that refers to definitions the tenant no longer runs.
///
/// - CTA snapshots whose CTA is neither active nor paused
/// - instances older than the CTA's `stateMachineTTL`, by `createdAt`
/// - tag snapshots no active or paused CTA of the tenant carries
///
/// An age that overflows (a client-supplied `createdAt` near `i64::MIN`)
/// saturates, so the instance expires.
pub fn archive_stale(
    snapshot: &mut UserDataSnapshot,
    master: &MasterData,
    tenant_id: &str,
    now: EpochMillis,
) {
    let before_ctas = snapshot.state_machines.len();
    let before_tags = snapshot.behaviour_tags.len();
    let mut expired_instances = 0usize;

    let live = |id: &CtaId| {
        master
            .active_ctas
            .get(id)
            .or_else(|| master.paused_ctas.get(id))
            .filter(|cta| cta.tenant_id == tenant_id)
    };

    snapshot.state_machines.retain(|id, _| live(id).is_some());

    for (id, sm) in snapshot.state_machines.iter_mut() {
        let Some(ttl) = live(id).and_then(|cta| cta.rule.state_machine_ttl) else {
            continue;
        };
        let count = sm.active_state_machines.len();
        sm.active_state_machines
            .retain(|_, instance| now.saturating_sub(instance.created_at) <= ttl);
        expired_instances += count - sm.active_state_machines.len();
    }

    let referenced: HashSet<&str> = master
        .active_ctas
        .values()
        .chain(master.paused_ctas.values())
        .filter(|cta| cta.tenant_id == tenant_id)
        .flat_map(|cta| cta.behaviour_tags.iter().map(String::as_str))
        .collect();
    snapshot
        .behaviour_tags
        .retain(|name, _| referenced.contains(name.as_str()));

    let dropped_ctas = before_ctas - snapshot.state_machines.len();
    let dropped_tags = before_tags - snapshot.behaviour_tags.len();
    if dropped_ctas + dropped_tags + expired_instances > 0 {
        debug!(
            tenant_id,
            dropped_ctas, dropped_tags, expired_instances, "Archived stale snapshot data"
        );
    }
}
