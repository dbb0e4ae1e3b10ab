//! Per-request decision: which CTAs may show, and the user's refreshed state.
//!
//! Everything here is synchronous and works on a borrowed generation of the
//! definition cache; loading and persisting the user snapshot is the
//! service's job.

use std::collections::{BTreeSet, HashMap};

use thunder_cache::MasterData;
use thunder_core::snapshot::{
    BehaviourExposureRule, BehaviourTagSnapshot, CtaRelationSnapshot, CtaResponse,
    CtaSnapshotRequest, StateMachineSnapshot, UserCtaAndStateMachine, UserDataSnapshot,
};
use thunder_core::types::{BehaviourTag, CohortEligibility, Cta, CtaId, EpochMillis, DEFAULT_INSTANCE_ID};
use tracing::debug;

use crate::exposure::{self, ExposureHistory};
use crate::relation;
use crate::state_machine::{self, Advance, TriggerEvent};

/// Who is asking, and when.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub tenant_id: &'a str,
    pub cohorts: &'a [String],
    pub now: EpochMillis,
}

/// CTA ids travel as strings on the wire; anything non-numeric is ignored.
pub fn parse_cta_id(raw: &str) -> Option<CtaId> {
    raw.trim().parse().ok()
}

pub struct DecisionEngine<'m> {
    master: &'m MasterData,
}

impl<'m> DecisionEngine<'m> {
    pub fn new(master: &'m MasterData) -> Self {
        Self { master }
    }

    /// Active CTAs of the tenant, highest priority first, ties by id.
    fn tenant_active_ctas(&self, tenant_id: &str) -> Vec<&'m Cta> {
        let mut ctas: Vec<&Cta> = self
            .master
            .active_ctas
            .values()
            .filter(|cta| cta.tenant_id == tenant_id)
            .collect();
        ctas.sort_by(|a, b| {
            b.rule
                .priority
                .cmp(&a.rule.priority)
                .then_with(|| a.id.cmp(&b.id))
        });
        ctas
    }

    fn tag(&self, name: &str, tenant_id: &str) -> Option<&'m BehaviourTag> {
        self.master
            .behaviour_tags
            .get(name)
            .filter(|tag| tag.tenant_id == tenant_id)
    }

    /// Exposure history of a tag: every active or paused CTA carrying it
    /// contributes its own history, and tag-level resets count as resets.
    fn tag_history(
        &self,
        tag: &str,
        tenant_id: &str,
        snapshot: &UserDataSnapshot,
    ) -> (Vec<EpochMillis>, Vec<EpochMillis>) {
        let mut reset_at = Vec::new();
        let mut action_done_at = Vec::new();

        let carriers = self
            .master
            .active_ctas
            .values()
            .chain(self.master.paused_ctas.values())
            .filter(|cta| cta.tenant_id == tenant_id && cta.behaviour_tags.iter().any(|t| t == tag));
        for cta in carriers {
            if let Some(sm) = snapshot.state_machines.get(&cta.id) {
                reset_at.extend_from_slice(&sm.reset_at);
                action_done_at.extend_from_slice(&sm.action_done_at);
            }
        }

        if let Some(tag_snapshot) = snapshot.behaviour_tags.get(tag) {
            reset_at.extend(
                tag_snapshot
                    .exposure_rule
                    .ctas_reset_at
                    .iter()
                    .map(|r| r.reset_at),
            );
        }
        (reset_at, action_done_at)
    }

    fn tag_allows(
        &self,
        tag: &BehaviourTag,
        ctx: &DecisionContext<'_>,
        snapshot: &UserDataSnapshot,
    ) -> bool {
        if let Some(rule) = &tag.exposure_rule {
            let (reset_at, action_done_at) = self.tag_history(&tag.name, ctx.tenant_id, snapshot);
            let verdict = exposure::evaluate(
                rule,
                ExposureHistory {
                    reset_at: &reset_at,
                    action_done_at: &action_done_at,
                },
                ctx.now,
            );
            if !verdict.eligible {
                debug!(tag = %tag.name, rejected_by = ?verdict.rejected_by, "Tag exposure exhausted");
                return false;
            }
        }

        if let Some(rel) = &tag.cta_relation {
            let active = snapshot
                .behaviour_tags
                .get(&tag.name)
                .map(|t| t.cta_relation.active_ctas.as_slice())
                .unwrap_or_default();
            if !relation::evaluate(rel, &relation::active_set(active)) {
                debug!(tag = %tag.name, "Tag relation rule not satisfied");
                return false;
            }
        }
        true
    }

    fn is_eligible(
        &self,
        cta: &'m Cta,
        ctx: &DecisionContext<'_>,
        snapshot: &UserDataSnapshot,
        tag_verdicts: &mut HashMap<&'m str, bool>,
    ) -> bool {
        if !cta.is_live_at(ctx.now) {
            debug!(cta_id = cta.id, "Outside validity window");
            return false;
        }

        if let Some(cohorts) = &cta.rule.cohort_eligibility {
            if !cohort_eligible(cohorts, ctx.cohorts) {
                debug!(cta_id = cta.id, "Cohort not eligible");
                return false;
            }
        }

        for name in &cta.behaviour_tags {
            let Some(tag) = self.tag(name, ctx.tenant_id) else {
                continue;
            };
            let allowed = *tag_verdicts
                .entry(tag.name.as_str())
                .or_insert_with(|| self.tag_allows(tag, ctx, snapshot));
            if !allowed {
                return false;
            }
        }

        if let Some(frequency) = &cta.rule.frequency {
            let own = snapshot.state_machines.get(&cta.id);
            let history = ExposureHistory {
                reset_at: own.map(|sm| sm.reset_at.as_slice()).unwrap_or_default(),
                action_done_at: own.map(|sm| sm.action_done_at.as_slice()).unwrap_or_default(),
            };
            let verdict = exposure::evaluate(frequency, history, ctx.now);
            if !verdict.eligible {
                debug!(cta_id = cta.id, rejected_by = ?verdict.rejected_by, "CTA frequency exhausted");
                return false;
            }
        }
        true
    }

    /// Evaluates every active CTA of the tenant against `snapshot`, applies the
    /// request's resets and events to the eligible ones, and returns them.
    /// `snapshot` is updated in place with the refreshed state.
    pub fn decide(
        &self,
        ctx: &DecisionContext<'_>,
        snapshot: &mut UserDataSnapshot,
        request: &CtaSnapshotRequest,
    ) -> CtaResponse {
        let mut tag_verdicts: HashMap<&'m str, bool> = HashMap::new();
        let view: &UserDataSnapshot = snapshot;
        let eligible: Vec<&'m Cta> = self
            .tenant_active_ctas(ctx.tenant_id)
            .into_iter()
            .filter(|cta| self.is_eligible(*cta, ctx, view, &mut tag_verdicts))
            .collect();

        let mut response = CtaResponse::default();
        for cta in eligible {
            let sm = snapshot
                .state_machines
                .entry(cta.id)
                .or_insert_with(|| StateMachineSnapshot::new(cta.id));
            apply_request(cta, sm, request, ctx.now);
            sm.normalize();

            response.ctas.push(UserCtaAndStateMachine {
                cta_id: cta.id.to_string(),
                name: cta.name.clone(),
                priority: cta.rule.priority,
                rule: cta.rule.clone(),
                behaviour_tag_name: cta.behaviour_tags.first().cloned().unwrap_or_default(),
                active_state_machines: sm.active_state_machines.clone(),
                reset_at: sm.reset_at.clone(),
                action_done_at: sm.action_done_at.clone(),
            });
        }

        let evaluated: BTreeSet<&str> = tag_verdicts.keys().copied().collect();
        for name in evaluated {
            let Some(tag) = self.tag(name, ctx.tenant_id) else {
                continue;
            };
            let tag_snapshot = tag_snapshot(tag, snapshot.behaviour_tags.get(name));
            snapshot
                .behaviour_tags
                .insert(name.to_string(), tag_snapshot.clone());
            response.behaviour_tags.push(tag_snapshot);
        }

        debug!(
            tenant_id = ctx.tenant_id,
            eligible = response.ctas.len(),
            tags = response.behaviour_tags.len(),
            "Decision complete"
        );
        response
    }
}

/// Resets first, then events in request order, then make sure the CTA has
/// at least its default instance.
fn apply_request(cta: &Cta, sm: &mut StateMachineSnapshot, request: &CtaSnapshotRequest, now: EpochMillis) {
    let addressed = |raw: &str| parse_cta_id(raw) == Some(cta.id);

    for reset in request.resets.iter().filter(|r| addressed(&r.cta_id)) {
        let instance_id = reset.instance_id.as_deref().unwrap_or(DEFAULT_INSTANCE_ID);
        if !state_machine::reset(&cta.rule, sm, instance_id, now) {
            debug!(cta_id = cta.id, instance_id, "Reset had no effect");
        }
    }

    for event in request.events.iter().filter(|e| addressed(&e.cta_id)) {
        let instance_id =
            state_machine::instance_id_for(&cta.rule, event.instance_id.as_deref(), &event.properties);
        let trigger = TriggerEvent {
            name: &event.name,
            properties: &event.properties,
        };
        let outcome = state_machine::advance(&cta.rule, sm, &instance_id, now, Some(&trigger));
        if outcome == Advance::Unchanged {
            debug!(cta_id = cta.id, event = %event.name, instance_id = %instance_id, "Event had no effect");
        }
    }

    if sm.active_state_machines.is_empty() {
        state_machine::advance(&cta.rule, sm, DEFAULT_INSTANCE_ID, now, None);
    }
}

/// A user needs at least one included cohort and no excluded one. An empty
/// include list admits nobody.
fn cohort_eligible(eligibility: &CohortEligibility, user_cohorts: &[String]) -> bool {
    if eligibility
        .excludes
        .iter()
        .any(|c| user_cohorts.contains(c))
    {
        return false;
    }
    eligibility.includes.iter().any(|c| user_cohorts.contains(c))
}

fn tag_snapshot(tag: &BehaviourTag, stored: Option<&BehaviourTagSnapshot>) -> BehaviourTagSnapshot {
    let exposure_rule = tag.exposure_rule.clone().unwrap_or_default();
    let relation = tag.cta_relation.clone().unwrap_or_default();

    BehaviourTagSnapshot {
        behaviour_tag_name: tag.name.clone(),
        exposure_rule: BehaviourExposureRule {
            session: exposure_rule.session,
            lifespan: exposure_rule.lifespan,
            window: exposure_rule.window,
            ctas_reset_at: stored
                .map(|s| s.exposure_rule.ctas_reset_at.clone())
                .unwrap_or_default(),
        },
        cta_relation: CtaRelationSnapshot {
            shown_cta: relation.shown_cta,
            hide_cta: relation.hide_cta,
            active_ctas: stored
                .map(|s| s.cta_relation.active_ctas.clone())
                .unwrap_or_default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use thunder_core::snapshot::{CtaEvent, CtaResetRequest, StateMachine};
    use thunder_core::types::{
        CtaRelation, CtaRelationRule, CtaStatus, ExposureRule, GroupByConfig, Rule,
        SessionFrequency, StateTransitionCondition,
    };

    const NOW: EpochMillis = 1_700_000_000_000;

    fn cta(id: CtaId, priority: i32, tags: &[&str]) -> Cta {
        let state_transition = BTreeMap::from([(
            "start".to_string(),
            BTreeMap::from([(
                "click".to_string(),
                vec![StateTransitionCondition {
                    transition_to: "done".to_string(),
                    filters: None,
                }],
            )]),
        )]);
        Cta {
            id,
            tenant_id: "default".to_string(),
            name: format!("cta-{id}"),
            description: String::new(),
            cta_status: CtaStatus::Active,
            rule: Rule {
                state_transition,
                terminal_states: vec!["done".to_string()],
                priority,
                ..Default::default()
            },
            behaviour_tags: tags.iter().map(|t| t.to_string()).collect(),
            start_time: None,
            end_time: None,
            generation_id: 1,
            created_at: 0,
            last_updated_at: None,
        }
    }

    fn tag(name: &str) -> BehaviourTag {
        BehaviourTag {
            name: name.to_string(),
            tenant_id: "default".to_string(),
            description: String::new(),
            exposure_rule: None,
            cta_relation: None,
            linked_ctas: Default::default(),
        }
    }

    fn master(ctas: Vec<Cta>, tags: Vec<BehaviourTag>) -> MasterData {
        MasterData {
            active_ctas: ctas.into_iter().map(|c| (c.id, c)).collect(),
            paused_ctas: HashMap::new(),
            behaviour_tags: tags.into_iter().map(|t| (t.name.clone(), t)).collect(),
            loaded_at: Some(0),
        }
    }

    fn ctx() -> DecisionContext<'static> {
        DecisionContext {
            tenant_id: "default",
            cohorts: &[],
            now: NOW,
        }
    }

    fn ids(response: &CtaResponse) -> Vec<&str> {
        response.ctas.iter().map(|c| c.cta_id.as_str()).collect()
    }

    #[test]
    fn test_orders_by_priority_then_id() {
        let data = master(vec![cta(3, 1, &[]), cta(1, 1, &[]), cta(2, 9, &[])], vec![]);
        let mut snapshot = UserDataSnapshot::default();
        let response = DecisionEngine::new(&data).decide(&ctx(), &mut snapshot, &CtaSnapshotRequest::default());
        assert_eq!(ids(&response), vec!["2", "1", "3"]);
    }

    #[test]
    fn test_other_tenants_are_invisible() {
        let mut foreign = cta(7, 0, &[]);
        foreign.tenant_id = "globex".to_string();
        let data = master(vec![foreign, cta(1, 0, &[])], vec![]);

        let mut snapshot = UserDataSnapshot::default();
        let response = DecisionEngine::new(&data).decide(&ctx(), &mut snapshot, &CtaSnapshotRequest::default());
        assert_eq!(ids(&response), vec!["1"]);
        assert!(!snapshot.state_machines.contains_key(&7));
    }

    #[test]
    fn test_cohort_includes_and_excludes() {
        let mut gated = cta(1, 0, &[]);
        gated.rule.cohort_eligibility = Some(CohortEligibility {
            includes: vec!["premium".to_string()],
            excludes: vec!["churned".to_string()],
        });
        let data = master(vec![gated], vec![]);
        let engine = DecisionEngine::new(&data);

        let premium = vec!["premium".to_string()];
        let churned = vec!["premium".to_string(), "churned".to_string()];
        for (cohorts, expected) in [(&[][..], 0), (&premium[..], 1), (&churned[..], 0)] {
            let mut snapshot = UserDataSnapshot::default();
            let c = DecisionContext { cohorts, ..ctx() };
            let response = engine.decide(&c, &mut snapshot, &CtaSnapshotRequest::default());
            assert_eq!(response.ctas.len(), expected, "cohorts {cohorts:?}");
        }

        let mut open = cta(2, 0, &[]);
        open.rule.cohort_eligibility = Some(CohortEligibility::default());
        let data = master(vec![open], vec![]);
        let mut snapshot = UserDataSnapshot::default();
        let c = DecisionContext { cohorts: &premium, ..ctx() };
        let response = DecisionEngine::new(&data).decide(&c, &mut snapshot, &CtaSnapshotRequest::default());
        assert!(response.ctas.is_empty());
    }

    #[test]
    fn test_tag_exposure_counts_history_of_every_carrier() {
        let mut capped = tag("onboarding");
        capped.exposure_rule = Some(ExposureRule {
            session: Some(SessionFrequency { limit: 1 }),
            ..Default::default()
        });
        let data = master(
            vec![cta(1, 0, &["onboarding"]), cta(2, 0, &["onboarding"])],
            vec![capped],
        );

        // CTA 2 has already been acted on; CTA 1 shares the tag budget.
        let mut snapshot = UserDataSnapshot::default();
        let mut done = StateMachineSnapshot::new(2);
        done.action_done_at.push(NOW - 1_000);
        snapshot.state_machines.insert(2, done);

        let response = DecisionEngine::new(&data).decide(&ctx(), &mut snapshot, &CtaSnapshotRequest::default());
        assert!(response.ctas.is_empty());
        assert_eq!(response.behaviour_tags.len(), 1);
        assert_eq!(response.behaviour_tags[0].exposure_rule.session, Some(SessionFrequency { limit: 1 }));
    }

    #[test]
    fn test_hidden_by_active_cta() {
        let mut hider = tag("wallet");
        hider.cta_relation = Some(CtaRelation {
            shown_cta: None,
            hide_cta: Some(CtaRelationRule {
                cta_list: ["5".to_string()].into(),
            }),
        });
        let data = master(vec![cta(1, 0, &["wallet"])], vec![hider]);
        let engine = DecisionEngine::new(&data);

        let mut snapshot = UserDataSnapshot::default();
        snapshot.behaviour_tags.insert(
            "wallet".to_string(),
            BehaviourTagSnapshot {
                behaviour_tag_name: "wallet".to_string(),
                cta_relation: CtaRelationSnapshot {
                    active_ctas: vec!["5".to_string()],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let response = engine.decide(&ctx(), &mut snapshot, &CtaSnapshotRequest::default());
        assert!(response.ctas.is_empty());
        // The user's active set survives the refresh of the tag snapshot.
        assert_eq!(snapshot.behaviour_tags["wallet"].cta_relation.active_ctas, vec!["5"]);
    }

    #[test]
    fn test_unknown_tag_does_not_block() {
        let data = master(vec![cta(1, 0, &["ghost"])], vec![]);
        let mut snapshot = UserDataSnapshot::default();
        let response = DecisionEngine::new(&data).decide(&ctx(), &mut snapshot, &CtaSnapshotRequest::default());
        assert_eq!(ids(&response), vec!["1"]);
        assert_eq!(response.ctas[0].behaviour_tag_name, "ghost");
        assert!(response.behaviour_tags.is_empty());
    }

    #[test]
    fn test_events_and_resets_are_applied() {
        let data = master(vec![cta(1, 0, &[])], vec![]);
        let engine = DecisionEngine::new(&data);
        let mut snapshot = UserDataSnapshot::default();

        let click = CtaSnapshotRequest {
            events: vec![CtaEvent {
                cta_id: "1".to_string(),
                name: "click".to_string(),
                instance_id: None,
                properties: Default::default(),
            }],
            ..Default::default()
        };
        let response = engine.decide(&ctx(), &mut snapshot, &click);
        assert_eq!(response.ctas[0].action_done_at, vec![NOW]);
        assert_eq!(response.ctas[0].active_state_machines["default"].current_state, "done");

        let reset = CtaSnapshotRequest {
            resets: vec![CtaResetRequest {
                cta_id: "1".to_string(),
                instance_id: None,
            }],
            ..Default::default()
        };
        let c = DecisionContext { now: NOW + 10, ..ctx() };
        let response = engine.decide(&c, &mut snapshot, &reset);
        let sm: &StateMachine = &response.ctas[0].active_state_machines["default"];
        assert_eq!(sm.current_state, "start");
        assert!(sm.reset);
        assert_eq!(response.ctas[0].reset_at, vec![NOW + 10]);
    }

    #[test]
    fn test_cta_frequency_uses_own_history() {
        let mut once = cta(1, 0, &[]);
        once.rule.frequency = Some(ExposureRule {
            session: Some(SessionFrequency { limit: 1 }),
            ..Default::default()
        });
        let data = master(vec![once], vec![]);

        let mut snapshot = UserDataSnapshot::default();
        let mut sm = StateMachineSnapshot::new(1);
        sm.action_done_at.push(NOW - 5);
        snapshot.state_machines.insert(1, sm);

        let response = DecisionEngine::new(&data).decide(&ctx(), &mut snapshot, &CtaSnapshotRequest::default());
        assert!(response.ctas.is_empty());
    }

    fn tag_with_active(name: &str, active: &[&str]) -> BehaviourTagSnapshot {
        BehaviourTagSnapshot {
            behaviour_tag_name: name.to_string(),
            cta_relation: CtaRelationSnapshot {
                active_ctas: active.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_shown_prerequisites_must_all_be_active() {
        let mut follow_up = tag("upsell");
        follow_up.cta_relation = Some(CtaRelation {
            shown_cta: Some(CtaRelationRule {
                cta_list: ["1".to_string(), "2".to_string()].into(),
            }),
            hide_cta: None,
        });
        let data = master(vec![cta(9, 0, &["upsell"])], vec![follow_up]);
        let engine = DecisionEngine::new(&data);

        let mut partial = UserDataSnapshot::default();
        partial
            .behaviour_tags
            .insert("upsell".to_string(), tag_with_active("upsell", &["1"]));
        let response = engine.decide(&ctx(), &mut partial, &CtaSnapshotRequest::default());
        assert!(response.ctas.is_empty());

        let mut both = UserDataSnapshot::default();
        both.behaviour_tags
            .insert("upsell".to_string(), tag_with_active("upsell", &["1", "2"]));
        let response = engine.decide(&ctx(), &mut both, &CtaSnapshotRequest::default());
        assert_eq!(ids(&response), vec!["9"]);
        assert_eq!(response.behaviour_tags[0].cta_relation.active_ctas, vec!["1", "2"]);
    }

    #[test]
    fn test_resets_cannot_exceed_instance_limit() {
        let mut grouped = cta(1, 0, &[]);
        grouped.rule.group_by_config = Some(GroupByConfig {
            max_active_state_machine_count: Some(1),
            group_by_keys: vec!["merchant".to_string()],
        });
        let data = master(vec![grouped], vec![]);
        let mut snapshot = UserDataSnapshot::default();

        let request = CtaSnapshotRequest {
            resets: (0..5)
                .map(|i| CtaResetRequest {
                    cta_id: "1".to_string(),
                    instance_id: Some(format!("x{i}")),
                })
                .collect(),
            ..Default::default()
        };
        let response = DecisionEngine::new(&data).decide(&ctx(), &mut snapshot, &request);

        let item = &response.ctas[0];
        assert_eq!(item.active_state_machines.len(), 1);
        assert!(item.active_state_machines.contains_key("x0"));
        assert_eq!(item.reset_at, vec![NOW]);
        assert_eq!(snapshot.state_machines[&1].active_state_machines.len(), 1);
    }

    #[test]
    fn test_parse_cta_id() {
        assert_eq!(parse_cta_id("42"), Some(42));
        assert_eq!(parse_cta_id(" 7 "), Some(7));
        assert_eq!(parse_cta_id("abc"), None);
    }
}
