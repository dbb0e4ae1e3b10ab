//! End-to-end decision flow over the in-memory store.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use thunder_cache::{MemoryStore, StateMachineRepository, StaticDataCache};
    use thunder_core::config::TenantConfig;
    use thunder_core::snapshot::{CtaEvent, CtaSnapshotRequest, UserDataSnapshot};
    use thunder_core::types::{
        BehaviourTag, Cta, CtaStatus, ExposureRule, Rule, SessionFrequency,
        StateTransitionCondition,
    };
    use thunder_decision::{DecisionContext, DecisionEngine, SdkService, StaticCohortsClient};

    const NOW: i64 = 1_700_000_000_000;
    const HOUR: i64 = 3_600_000;

    /// start --shown--> shown --click--> clicked (terminal)
    fn banner_rule() -> Rule {
        let step = |to: &str| {
            vec![StateTransitionCondition {
                transition_to: to.to_string(),
                filters: None,
            }]
        };
        Rule {
            start_state: "start".to_string(),
            state_transition: BTreeMap::from([
                ("start".to_string(), BTreeMap::from([("shown".to_string(), step("shown"))])),
                ("shown".to_string(), BTreeMap::from([("click".to_string(), step("clicked"))])),
            ]),
            terminal_states: vec!["clicked".to_string()],
            ..Default::default()
        }
    }

    fn cta(id: i64, tags: &[&str]) -> Cta {
        Cta {
            id,
            tenant_id: "default".to_string(),
            name: format!("banner-{id}"),
            description: "Home screen banner".to_string(),
            cta_status: CtaStatus::Active,
            rule: banner_rule(),
            behaviour_tags: tags.iter().map(|t| t.to_string()).collect(),
            start_time: Some(NOW - HOUR),
            end_time: Some(NOW + HOUR),
            generation_id: 1,
            created_at: NOW - HOUR,
            last_updated_at: None,
        }
    }

    fn event(cta_id: i64, name: &str) -> CtaEvent {
        CtaEvent {
            cta_id: cta_id.to_string(),
            name: name.to_string(),
            instance_id: None,
            properties: Default::default(),
        }
    }

    async fn service(store: Arc<MemoryStore>) -> SdkService {
        let cache = Arc::new(StaticDataCache::new(store.clone(), store.clone()));
        cache.initiate().await.unwrap();
        SdkService::new(
            cache,
            store,
            Arc::new(StaticCohortsClient::default()),
            TenantConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_fresh_user_gets_cta_in_start_state() {
        let store = Arc::new(MemoryStore::new());
        store.put_cta(cta(1, &[]));
        let svc = service(store).await;

        let response = svc
            .app_launch_at("default", 42, &CtaSnapshotRequest::default(), NOW)
            .await
            .unwrap();

        assert_eq!(response.ctas.len(), 1);
        let item = &response.ctas[0];
        assert_eq!(item.cta_id, "1");
        assert_eq!(item.name, "banner-1");
        let sm = &item.active_state_machines["default"];
        assert_eq!(sm.current_state, "start");
        assert_eq!(sm.created_at, NOW);
        assert!(item.reset_at.is_empty());
        assert!(item.action_done_at.is_empty());
    }

    #[tokio::test]
    async fn test_expired_cta_is_absent() {
        let store = Arc::new(MemoryStore::new());
        store.put_cta(cta(1, &[]));
        store.put_cta(cta(2, &[]));
        let svc = service(store).await;

        let response = svc
            .app_launch_at("default", 42, &CtaSnapshotRequest::default(), NOW + 2 * HOUR)
            .await
            .unwrap();
        assert!(response.ctas.is_empty());
    }

    #[tokio::test]
    async fn test_identical_requests_yield_identical_output() {
        let mut shared = cta(1, &["home"]);
        shared.rule.priority = 5;
        let store = Arc::new(MemoryStore::new());
        store.put_cta(shared);
        store.put_cta(cta(2, &["home"]));
        let svc = service(store).await;

        let first = svc
            .app_launch_at("default", 1, &CtaSnapshotRequest::default(), NOW)
            .await
            .unwrap();

        let master = svc.cache().snapshot();
        let engine = DecisionEngine::new(&master);
        let ctx = DecisionContext {
            tenant_id: "default",
            cohorts: &[],
            now: NOW,
        };
        let mut a = UserDataSnapshot::default();
        let mut b = UserDataSnapshot::default();
        let from_a = engine.decide(&ctx, &mut a, &CtaSnapshotRequest::default());
        let from_b = engine.decide(&ctx, &mut b, &CtaSnapshotRequest::default());

        assert_eq!(from_a, from_b);
        assert_eq!(a, b);
        assert_eq!(from_a, first);
        assert_eq!(
            first.ctas.iter().map(|c| c.cta_id.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
    }

    #[tokio::test]
    async fn test_redeciding_a_populated_snapshot_is_stable() {
        let store = Arc::new(MemoryStore::new());
        store.put_cta(cta(1, &[]));
        store.put_cta(cta(2, &[]));
        let svc = service(store.clone()).await;

        let progressed = CtaSnapshotRequest {
            events: vec![event(1, "shown"), event(2, "shown"), event(2, "click")],
            ..Default::default()
        };
        svc.app_launch_at("default", 3, &progressed, NOW).await.unwrap();
        let stored = store.find("default", 3).await.unwrap().unwrap();
        assert_eq!(stored.state_machines[&2].action_done_at, vec![NOW]);

        let master = svc.cache().snapshot();
        let engine = DecisionEngine::new(&master);
        let ctx = DecisionContext {
            tenant_id: "default",
            cohorts: &[],
            now: NOW + 1_000,
        };
        let mut first = stored.clone();
        let from_first = engine.decide(&ctx, &mut first, &CtaSnapshotRequest::default());
        let mut second = first.clone();
        let from_second = engine.decide(&ctx, &mut second, &CtaSnapshotRequest::default());

        assert_eq!(from_first, from_second);
        assert_eq!(first, second);
        assert_eq!(first, stored);
        let states: Vec<_> = from_first
            .ctas
            .iter()
            .map(|c| c.active_state_machines["default"].current_state.as_str())
            .collect();
        assert_eq!(states, vec!["shown", "clicked"]);
    }

    #[tokio::test]
    async fn test_tag_session_cap_across_launches() {
        let store = Arc::new(MemoryStore::new());
        store.put_cta(cta(1, &["home"]));
        store.put_behaviour_tag(BehaviourTag {
            name: "home".to_string(),
            tenant_id: "default".to_string(),
            description: String::new(),
            exposure_rule: Some(ExposureRule {
                session: Some(SessionFrequency { limit: 1 }),
                ..Default::default()
            }),
            cta_relation: None,
            linked_ctas: ["1".to_string()].into(),
        });
        let svc = service(store.clone()).await;

        // The user sees the banner and clicks it within the same launch.
        let clicked = CtaSnapshotRequest {
            events: vec![event(1, "shown"), event(1, "click")],
            ..Default::default()
        };
        let response = svc.app_launch_at("default", 9, &clicked, NOW).await.unwrap();
        assert_eq!(response.ctas[0].action_done_at, vec![NOW]);

        // The session budget of the tag is spent.
        let response = svc
            .app_launch_at("default", 9, &CtaSnapshotRequest::default(), NOW + 1_000)
            .await
            .unwrap();
        assert!(response.ctas.is_empty());

        let stored = store.find("default", 9).await.unwrap().unwrap();
        assert_eq!(stored.state_machines[&1].action_done_at, vec![NOW]);
        assert!(stored.behaviour_tags.contains_key("home"));
    }
}
