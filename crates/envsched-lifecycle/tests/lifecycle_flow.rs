mod common;

use common::*;
use envsched_lifecycle::{LifecycleConfig, LifecycleError, ListRequest};
use envsched_runtime::{RuntimeOp, LABEL_ENVIRONMENT, LABEL_ROLE};
use envsched_types::{ContainerStatus, Phase};
use std::collections::BTreeMap;
use std::time::Duration;

#[tokio::test]
async fn test_create_then_get_reports_running_environment() {
    let h = harness().await;

    let created = h
        .controller
        .create(three_tier().with_label("team", "payments"), &ctx())
        .await
        .expect("create should succeed");
    assert_eq!(created.phase, Phase::Running);

    let fetched = h.controller.get(&created.id).await.expect("get should succeed");
    assert_eq!(fetched.phase, Phase::Running);
    assert_eq!(fetched.containers.len(), 3);
    for (name, record) in &fetched.containers {
        let id = record.container_id.as_ref().expect("container bound");
        assert!(id.belongs_to(&created.id), "{} has a foreign ID", name);
        assert_eq!(record.status, ContainerStatus::Running);
        assert_eq!(h.runtime.status_of(name), Some(ContainerStatus::Running));
    }

    let labels = h.runtime.labels_of("api").expect("api exists");
    assert_eq!(labels["team"], "payments");
    assert_eq!(labels[LABEL_ROLE], "backend");
    assert_eq!(labels[LABEL_ENVIRONMENT], created.id.to_string());
}

#[tokio::test(start_paused = true)]
async fn test_containers_come_up_in_dependency_order() {
    let h = harness().await;
    h.runtime.script_probe("db", [false, false, true]);

    h.controller
        .create(three_tier_with_db_check(health_check(3, 0)), &ctx())
        .await
        .expect("create should succeed");

    let db_healthy = h
        .runtime
        .last_position(RuntimeOp::Probe, "db")
        .expect("db was probed");
    let api_first = h.runtime.first_call_on("api").expect("api was touched");
    let api_started = h
        .runtime
        .first_position(RuntimeOp::Start, "api")
        .expect("api was started");
    let web_first = h.runtime.first_call_on("web").expect("web was touched");

    assert!(db_healthy < api_first, "api touched before db was healthy");
    assert!(api_started < web_first, "web touched before api was started");
    assert_eq!(h.runtime.calls(RuntimeOp::Probe).len(), 5);
}

#[tokio::test]
async fn test_missing_images_are_pulled_once() {
    let h = harness().await;
    h.runtime.preload_image("postgres:16");

    h.controller
        .create(three_tier(), &ctx())
        .await
        .expect("create should succeed");

    let pulled: Vec<String> = h
        .runtime
        .calls(RuntimeOp::PullImage)
        .into_iter()
        .map(|c| c.target)
        .collect();
    assert_eq!(pulled, vec!["node:18".to_string(), "nginx:1.25".to_string()]);
}

#[tokio::test]
async fn test_create_stop_delete_then_get_is_not_found() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create should succeed");

    let stopped = h
        .controller
        .stop(&env.id, false, &ctx())
        .await
        .expect("stop should succeed");
    assert_eq!(stopped.phase, Phase::Stopped);
    assert_eq!(h.runtime.status_of("db"), Some(ContainerStatus::Stopped));

    h.controller
        .delete(&env.id, &ctx())
        .await
        .expect("delete should succeed");
    assert_eq!(h.runtime.container_count(), 0);

    let err = h.controller.get(&env.id).await.expect_err("environment is gone");
    assert!(matches!(err, LifecycleError::NotFound(_)));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create should succeed");

    h.controller.delete(&env.id, &ctx()).await.expect("first delete");
    h.controller.delete(&env.id, &ctx()).await.expect("second delete");
    h.controller
        .delete(&envsched_types::EnvironmentId::generate(), &ctx())
        .await
        .expect("unknown environment");
}

#[tokio::test]
async fn test_delete_sweeps_untracked_containers() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create should succeed");

    // Forget the api container in the record; it still carries the environment's ID
    let mut stored = h.controller.get(&env.id).await.expect("get");
    if let Some(record) = stored.containers.get_mut("api") {
        record.clear();
    }
    use envsched_store::EnvironmentStore;
    h.store.update(stored).await.expect("store update");

    h.controller.delete(&env.id, &ctx()).await.expect("delete");
    assert_eq!(h.runtime.container_count(), 0);
}

#[tokio::test]
async fn test_stop_then_start_keeps_container_identity() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create should succeed");
    let before = h.runtime.container_id("api");

    h.controller.stop(&env.id, false, &ctx()).await.expect("stop");
    let started = h.controller.start(&env.id, &ctx()).await.expect("start");

    assert_eq!(started.phase, Phase::Running);
    assert_eq!(h.runtime.container_id("api"), before);
    assert_eq!(h.runtime.status_of("api"), Some(ContainerStatus::Running));

    // Stop order is the reverse of bring-up order
    let web = h.runtime.first_position(RuntimeOp::StopGraceful, "web");
    let api = h.runtime.first_position(RuntimeOp::StopGraceful, "api");
    let db = h.runtime.first_position(RuntimeOp::StopGraceful, "db");
    assert!(web < api && api < db);
}

#[tokio::test]
async fn test_forced_stop_kills_tasks() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create should succeed");

    h.controller.stop(&env.id, true, &ctx()).await.expect("stop");

    assert!(h.runtime.calls(RuntimeOp::StopGraceful).is_empty());
    assert_eq!(h.runtime.calls(RuntimeOp::Kill).len(), 3);
    assert_eq!(
        h.runtime.status_of("web"),
        Some(ContainerStatus::Exited { code: 137 })
    );
}

#[tokio::test]
async fn test_restart_cycles_every_container() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create should succeed");
    h.runtime.clear_journal();

    let restarted = h.controller.restart(&env.id, &ctx()).await.expect("restart");
    assert_eq!(restarted.phase, Phase::Running);

    let last_stop = h
        .runtime
        .last_position(RuntimeOp::StopGraceful, "db")
        .expect("db stopped");
    let first_start = h
        .runtime
        .first_position(RuntimeOp::Start, "db")
        .expect("db started");
    assert!(last_stop < first_start);
    assert_eq!(h.runtime.calls(RuntimeOp::Create).len(), 0);
}

#[tokio::test]
async fn test_operations_on_one_environment_run_in_arrival_order() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create should succeed");
    h.runtime.set_latency(Duration::from_millis(2));

    let restart = tokio::spawn({
        let controller = h.controller.clone();
        let id = env.id;
        async move { controller.restart(&id, &ctx()).await }
    });
    tokio::task::yield_now().await;
    let stop = tokio::spawn({
        let controller = h.controller.clone();
        let id = env.id;
        async move { controller.stop(&id, false, &ctx()).await }
    });

    restart.await.expect("join").expect("restart");
    let stopped = stop.await.expect("join").expect("stop");

    assert_eq!(stopped.phase, Phase::Stopped);
    assert_eq!(h.runtime.status_of("api"), Some(ContainerStatus::Stopped));
    let last_start = h.runtime.last_position(RuntimeOp::Start, "db");
    let last_stop = h.runtime.last_position(RuntimeOp::StopGraceful, "db");
    assert!(last_start < last_stop);
}

#[tokio::test]
async fn test_invalid_specification_is_rejected_without_side_effects() {
    let h = harness().await;
    let mut spec = three_tier();
    spec.name = String::new();

    let err = h
        .controller
        .create(spec, &ctx())
        .await
        .expect_err("empty name is invalid");
    match err {
        LifecycleError::Validation(e) => assert!(e.has_field("name")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(h.store.is_empty());
    assert_eq!(h.runtime.container_count(), 0);
}

#[tokio::test]
async fn test_create_without_runtime_connection_fails_fast() {
    let h = unstarted_harness(LifecycleConfig::default());

    let err = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect_err("not connected");
    assert!(matches!(err, LifecycleError::Connectivity(_)));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_start_is_rejected_while_pending() {
    let h = harness().await;
    use envsched_store::EnvironmentStore;
    let pending = h
        .store
        .insert(envsched_types::Environment::new(three_tier()))
        .await
        .expect("insert");

    let err = h
        .controller
        .start(&pending.id, &ctx())
        .await
        .expect_err("pending environments cannot be started");
    assert!(matches!(err, LifecycleError::Conflict(_)));
}

#[tokio::test]
async fn test_list_filters_by_label_and_pages() {
    let h = harness().await;
    for team in ["a", "b", "a", "a"] {
        h.controller
            .create(single_service().with_label("team", team), &ctx())
            .await
            .expect("create");
    }

    let mut labels = BTreeMap::new();
    labels.insert("team".to_string(), "a".to_string());

    let first = h
        .controller
        .list(ListRequest {
            page_size: Some(2),
            page_token: None,
            labels: labels.clone(),
        })
        .await
        .expect("first page");
    assert_eq!(first.environments.len(), 2);
    let token = first.next_page_token.expect("more pages");

    let second = h
        .controller
        .list(ListRequest {
            page_size: Some(2),
            page_token: Some(token),
            labels,
        })
        .await
        .expect("second page");
    assert_eq!(second.environments.len(), 1);
    assert!(second.next_page_token.is_none());

    let err = h
        .controller
        .list(ListRequest {
            page_token: Some("garbage".to_string()),
            ..ListRequest::default()
        })
        .await
        .expect_err("bad token");
    assert!(matches!(err, LifecycleError::Validation(_)));
}

#[tokio::test]
async fn test_lock_entries_do_not_accumulate() {
    let h = harness().await;
    for _ in 0..1000 {
        let id = envsched_types::EnvironmentId::generate();
        let err = h
            .controller
            .start(&id, &ctx())
            .await
            .expect_err("unknown environment");
        assert!(matches!(err, LifecycleError::NotFound(_)));
        h.controller.delete(&id, &ctx()).await.expect("nothing to delete");
    }
    assert_eq!(h.controller.busy_environments(), 0);

    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");
    h.controller.stop(&env.id, false, &ctx()).await.expect("stop");
    assert_eq!(h.controller.busy_environments(), 0);
    h.controller.delete(&env.id, &ctx()).await.expect("delete");
    h.controller.delete(&env.id, &ctx()).await.expect("second delete");
    assert_eq!(h.controller.busy_environments(), 0);
}
