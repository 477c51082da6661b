mod common;

use common::*;
use envsched_connection::ConnectionState;
use envsched_lifecycle::{CompensationOutcome, LifecycleConfig, LifecycleError, OperationContext};
use envsched_runtime::RuntimeOp;
use envsched_types::{ContainerStatus, Phase};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn test_failed_start_tears_down_created_containers_in_reverse() {
    let h = harness().await;
    h.runtime.fail_always(RuntimeOp::Start, "web");

    let err = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect_err("web cannot start");
    let failure = err.as_partial_failure().expect("partial failure").clone();

    assert_eq!(failure.step_index, 2);
    assert_eq!(failure.step, "start web");
    let compensated: Vec<&str> = failure
        .compensations
        .iter()
        .map(|c| c.container.as_str())
        .collect();
    assert_eq!(compensated, vec!["web", "api", "db"]);
    assert!(failure
        .compensations
        .iter()
        .all(|c| c.outcome == CompensationOutcome::Succeeded));

    assert_eq!(h.runtime.container_count(), 0);
    let env = h
        .controller
        .get(&failure.environment_id)
        .await
        .expect("record is kept");
    assert_eq!(env.phase, Phase::Failed);
    assert!(env.last_error.as_deref().unwrap_or("").contains("start web"));
    assert!(env.container_ids().is_empty());
}

#[tokio::test]
async fn test_failed_compensation_is_reported() {
    let h = harness().await;
    h.runtime.fail_always(RuntimeOp::Start, "api");
    h.runtime.fail_always(RuntimeOp::Delete, "db");

    let err = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect_err("api cannot start");
    let failure = err.as_partial_failure().expect("partial failure");

    assert_eq!(failure.step, "start api");
    assert_eq!(failure.compensations.len(), 2);
    assert_eq!(failure.compensations[0].outcome, CompensationOutcome::Succeeded);
    assert!(matches!(
        failure.compensations[1].outcome,
        CompensationOutcome::Failed { .. }
    ));
    // db survives its failed teardown and stays on the record
    assert!(h.runtime.container_id("db").is_some());
    let env = h.controller.get(&failure.environment_id).await.expect("get");
    assert!(env.container_id("db").is_some());
    assert!(env.container_id("api").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_database_stops_the_plan() {
    let h = harness().await;
    h.runtime.script_probe("db", [false]);

    let err = h
        .controller
        .create(three_tier_with_db_check(health_check(2, 0)), &ctx())
        .await
        .expect_err("db never becomes healthy");
    let failure = err.as_partial_failure().expect("partial failure");

    assert_eq!(failure.step_index, 0);
    assert_eq!(failure.step, "health check db");
    assert!(failure.cause.contains("unhealthy"));
    assert!(h.runtime.first_call_on("api").is_none());
    assert_eq!(h.runtime.container_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_failures_inside_start_period_do_not_count() {
    let h = harness().await;
    h.runtime
        .script_probe("db", [false, false, false, false, true, true]);

    let env = h
        .controller
        .create(three_tier_with_db_check(health_check(2, 10)), &ctx())
        .await
        .expect("db recovers within its start period");
    assert_eq!(env.phase, Phase::Running);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_leaves_environment_failed_without_rollback() {
    let h = harness().await;
    h.runtime.script_probe("db", [false]);
    let (cancel, cancelled) = watch::channel(false);

    let create = tokio::spawn({
        let controller = h.controller.clone();
        let ctx = OperationContext::background().with_cancellation(cancelled);
        async move {
            controller
                .create(three_tier_with_db_check(health_check(3, 3600)), &ctx)
                .await
        }
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.send(true).expect("create is listening");

    let err = create.await.expect("join").expect_err("cancelled");
    let failure = err.as_partial_failure().expect("partial failure");
    assert_eq!(failure.cause, "cancelled");
    assert!(failure.compensations.is_empty());

    let env = h.controller.get(&failure.environment_id).await.expect("get");
    assert_eq!(env.phase, Phase::Failed);
    // Committed steps are not rolled back
    assert_eq!(h.runtime.status_of("db"), Some(ContainerStatus::Running));
    assert!(h.runtime.first_call_on("api").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_a_slow_plan() {
    let h = harness().await;
    h.runtime.script_probe("db", [false]);
    let ctx = OperationContext::background().with_timeout(Duration::from_secs(30));

    let err = h
        .controller
        .create(three_tier_with_db_check(health_check(3, 3600)), &ctx)
        .await
        .expect_err("deadline passes first");
    let failure = err.as_partial_failure().expect("partial failure");
    assert_eq!(failure.cause, "deadline exceeded");
    assert_eq!(failure.step, "health check db");
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_escalates_to_kill_after_grace_period() {
    let h = harness_with(LifecycleConfig {
        stop_grace_period_secs: 10,
        ..LifecycleConfig::default()
    })
    .await;
    h.runtime.ignore_graceful_stop("api");
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");

    let stopped = h
        .controller
        .stop(&env.id, false, &ctx())
        .await
        .expect("stop escalates");

    assert_eq!(stopped.phase, Phase::Stopped);
    assert_eq!(
        h.runtime.status_of("api"),
        Some(ContainerStatus::Exited { code: 137 })
    );
    assert_eq!(h.runtime.status_of("web"), Some(ContainerStatus::Stopped));
    let killed: Vec<String> = h
        .runtime
        .calls(RuntimeOp::Kill)
        .into_iter()
        .map(|c| c.target)
        .collect();
    assert_eq!(killed, vec!["api".to_string()]);
}

#[tokio::test]
async fn test_stop_attempts_every_container_and_reports_first_failure() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");
    h.runtime.fail_always(RuntimeOp::StopGraceful, "api");
    h.runtime.fail_always(RuntimeOp::Kill, "api");

    let err = h
        .controller
        .stop(&env.id, false, &ctx())
        .await
        .expect_err("api cannot be stopped");
    let failure = err.as_partial_failure().expect("partial failure");
    assert_eq!(failure.step, "stop api");
    assert_eq!(failure.step_index, 1);

    // db was still stopped after api failed
    assert_eq!(h.runtime.status_of("db"), Some(ContainerStatus::Stopped));
    let env = h.controller.get(&env.id).await.expect("get");
    assert_eq!(env.phase, Phase::Failed);

    // A failed environment can be stopped once the runtime cooperates
    h.runtime.clear_faults();
    let stopped = h.controller.stop(&env.id, false, &ctx()).await.expect("stop");
    assert_eq!(stopped.phase, Phase::Stopped);
}

#[tokio::test]
async fn test_restart_recreates_a_lost_container() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");
    let lost = h.runtime.container_id("api").expect("api exists");
    let db = h.runtime.container_id("db");
    h.runtime.lose_container("api");

    let restarted = h.controller.restart(&env.id, &ctx()).await.expect("restart");

    assert_eq!(restarted.phase, Phase::Running);
    let replacement = h.runtime.container_id("api").expect("api recreated");
    assert_ne!(replacement, lost);
    assert_eq!(restarted.container_id("api"), Some(&replacement));
    assert_eq!(h.runtime.container_id("db"), db);
}

#[tokio::test]
async fn test_start_restarts_crashed_containers_in_place() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");
    let api = h.runtime.container_id("api");
    h.runtime.crash("api", 1);

    let started = h.controller.start(&env.id, &ctx()).await.expect("start");

    assert_eq!(started.phase, Phase::Running);
    assert_eq!(h.runtime.container_id("api"), api);
    assert_eq!(h.runtime.status_of("api"), Some(ContainerStatus::Running));
}

#[tokio::test]
async fn test_failed_delete_can_be_retried() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");
    h.runtime.fail_always(RuntimeOp::Delete, "api");

    let err = h
        .controller
        .delete(&env.id, &ctx())
        .await
        .expect_err("api cannot be deleted");
    assert_eq!(err.as_partial_failure().expect("partial failure").step, "delete api");
    assert_eq!(h.controller.get(&env.id).await.expect("kept").phase, Phase::Failed);
    assert!(h.runtime.container_id("db").is_none());

    h.runtime.clear_faults();
    h.controller.delete(&env.id, &ctx()).await.expect("retry");
    assert_eq!(h.runtime.container_count(), 0);
    assert!(h.controller.get(&env.id).await.is_err());
}

#[tokio::test]
async fn test_operations_fail_fast_while_runtime_is_unreachable() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");

    h.runtime.set_outage(true);
    assert_eq!(h.supervisor.check_now().await, ConnectionState::Degraded);
    h.runtime.clear_journal();

    let err = h
        .controller
        .stop(&env.id, false, &ctx())
        .await
        .expect_err("not connected");
    assert!(matches!(err, LifecycleError::Connectivity(_)));
    assert_eq!(err.code(), "CONNECTIVITY_ERROR");
    assert_eq!(h.controller.get(&env.id).await.expect("get").phase, Phase::Running);
    assert!(h.runtime.journal().is_empty());

    h.runtime.set_outage(false);
    assert_eq!(h.supervisor.check_now().await, ConnectionState::Connected);
    h.controller
        .stop(&env.id, false, &ctx())
        .await
        .expect("stop after recovery");
}
