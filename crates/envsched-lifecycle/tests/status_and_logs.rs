mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use envsched_connection::ConnectionState;
use envsched_lifecycle::{LifecycleError, LogRequest, OperationContext, OverallHealth};
use envsched_types::ContainerStatus;
use futures::StreamExt;
use tokio::sync::watch;

#[tokio::test]
async fn test_status_reflects_live_container_states() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");

    let status = h.controller.status(&env.id, &ctx()).await.expect("status");
    assert_eq!(status.health, OverallHealth::Healthy);
    let names: Vec<&str> = status.containers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["db", "api", "web"]);

    h.runtime.crash("api", 3);
    h.runtime.lose_container("web");
    let status = h.controller.status(&env.id, &ctx()).await.expect("status");

    assert_eq!(status.health, OverallHealth::Degraded);
    assert_eq!(status.containers[0].status, ContainerStatus::Running);
    assert_eq!(status.containers[1].status, ContainerStatus::Exited { code: 3 });
    assert_eq!(status.containers[2].status, ContainerStatus::Missing);
}

#[tokio::test]
async fn test_status_is_unknown_while_runtime_is_unreachable() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");

    h.runtime.set_outage(true);
    assert_eq!(h.supervisor.check_now().await, ConnectionState::Degraded);

    let status = h.controller.status(&env.id, &ctx()).await.expect("status");
    assert_eq!(status.health, OverallHealth::Unknown);
    assert!(status
        .containers
        .iter()
        .all(|c| c.status == ContainerStatus::Unknown));
}

#[tokio::test]
async fn test_logs_honour_tail_and_since() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");
    let now = Utc::now();
    h.runtime
        .push_log_at("api", now - ChronoDuration::minutes(10), "booting");
    h.runtime
        .push_log_at("api", now - ChronoDuration::minutes(1), "listening");
    h.runtime.push_log_at("api", now, "GET /health");
    h.runtime.push_log("db", "ready");

    let request = LogRequest {
        container_name: Some("api".to_string()),
        tail_lines: Some(2),
        ..LogRequest::default()
    };
    let entries: Vec<_> = h
        .controller
        .logs(&env.id, request, &ctx())
        .await
        .expect("logs")
        .collect()
        .await;
    let messages: Vec<String> = entries
        .into_iter()
        .map(|e| e.expect("entry").message)
        .collect();
    assert_eq!(messages, vec!["listening", "GET /health"]);

    let request = LogRequest {
        container_name: Some("api".to_string()),
        since: Some(now - ChronoDuration::minutes(5)),
        ..LogRequest::default()
    };
    let entries: Vec<_> = h
        .controller
        .logs(&env.id, request, &ctx())
        .await
        .expect("logs")
        .collect()
        .await;
    assert_eq!(entries.len(), 2);
    let first = entries[0].as_ref().expect("entry");
    assert_eq!(first.container_name, "api");
}

#[tokio::test]
async fn test_logs_need_a_container_name_for_multi_container_environments() {
    let h = harness().await;
    let env = h
        .controller
        .create(three_tier(), &ctx())
        .await
        .expect("create");

    let err = h
        .controller
        .logs(&env.id, LogRequest::default(), &ctx())
        .await
        .err()
        .expect("name required");
    assert!(matches!(err, LifecycleError::Validation(_)));

    let err = h
        .controller
        .logs(
            &env.id,
            LogRequest {
                container_name: Some("nope".to_string()),
                ..LogRequest::default()
            },
            &ctx(),
        )
        .await
        .err()
        .expect("unknown container");
    assert!(matches!(err, LifecycleError::NotFound(_)));
}

#[tokio::test]
async fn test_single_container_environment_defaults_the_name() {
    let h = harness().await;
    let env = h
        .controller
        .create(single_service(), &ctx())
        .await
        .expect("create");
    h.runtime.push_log("worker", "tick");

    let entries: Vec<_> = h
        .controller
        .logs(&env.id, LogRequest::default(), &ctx())
        .await
        .expect("logs")
        .collect()
        .await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].as_ref().expect("entry").container_name, "worker");
}

#[tokio::test]
async fn test_followed_logs_end_when_the_environment_is_deleted() {
    let h = harness().await;
    let env = h
        .controller
        .create(single_service(), &ctx())
        .await
        .expect("create");
    h.runtime.push_log("worker", "before");

    let stream = h
        .controller
        .logs(
            &env.id,
            LogRequest {
                follow: true,
                ..LogRequest::default()
            },
            &ctx(),
        )
        .await
        .expect("logs");
    let reader = tokio::spawn(async move {
        stream
            .map(|e| e.expect("entry").message)
            .collect::<Vec<String>>()
            .await
    });

    h.runtime.push_log("worker", "after");
    h.controller.delete(&env.id, &ctx()).await.expect("delete");

    let messages = reader.await.expect("join");
    assert_eq!(messages, vec!["before", "after"]);
}

#[tokio::test]
async fn test_followed_logs_end_on_cancellation() {
    let h = harness().await;
    let env = h
        .controller
        .create(single_service(), &ctx())
        .await
        .expect("create");
    let (cancel, cancelled) = watch::channel(false);
    let ctx = OperationContext::background().with_cancellation(cancelled);

    let stream = h
        .controller
        .logs(
            &env.id,
            LogRequest {
                follow: true,
                ..LogRequest::default()
            },
            &ctx,
        )
        .await
        .expect("logs");
    let reader = tokio::spawn(async move { stream.count().await });

    h.runtime.push_log("worker", "one");
    tokio::task::yield_now().await;
    cancel.send(true).expect("stream is listening");

    assert!(reader.await.expect("join") <= 1);
}
