#![allow(dead_code)]

use envsched_connection::{ConnectionSupervisor, SupervisorConfig};
use envsched_lifecycle::{EnvironmentController, LifecycleConfig, OperationContext};
use envsched_runtime::InMemoryRuntime;
use envsched_store::InMemoryEnvironmentStore;
use envsched_types::{
    ApplicationStack, BackendConfig, ContainerConfig, DatabaseConfig, EnvironmentSpecification,
    FrontendConfig, HealthCheck,
};
use std::sync::Arc;

pub struct Harness {
    pub runtime: InMemoryRuntime,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub store: Arc<InMemoryEnvironmentStore>,
    pub controller: Arc<EnvironmentController>,
}

pub async fn harness() -> Harness {
    harness_with(LifecycleConfig::default()).await
}

pub async fn harness_with(config: LifecycleConfig) -> Harness {
    let harness = unstarted_harness(config);
    harness
        .supervisor
        .start()
        .await
        .expect("supervisor should connect");
    harness
}

/// A harness whose supervisor has never connected.
pub fn unstarted_harness(config: LifecycleConfig) -> Harness {
    let runtime = InMemoryRuntime::new();
    let supervisor = ConnectionSupervisor::new(
        Arc::new(runtime.clone()),
        SupervisorConfig {
            reconnect_backoff_secs: 0,
            ..SupervisorConfig::default()
        },
    );
    let store = Arc::new(InMemoryEnvironmentStore::new());
    let controller = Arc::new(EnvironmentController::new(
        Arc::clone(&supervisor),
        store.clone(),
        config,
    ));

    Harness {
        runtime,
        supervisor,
        store,
        controller,
    }
}

pub fn ctx() -> OperationContext {
    OperationContext::background()
}

/// Database `db`, backend `api`, frontend `web`.
pub fn three_tier() -> EnvironmentSpecification {
    EnvironmentSpecification::new("s1", three_tier_stack())
}

pub fn three_tier_stack() -> ApplicationStack {
    ApplicationStack::new("shop", "1.0")
        .with_database(DatabaseConfig::new(ContainerConfig::new("db", "postgres:16")))
        .with_backend(BackendConfig::new(
            ContainerConfig::new("api", "node:18").with_env("PORT", "3000"),
        ))
        .with_frontend(FrontendConfig::new(
            ContainerConfig::new("web", "nginx:1.25").with_port(80, 8080),
        ))
}

/// One additional service `worker`.
pub fn single_service() -> EnvironmentSpecification {
    EnvironmentSpecification::new(
        "solo",
        ApplicationStack::new("solo", "1.0")
            .with_service("worker", ContainerConfig::new("worker", "busybox:1.36")),
    )
}

pub fn health_check(retries: u32, start_period_seconds: u32) -> HealthCheck {
    HealthCheck {
        command: vec!["pg_isready".to_string()],
        interval_seconds: 1,
        timeout_seconds: 1,
        retries,
        start_period_seconds,
    }
}

/// Three-tier stack whose database carries a health check.
pub fn three_tier_with_db_check(check: HealthCheck) -> EnvironmentSpecification {
    let mut spec = three_tier();
    if let Some(db) = spec.application_stack.database.as_mut() {
        db.container.health_check = Some(check);
    }
    spec
}
