//! Step executor
//!
//! Runs individual container steps against the runtime. Every step acquires
//! a fresh handle from the supervisor and every runtime call is bounded by
//! the operation context.

use crate::config::LifecycleConfig;
use crate::context::{Interrupted, OperationContext};
use crate::error::{Compensation, CompensationOutcome};
use crate::plan::PlannedContainer;
use envsched_connection::{ConnectionError, ConnectionSupervisor, RuntimeHandle};
use envsched_runtime::{ContainerOptions, RuntimeError, StopMode};
use envsched_types::{ContainerId, ContainerStatus, EnvironmentId, HealthCheck};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// Runtime action performed by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    PullImage,
    Create,
    Start,
    HealthCheck,
    Stop,
    Delete,
    SetLabels,
    Inspect,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepAction::PullImage => "pull image for",
            StepAction::Create => "create",
            StepAction::Start => "start",
            StepAction::HealthCheck => "health check",
            StepAction::Stop => "stop",
            StepAction::Delete => "delete",
            StepAction::SetLabels => "relabel",
            StepAction::Inspect => "inspect",
        };
        f.write_str(name)
    }
}

/// Why a step failed
#[derive(Debug, Clone)]
pub enum StepError {
    Connectivity(ConnectionError),
    Runtime(RuntimeError),
    Unhealthy(String),
    Interrupted(Interrupted),
}

impl StepError {
    pub fn interrupted(&self) -> Option<Interrupted> {
        match self {
            StepError::Interrupted(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StepError::Runtime(e) if e.is_not_found())
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Connectivity(e) => write!(f, "{}", e),
            StepError::Runtime(e) => write!(f, "{}", e),
            StepError::Unhealthy(reason) => write!(f, "unhealthy: {}", reason),
            StepError::Interrupted(i) => write!(f, "{}", i),
        }
    }
}

/// A failed step: what was attempted and why it failed
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub action: StepAction,
    pub error: StepError,
}

impl StepFailure {
    pub fn new(action: StepAction, error: StepError) -> Self {
        Self { action, error }
    }

    /// Step label for error reports, e.g. `start api`.
    pub fn step_name(&self, container: &str) -> String {
        format!("{} {}", self.action, container)
    }
}

pub(crate) type StepResult<T> = std::result::Result<T, StepError>;

/// Executes container steps within one operation context
pub(crate) struct Executor<'a> {
    supervisor: &'a ConnectionSupervisor,
    config: &'a LifecycleConfig,
    ctx: &'a OperationContext,
}

impl<'a> Executor<'a> {
    pub fn new(
        supervisor: &'a ConnectionSupervisor,
        config: &'a LifecycleConfig,
        ctx: &'a OperationContext,
    ) -> Self {
        Self {
            supervisor,
            config,
            ctx,
        }
    }

    pub fn ctx(&self) -> &OperationContext {
        self.ctx
    }

    fn acquire(&self) -> StepResult<RuntimeHandle> {
        self.supervisor.acquire().map_err(StepError::Connectivity)
    }

    async fn guard<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, RuntimeError>>,
    ) -> StepResult<T> {
        match self.ctx.run(call).await {
            Ok(result) => result.map_err(StepError::Runtime),
            Err(interrupted) => Err(StepError::Interrupted(interrupted)),
        }
    }

    /// Pull the image unless the runtime already has it.
    pub async fn ensure_image(&self, image: &str) -> StepResult<()> {
        let rt = self.acquire()?;
        if self.guard(rt.has_image(image)).await? {
            return Ok(());
        }
        debug!(image = %image, "Pulling image");
        self.guard(rt.pull_image(image)).await
    }

    /// Create a runtime container under a fresh ID.
    pub async fn create(
        &self,
        environment_id: &EnvironmentId,
        container: &PlannedContainer,
        labels: &BTreeMap<String, String>,
    ) -> StepResult<ContainerId> {
        let id = ContainerId::generate(environment_id, &container.name);
        let options = ContainerOptions::from_config(&container.config).with_labels(labels);

        let rt = self.acquire()?;
        self.guard(rt.create_container(&id, &options)).await?;
        Ok(id)
    }

    pub async fn start(&self, id: &ContainerId) -> StepResult<()> {
        let rt = self.acquire()?;
        self.guard(rt.start_task(id)).await
    }

    /// Stop a task. A graceful stop that errors or outlives the grace period
    /// is escalated to a kill.
    pub async fn stop(&self, id: &ContainerId, force: bool) -> StepResult<()> {
        if !force {
            let rt = self.acquire()?;
            let grace = self.config.stop_grace_period();
            match self.ctx.run(timeout(grace, rt.stop_task(id, StopMode::Graceful))).await {
                Err(interrupted) => return Err(StepError::Interrupted(interrupted)),
                Ok(Ok(Ok(()))) => return Ok(()),
                Ok(Ok(Err(e))) if e.is_not_found() => return Err(StepError::Runtime(e)),
                Ok(Ok(Err(e))) => {
                    warn!(container_id = %id, error = %e, "Graceful stop failed, killing");
                }
                Ok(Err(_)) => {
                    warn!(
                        container_id = %id,
                        grace_secs = grace.as_secs(),
                        "Grace period elapsed, killing"
                    );
                }
            }
        }

        let rt = self.acquire()?;
        self.guard(rt.stop_task(id, StopMode::Kill)).await
    }

    pub async fn delete(&self, id: &ContainerId) -> StepResult<()> {
        let rt = self.acquire()?;
        self.guard(rt.delete_container(id)).await
    }

    pub async fn set_labels(
        &self,
        id: &ContainerId,
        labels: &BTreeMap<String, String>,
    ) -> StepResult<()> {
        let rt = self.acquire()?;
        self.guard(rt.set_labels(id, labels)).await
    }

    /// Live status; a missing container is reported as `Missing`.
    pub async fn status(&self, id: &ContainerId) -> StepResult<ContainerStatus> {
        let rt = self.acquire()?;
        match self.guard(rt.container_status(id)).await {
            Err(e) if e.is_not_found() => Ok(ContainerStatus::Missing),
            other => other,
        }
    }

    pub async fn list(&self) -> StepResult<Vec<ContainerId>> {
        let rt = self.acquire()?;
        self.guard(rt.list_containers()).await
    }

    /// Poll a health check until `retries` consecutive successes or failures.
    ///
    /// Failures inside the start period do not count. The whole wait is
    /// bounded by the configured health wait timeout.
    pub async fn wait_healthy(&self, id: &ContainerId, check: &HealthCheck) -> StepResult<()> {
        let started = Instant::now();
        let deadline = started + self.config.health_wait_timeout();
        let mut successes = 0u32;
        let mut failures = 0u32;

        loop {
            let rt = self.acquire()?;
            let passed = match self
                .guard(rt.exec_probe(id, &check.command, check.timeout()))
                .await
            {
                Ok(passed) => passed,
                Err(StepError::Runtime(e)) if !e.is_not_found() => {
                    debug!(container_id = %id, error = %e, "Health probe errored");
                    false
                }
                Err(e) => return Err(e),
            };
            drop(rt);

            if passed {
                successes += 1;
                failures = 0;
                if successes >= check.retries {
                    return Ok(());
                }
            } else {
                successes = 0;
                if started.elapsed() >= check.start_period() {
                    failures += 1;
                    if failures >= check.retries {
                        return Err(StepError::Unhealthy(format!(
                            "health check failed {} consecutive times",
                            failures
                        )));
                    }
                }
            }

            if Instant::now() + check.interval() > deadline {
                return Err(StepError::Unhealthy(format!(
                    "not healthy within {}s",
                    self.config.health_wait_timeout_secs
                )));
            }
            self.ctx
                .run(sleep(check.interval()))
                .await
                .map_err(StepError::Interrupted)?;
        }
    }

    /// Kill and delete a container, treating "already gone" as success.
    pub async fn teardown(&self, id: &ContainerId) -> StepResult<()> {
        match self.stop(id, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }
        match self.delete(id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Tear down containers in the given order, recording each attempt.
    pub async fn compensate(&self, targets: &[(String, ContainerId)]) -> Vec<Compensation> {
        let mut compensations = Vec::with_capacity(targets.len());
        for (name, id) in targets {
            let outcome = match self.teardown(id).await {
                Ok(()) => CompensationOutcome::Succeeded,
                Err(e) => {
                    warn!(container = %name, error = %e, "Compensation failed");
                    CompensationOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            compensations.push(Compensation {
                container: name.clone(),
                action: "kill and delete".to_string(),
                outcome,
            });
        }
        compensations
    }
}
