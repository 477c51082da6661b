//! Environment lifecycle controller
//!
//! Mutating operations on one environment are serialized through a
//! per-environment lock and run as ordered plans of container steps. Every
//! step's outcome is persisted before the next step begins, so the stored
//! record always reflects what has been done to the runtime.

use crate::config::LifecycleConfig;
use crate::context::OperationContext;
use crate::error::{Compensation, CompensationOutcome, LifecycleError, PartialFailure, Result};
use crate::executor::{Executor, StepAction, StepError, StepFailure};
use crate::locks::{EnvironmentLock, LockRegistry};
use crate::page::{paginate, EnvironmentPage, ListRequest, PageKey};
use crate::plan::{
    bring_up_order, container_labels, diff, teardown_order, ContainerChange, PlannedContainer,
    UpdatePlan,
};
use crate::status::{summarize, ContainerStatusReport, EnvironmentStatus};
use chrono::Utc;
use envsched_connection::ConnectionSupervisor;
use envsched_store::EnvironmentStore;
use envsched_types::{
    ContainerId, ContainerStatus, Environment, EnvironmentId, EnvironmentSpecification, Phase,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of updating one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Succeeded,
    Failed { step: String, error: String },
}

/// Per-container result of an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerUpdateResult {
    pub name: String,
    pub change: ContainerChange,

    /// Runtime container after the update, if one exists
    pub container_id: Option<ContainerId>,

    pub outcome: UpdateOutcome,
}

/// Result of an update: the stored environment plus what happened to each container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub environment: Environment,
    pub results: Vec<ContainerUpdateResult>,
}

impl UpdateReport {
    pub fn all_succeeded(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.outcome == UpdateOutcome::Succeeded)
    }

    pub fn result(&self, name: &str) -> Option<&ContainerUpdateResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Drives environments through their lifecycle
pub struct EnvironmentController {
    supervisor: Arc<ConnectionSupervisor>,
    store: Arc<dyn EnvironmentStore>,
    locks: LockRegistry,
    config: LifecycleConfig,
}

impl EnvironmentController {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        store: Arc<dyn EnvironmentStore>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            supervisor,
            store,
            locks: LockRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Environments with an operation running or queued.
    pub fn busy_environments(&self) -> usize {
        self.locks.len()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[instrument(skip(self), fields(environment_id = %id))]
    pub async fn get(&self, id: &EnvironmentId) -> Result<Environment> {
        self.load(id).await
    }

    #[instrument(skip(self, request))]
    pub async fn list(&self, request: ListRequest) -> Result<EnvironmentPage> {
        let after = request
            .page_token
            .as_deref()
            .map(PageKey::decode)
            .transpose()?;
        let page_size = self.config.page_size(request.page_size);
        let environments = self.store.list().await?;
        Ok(paginate(environments, &request.labels, after, page_size))
    }

    /// Live status of every container. Takes no lock and never fails on a
    /// runtime problem: unreachable containers are reported as `Unknown`.
    #[instrument(skip(self, ctx), fields(environment_id = %id))]
    pub async fn status(
        &self,
        id: &EnvironmentId,
        ctx: &OperationContext,
    ) -> Result<EnvironmentStatus> {
        let env = self.load(id).await?;

        let mut containers = Vec::new();
        for container in bring_up_order(&env.spec) {
            let container_id = env.container_id(&container.name).cloned();
            let status = match &container_id {
                Some(cid) => self.query_status(cid, ctx).await,
                None => ContainerStatus::Missing,
            };
            containers.push(ContainerStatusReport {
                name: container.name,
                role: container.role,
                container_id,
                status,
            });
        }

        Ok(EnvironmentStatus {
            environment_id: env.id,
            phase: env.phase,
            health: summarize(&containers),
            containers,
            checked_at: Utc::now(),
        })
    }

    async fn query_status(&self, id: &ContainerId, ctx: &OperationContext) -> ContainerStatus {
        let Ok(rt) = self.supervisor.acquire() else {
            return ContainerStatus::Unknown;
        };
        let query = timeout(self.config.status_query_timeout(), rt.container_status(id));
        match ctx.run(query).await {
            Ok(Ok(Ok(status))) => status,
            Ok(Ok(Err(e))) if e.is_not_found() => ContainerStatus::Missing,
            Ok(Ok(Err(e))) => {
                debug!(container_id = %id, error = %e, "Status query failed");
                ContainerStatus::Unknown
            }
            Ok(Err(_)) => {
                warn!(container_id = %id, "Status query timed out");
                ContainerStatus::Unknown
            }
            Err(_) => ContainerStatus::Unknown,
        }
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create an environment and bring its containers up in dependency order.
    ///
    /// On a failed step every container created so far is torn down in
    /// reverse order and the environment is left `Failed`.
    #[instrument(skip(self, spec, ctx), fields(name = %spec.name))]
    pub async fn create(
        &self,
        spec: EnvironmentSpecification,
        ctx: &OperationContext,
    ) -> Result<Environment> {
        spec.validate()?;
        self.supervisor.acquire()?;

        let env = Environment::new(spec);
        let id = env.id;
        // A fresh ID cannot be contended
        let _guard = self.locks.lock(id).await;
        let mut env = self.store.insert(env).await?;

        info!(environment_id = %id, "Creating environment");
        env.transition(Phase::Creating)?;
        self.save(&mut env).await?;

        let exec = self.executor(ctx);
        let plan = bring_up_order(&env.spec);
        for (index, container) in plan.iter().enumerate() {
            match self.bring_up(&exec, &mut env, container).await {
                Ok(()) => self.save(&mut env).await?,
                Err(failure) => {
                    let compensations = if failure.error.interrupted().is_some() {
                        Vec::new()
                    } else {
                        self.compensate(&exec, &mut env, &plan[..=index]).await
                    };
                    let step = failure.step_name(&container.name);
                    return Err(self
                        .abort(&mut env, index, step, &failure.error, compensations)
                        .await);
                }
            }
        }

        env.transition(Phase::Running)?;
        self.save(&mut env).await?;
        info!(environment_id = %id, containers = plan.len(), "Environment running");
        Ok(env)
    }

    /// Tear down the created containers of `created`, last first.
    async fn compensate(
        &self,
        exec: &Executor<'_>,
        env: &mut Environment,
        created: &[PlannedContainer],
    ) -> Vec<Compensation> {
        let targets: Vec<(String, ContainerId)> = created
            .iter()
            .rev()
            .filter_map(|c| env.container_id(&c.name).map(|id| (c.name.clone(), id.clone())))
            .collect();

        let compensations = exec.compensate(&targets).await;
        for compensation in &compensations {
            if compensation.outcome == CompensationOutcome::Succeeded {
                if let Some(record) = env.containers.get_mut(&compensation.container) {
                    record.clear();
                }
            }
        }
        compensations
    }

    // ------------------------------------------------------------------
    // Start / stop / restart
    // ------------------------------------------------------------------

    /// Start every non-running container in dependency order. Containers
    /// that no longer exist in the runtime are recreated from the stored
    /// specification.
    #[instrument(skip(self, ctx), fields(environment_id = %id))]
    pub async fn start(&self, id: &EnvironmentId, ctx: &OperationContext) -> Result<Environment> {
        let _guard = self.lock(*id, ctx).await?;
        let mut env = self.load(id).await?;
        ensure_settled(&env, "start")?;
        self.supervisor.acquire()?;

        info!("Starting environment");
        let exec = self.executor(ctx);
        let plan = bring_up_order(&env.spec);
        for (index, container) in plan.iter().enumerate() {
            if let Err(failure) = self.ensure_running(&exec, &mut env, container).await {
                let step = failure.step_name(&container.name);
                return Err(self
                    .abort(&mut env, index, step, &failure.error, Vec::new())
                    .await);
            }
            self.save(&mut env).await?;
        }

        if env.phase != Phase::Running {
            env.transition(Phase::Running)?;
            self.save(&mut env).await?;
        }
        Ok(env)
    }

    /// Stop every container in reverse dependency order.
    ///
    /// Each container is attempted even when an earlier one failed; the
    /// first failure is reported.
    #[instrument(skip(self, ctx), fields(environment_id = %id, force))]
    pub async fn stop(
        &self,
        id: &EnvironmentId,
        force: bool,
        ctx: &OperationContext,
    ) -> Result<Environment> {
        let _guard = self.lock(*id, ctx).await?;
        let mut env = self.load(id).await?;
        ensure_settled(&env, "stop")?;
        self.supervisor.acquire()?;

        info!("Stopping environment");
        let exec = self.executor(ctx);
        if let Some((index, step, error)) = self.stop_all(&exec, &mut env, force, 0).await {
            return Err(self.abort(&mut env, index, step, &error, Vec::new()).await);
        }

        if env.phase != Phase::Stopped {
            env.transition(Phase::Stopped)?;
        }
        self.save(&mut env).await?;
        Ok(env)
    }

    /// Stop, then start every container. Container identities are kept
    /// unless a container has to be recreated.
    #[instrument(skip(self, ctx), fields(environment_id = %id))]
    pub async fn restart(&self, id: &EnvironmentId, ctx: &OperationContext) -> Result<Environment> {
        let _guard = self.lock(*id, ctx).await?;
        let mut env = self.load(id).await?;
        ensure_settled(&env, "restart")?;
        self.supervisor.acquire()?;

        info!("Restarting environment");
        env.transition(Phase::Restarting)?;
        self.save(&mut env).await?;

        let exec = self.executor(ctx);
        if let Some((index, step, error)) = self.stop_all(&exec, &mut env, false, 0).await {
            return Err(self.abort(&mut env, index, step, &error, Vec::new()).await);
        }
        self.save(&mut env).await?;

        let plan = bring_up_order(&env.spec);
        let offset = plan.len();
        for (index, container) in plan.iter().enumerate() {
            if let Err(failure) = self.ensure_running(&exec, &mut env, container).await {
                return Err(self
                    .abort(
                        &mut env,
                        offset + index,
                        failure.step_name(&container.name),
                        &failure.error,
                        Vec::new(),
                    )
                    .await);
            }
            self.save(&mut env).await?;
        }

        env.transition(Phase::Running)?;
        self.save(&mut env).await?;
        Ok(env)
    }

    /// Stop all recorded containers in teardown order, best-effort.
    ///
    /// Returns the first failed step, if any. An interruption stops the
    /// pass immediately.
    async fn stop_all(
        &self,
        exec: &Executor<'_>,
        env: &mut Environment,
        force: bool,
        step_offset: usize,
    ) -> Option<(usize, String, StepError)> {
        let mut first_failure = None;

        for (index, container) in teardown_order(&env.spec).iter().enumerate() {
            let Some(cid) = env.container_id(&container.name).cloned() else {
                continue;
            };
            let record = env.record_mut(&container.name, &container.role);
            match exec.stop(&cid, force).await {
                Ok(()) => record.set_status(ContainerStatus::Stopped),
                Err(e) if e.is_not_found() => {
                    warn!(container = %container.name, "Container missing from runtime");
                    record.clear();
                }
                Err(e) => {
                    let step =
                        StepFailure::new(StepAction::Stop, e.clone()).step_name(&container.name);
                    if e.interrupted().is_some() {
                        return Some((step_offset + index, step, e));
                    }
                    warn!(container = %container.name, error = %e, "Stop failed");
                    first_failure.get_or_insert((step_offset + index, step, e));
                }
            }
        }

        first_failure
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply a new specification container by container.
    ///
    /// Containers whose image, command, arguments, environment, ports,
    /// volumes or resources changed are replaced; label and health check
    /// changes are applied in place. One container's failure does not stop
    /// the others. The environment ends `Running` when every container
    /// succeeded and `Failed` otherwise.
    #[instrument(skip(self, spec, ctx), fields(environment_id = %id))]
    pub async fn update(
        &self,
        id: &EnvironmentId,
        spec: EnvironmentSpecification,
        ctx: &OperationContext,
    ) -> Result<UpdateReport> {
        spec.validate()?;
        let _guard = self.lock(*id, ctx).await?;
        let mut env = self.load(id).await?;
        match env.phase {
            Phase::Running | Phase::Stopped | Phase::Failed => {}
            phase => {
                return Err(LifecycleError::Conflict(format!(
                    "cannot update environment {} while it is {}",
                    env.id, phase
                )))
            }
        }
        self.supervisor.acquire()?;

        let mut plan = diff(&env.spec, &spec);
        for (container, change) in plan.forward.iter_mut() {
            let stale = env
                .containers
                .get(&container.name)
                .is_some_and(|r| r.is_out_of_date());
            let kept = matches!(
                change,
                ContainerChange::Unchanged | ContainerChange::UpdatedInPlace
            );
            if stale && kept {
                *change = ContainerChange::Recreated;
            }
        }
        let removals = removal_targets(&env, &plan);
        info!(
            changed = plan
                .forward
                .iter()
                .filter(|(_, c)| *c != ContainerChange::Unchanged)
                .count(),
            removed = removals.len(),
            "Updating environment"
        );

        env.transition(Phase::Updating)?;
        for (container, change) in &plan.forward {
            if *change != ContainerChange::Unchanged {
                if let Some(record) = env.containers.get_mut(&container.name) {
                    record.out_of_date = record.container_id.is_some();
                }
            }
        }
        env.spec = spec;
        self.save(&mut env).await?;

        let exec = self.executor(ctx);
        let mut results = Vec::with_capacity(plan.forward.len() + removals.len());
        let mut step_index = 0;

        for (container, change) in &plan.forward {
            let outcome = match change {
                ContainerChange::Added => self.bring_up(&exec, &mut env, container).await,
                ContainerChange::Recreated => self.recreate(&exec, &mut env, container).await,
                ContainerChange::UpdatedInPlace => self.relabel(&exec, &mut env, container).await,
                ContainerChange::Unchanged | ContainerChange::Removed => {
                    self.ensure_running(&exec, &mut env, container).await
                }
            };
            match &outcome {
                Ok(()) => {
                    if let Some(record) = env.containers.get_mut(&container.name) {
                        record.out_of_date = false;
                    }
                }
                Err(failure) if failure.error.interrupted().is_some() => {
                    let step = failure.step_name(&container.name);
                    return Err(self
                        .abort(&mut env, step_index, step, &failure.error, Vec::new())
                        .await);
                }
                Err(_) => {}
            }
            results.push(update_result(&env, &container.name, *change, outcome));
            self.save(&mut env).await?;
            step_index += 1;
        }

        for name in &removals {
            let outcome = self.remove(&exec, &mut env, name).await;
            if let Err(failure) = &outcome {
                if failure.error.interrupted().is_some() {
                    let step = failure.step_name(name);
                    return Err(self
                        .abort(&mut env, step_index, step, &failure.error, Vec::new())
                        .await);
                }
            }
            results.push(update_result(&env, name, ContainerChange::Removed, outcome));
            self.save(&mut env).await?;
            step_index += 1;
        }

        let failed: Vec<&str> = results
            .iter()
            .filter(|r| r.outcome != UpdateOutcome::Succeeded)
            .map(|r| r.name.as_str())
            .collect();
        if failed.is_empty() {
            env.transition(Phase::Running)?;
        } else {
            warn!(failed = ?failed, "Update incomplete");
            env.fail(format!("update failed for: {}", failed.join(", ")));
        }
        self.save(&mut env).await?;

        Ok(UpdateReport {
            environment: env,
            results,
        })
    }

    /// Replace a container: stop and delete the old one, bring up a new one.
    /// A new container that fails to come up is torn down again.
    async fn recreate(
        &self,
        exec: &Executor<'_>,
        env: &mut Environment,
        container: &PlannedContainer,
    ) -> std::result::Result<(), StepFailure> {
        if let Some(old) = env.container_id(&container.name).cloned() {
            destroy(exec, &old, false).await?;
            env.record_mut(&container.name, &container.role).clear();
        }

        let failure = match self.bring_up(exec, env, container).await {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };
        if failure.error.interrupted().is_none() {
            if let Some(new) = env.container_id(&container.name).cloned() {
                match exec.teardown(&new).await {
                    Ok(()) => env.record_mut(&container.name, &container.role).clear(),
                    Err(e) => {
                        warn!(container_id = %new, error = %e, "Failed to remove replacement")
                    }
                }
            }
        }
        Err(failure)
    }

    /// Refresh labels on the existing container, then make sure it runs.
    async fn relabel(
        &self,
        exec: &Executor<'_>,
        env: &mut Environment,
        container: &PlannedContainer,
    ) -> std::result::Result<(), StepFailure> {
        let Some(cid) = env.container_id(&container.name).cloned() else {
            return self.bring_up(exec, env, container).await;
        };

        let labels = container_labels(&env.id, &env.spec, container);
        match exec.set_labels(&cid, &labels).await {
            Ok(()) => env.record_mut(&container.name, &container.role).out_of_date = false,
            Err(e) if e.is_not_found() => {
                env.record_mut(&container.name, &container.role).clear();
                return self.bring_up(exec, env, container).await;
            }
            Err(e) => return Err(StepFailure::new(StepAction::SetLabels, e)),
        }
        self.ensure_running(exec, env, container).await
    }

    /// Stop and delete a container that is gone from the specification.
    /// Its record is kept until the runtime container is gone.
    async fn remove(
        &self,
        exec: &Executor<'_>,
        env: &mut Environment,
        name: &str,
    ) -> std::result::Result<(), StepFailure> {
        if let Some(cid) = env.container_id(name).cloned() {
            destroy(exec, &cid, false).await?;
        }
        env.containers.remove(name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Stop and delete every container of an environment, then drop its
    /// record. Deleting an environment that does not exist succeeds.
    #[instrument(skip(self, ctx), fields(environment_id = %id))]
    pub async fn delete(&self, id: &EnvironmentId, ctx: &OperationContext) -> Result<()> {
        let _guard = self.lock(*id, ctx).await?;
        let Some(mut env) = self.store.get(id).await? else {
            debug!("Environment already gone");
            return Ok(());
        };
        self.supervisor.acquire()?;

        info!("Deleting environment");
        env.transition(Phase::Deleting)?;
        self.save(&mut env).await?;

        let exec = self.executor(ctx);
        let plan = teardown_order(&env.spec);
        let mut first_failure: Option<(usize, String, StepError)> = None;

        for (index, container) in plan.iter().enumerate() {
            let Some(cid) = env.container_id(&container.name).cloned() else {
                continue;
            };
            match destroy(&exec, &cid, false).await {
                Ok(()) => env.record_mut(&container.name, &container.role).clear(),
                Err(failure) => {
                    let step = failure.step_name(&container.name);
                    if failure.error.interrupted().is_some() {
                        return Err(self
                            .abort(&mut env, index, step, &failure.error, Vec::new())
                            .await);
                    }
                    warn!(container = %container.name, error = %failure.error, "Teardown failed");
                    first_failure.get_or_insert((index, step, failure.error));
                }
            }
            self.save(&mut env).await?;
        }

        // Containers the record lost track of still carry the environment's ID
        let sweep_index = plan.len();
        if first_failure.is_none() {
            if let Err(failure) = self.sweep(&exec, &env.id).await {
                first_failure = Some((
                    sweep_index,
                    format!("{} leftover containers", failure.action),
                    failure.error,
                ));
            }
        }

        if let Some((index, step, error)) = first_failure {
            return Err(self.abort(&mut env, index, step, &error, Vec::new()).await);
        }

        env.transition(Phase::Deleted)?;
        self.store.remove(id, env.revision).await?;
        info!("Environment deleted");
        Ok(())
    }

    /// Tear down runtime containers belonging to an environment, then
    /// confirm none remain.
    async fn sweep(
        &self,
        exec: &Executor<'_>,
        id: &EnvironmentId,
    ) -> std::result::Result<(), StepFailure> {
        let inspect = |e| StepFailure::new(StepAction::Inspect, e);

        for cid in exec.list().await.map_err(inspect)? {
            if cid.belongs_to(id) {
                warn!(container_id = %cid, "Removing untracked container");
                exec.teardown(&cid)
                    .await
                    .map_err(|e| StepFailure::new(StepAction::Delete, e))?;
            }
        }

        let remaining: Vec<String> = exec
            .list()
            .await
            .map_err(inspect)?
            .into_iter()
            .filter(|cid| cid.belongs_to(id))
            .map(|cid| cid.to_string())
            .collect();
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(StepFailure::new(
                StepAction::Delete,
                StepError::Unhealthy(format!("containers still present: {}", remaining.join(", "))),
            ))
        }
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    /// Pull, create, start and health-check one container, recording each
    /// runtime state change on the environment.
    async fn bring_up(
        &self,
        exec: &Executor<'_>,
        env: &mut Environment,
        container: &PlannedContainer,
    ) -> std::result::Result<(), StepFailure> {
        exec.ensure_image(&container.config.image)
            .await
            .map_err(|e| StepFailure::new(StepAction::PullImage, e))?;

        let labels = container_labels(&env.id, &env.spec, container);
        let cid = exec
            .create(&env.id, container, &labels)
            .await
            .map_err(|e| StepFailure::new(StepAction::Create, e))?;
        env.record_mut(&container.name, &container.role)
            .bind(cid.clone(), ContainerStatus::Created);

        exec.start(&cid)
            .await
            .map_err(|e| StepFailure::new(StepAction::Start, e))?;
        env.record_mut(&container.name, &container.role)
            .set_status(ContainerStatus::Running);

        if let Some(check) = &container.config.health_check {
            exec.wait_healthy(&cid, check)
                .await
                .map_err(|e| StepFailure::new(StepAction::HealthCheck, e))?;
        }

        debug!(container = %container.name, container_id = %cid, "Container up");
        Ok(())
    }

    /// Make sure a container runs, starting or recreating it as needed.
    async fn ensure_running(
        &self,
        exec: &Executor<'_>,
        env: &mut Environment,
        container: &PlannedContainer,
    ) -> std::result::Result<(), StepFailure> {
        let Some(cid) = env.container_id(&container.name).cloned() else {
            return self.bring_up(exec, env, container).await;
        };
        if env
            .containers
            .get(&container.name)
            .is_some_and(|r| r.is_out_of_date())
        {
            info!(container = %container.name, "Replacing container left behind by an update");
            return self.recreate(exec, env, container).await;
        }

        let status = exec
            .status(&cid)
            .await
            .map_err(|e| StepFailure::new(StepAction::Inspect, e))?;
        match status {
            ContainerStatus::Running => {
                env.record_mut(&container.name, &container.role)
                    .set_status(ContainerStatus::Running);
                Ok(())
            }
            ContainerStatus::Missing => {
                warn!(container = %container.name, "Container missing from runtime, recreating");
                env.record_mut(&container.name, &container.role).clear();
                self.bring_up(exec, env, container).await
            }
            _ => {
                match exec.start(&cid).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        env.record_mut(&container.name, &container.role).clear();
                        return self.bring_up(exec, env, container).await;
                    }
                    Err(e) => return Err(StepFailure::new(StepAction::Start, e)),
                }
                env.record_mut(&container.name, &container.role)
                    .set_status(ContainerStatus::Running);

                if let Some(check) = &container.config.health_check {
                    exec.wait_healthy(&cid, check)
                        .await
                        .map_err(|e| StepFailure::new(StepAction::HealthCheck, e))?;
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn executor<'a>(&'a self, ctx: &'a OperationContext) -> Executor<'a> {
        Executor::new(&self.supervisor, &self.config, ctx)
    }

    async fn lock(&self, id: EnvironmentId, ctx: &OperationContext) -> Result<EnvironmentLock> {
        ctx.run(self.locks.lock(id)).await.map_err(|interrupted| {
            self.locks.prune(&id);
            PartialFailure {
                environment_id: id,
                step_index: 0,
                step: "wait for environment lock".to_string(),
                cause: interrupted.to_string(),
                compensations: Vec::new(),
            }
            .into()
        })
    }

    async fn load(&self, id: &EnvironmentId) -> Result<Environment> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::environment_not_found(id))
    }

    async fn save(&self, env: &mut Environment) -> Result<()> {
        *env = self.store.update(env.clone()).await?;
        Ok(())
    }

    /// Mark the environment failed and build the error for a failed step.
    async fn abort(
        &self,
        env: &mut Environment,
        step_index: usize,
        step: String,
        error: &StepError,
        compensations: Vec<Compensation>,
    ) -> LifecycleError {
        let cause = error.to_string();
        error!(
            environment_id = %env.id,
            step_index,
            step = %step,
            cause = %cause,
            compensations = compensations.len(),
            "Plan step failed"
        );

        env.fail(format!("{}: {}", step, cause));
        if let Err(e) = self.save(env).await {
            return e;
        }

        PartialFailure {
            environment_id: env.id,
            step_index,
            step,
            cause,
            compensations,
        }
        .into()
    }
}

/// Reject operations on environments that are mid-operation or gone.
fn ensure_settled(env: &Environment, verb: &str) -> Result<()> {
    if env.phase.is_transient() || matches!(env.phase, Phase::Pending | Phase::Deleted) {
        return Err(LifecycleError::Conflict(format!(
            "cannot {} environment {} while it is {}",
            verb, env.id, env.phase
        )));
    }
    Ok(())
}

/// Stop with escalation, then delete. A container that is already gone
/// counts as destroyed.
async fn destroy(
    exec: &Executor<'_>,
    id: &ContainerId,
    force: bool,
) -> std::result::Result<(), StepFailure> {
    match exec.stop(id, force).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(StepFailure::new(StepAction::Stop, e)),
    }
    match exec.delete(id).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(StepFailure::new(StepAction::Delete, e)),
    }
}

/// Containers to remove: those dropped by the plan in teardown order, then
/// records left over from an earlier update whose removal failed.
fn removal_targets(env: &Environment, plan: &UpdatePlan) -> Vec<String> {
    let mut targets: Vec<String> = plan.removed.iter().map(|c| c.name.clone()).collect();
    let leftovers: Vec<String> = env
        .containers
        .keys()
        .filter(|name| !plan.forward.iter().any(|(c, _)| &c.name == *name))
        .filter(|name| !targets.contains(*name))
        .cloned()
        .collect();
    targets.extend(leftovers);
    targets
}

fn update_result(
    env: &Environment,
    name: &str,
    change: ContainerChange,
    outcome: std::result::Result<(), StepFailure>,
) -> ContainerUpdateResult {
    ContainerUpdateResult {
        name: name.to_string(),
        change,
        container_id: env.container_id(name).cloned(),
        outcome: match outcome {
            Ok(()) => UpdateOutcome::Succeeded,
            Err(failure) => UpdateOutcome::Failed {
                step: failure.step_name(name),
                error: failure.error.to_string(),
            },
        },
    }
}
