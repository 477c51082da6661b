//! Scheduler service facade
//!
//! Transport-agnostic request and response types over the lifecycle
//! controller. Every request gets an operation context carrying the daemon's
//! shutdown signal and a deadline: the request's own timeout, or the
//! configured default.

use chrono::{DateTime, Utc};
use envsched_connection::ConnectionHealth;
use envsched_lifecycle::{
    EnvironmentController, EnvironmentPage, EnvironmentStatus, ListRequest, LogEntryStream,
    LogRequest, OperationContext, Result, UpdateReport,
};
use envsched_types::{Environment, EnvironmentId, EnvironmentSpecification};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEnvironmentRequest {
    pub specification: EnvironmentSpecification,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEnvironmentRequest {
    pub environment_id: EnvironmentId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListEnvironmentsRequest {
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartEnvironmentRequest {
    pub environment_id: EnvironmentId,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopEnvironmentRequest {
    pub environment_id: EnvironmentId,
    /// Kill tasks instead of stopping them gracefully
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartEnvironmentRequest {
    pub environment_id: EnvironmentId,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEnvironmentRequest {
    pub environment_id: EnvironmentId,
    pub specification: EnvironmentSpecification,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEnvironmentRequest {
    pub environment_id: EnvironmentId,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEnvironmentResponse {
    pub environment_id: EnvironmentId,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEnvironmentStatusRequest {
    pub environment_id: EnvironmentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEnvironmentLogsRequest {
    pub environment_id: EnvironmentId,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tail_lines: Option<usize>,
    #[serde(default)]
    pub follow: bool,
    /// Bounds the whole stream; unset means until the log ends
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Facade over the lifecycle controller
pub struct SchedulerService {
    controller: Arc<EnvironmentController>,
    shutdown: watch::Receiver<bool>,
    default_timeout: Duration,
}

impl SchedulerService {
    pub fn new(
        controller: Arc<EnvironmentController>,
        shutdown: watch::Receiver<bool>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            shutdown,
            default_timeout,
        }
    }

    pub fn controller(&self) -> &Arc<EnvironmentController> {
        &self.controller
    }

    fn context(&self, timeout_secs: Option<u64>) -> OperationContext {
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        OperationContext::background()
            .with_cancellation(self.shutdown.clone())
            .with_timeout(timeout)
    }

    pub async fn create_environment(
        &self,
        request: CreateEnvironmentRequest,
    ) -> Result<Environment> {
        let ctx = self.context(request.timeout_secs);
        let env = self.controller.create(request.specification, &ctx).await?;
        info!(environment_id = %env.id, "Environment created");
        Ok(env)
    }

    pub async fn get_environment(&self, request: GetEnvironmentRequest) -> Result<Environment> {
        self.controller.get(&request.environment_id).await
    }

    pub async fn list_environments(
        &self,
        request: ListEnvironmentsRequest,
    ) -> Result<EnvironmentPage> {
        self.controller
            .list(ListRequest {
                page_size: request.page_size,
                page_token: request.page_token,
                labels: request.labels,
            })
            .await
    }

    pub async fn start_environment(&self, request: StartEnvironmentRequest) -> Result<Environment> {
        let ctx = self.context(request.timeout_secs);
        self.controller.start(&request.environment_id, &ctx).await
    }

    pub async fn stop_environment(&self, request: StopEnvironmentRequest) -> Result<Environment> {
        let ctx = self.context(request.timeout_secs);
        self.controller
            .stop(&request.environment_id, request.force, &ctx)
            .await
    }

    pub async fn restart_environment(
        &self,
        request: RestartEnvironmentRequest,
    ) -> Result<Environment> {
        let ctx = self.context(request.timeout_secs);
        self.controller.restart(&request.environment_id, &ctx).await
    }

    pub async fn update_environment(
        &self,
        request: UpdateEnvironmentRequest,
    ) -> Result<UpdateReport> {
        let ctx = self.context(request.timeout_secs);
        self.controller
            .update(&request.environment_id, request.specification, &ctx)
            .await
    }

    pub async fn delete_environment(
        &self,
        request: DeleteEnvironmentRequest,
    ) -> Result<DeleteEnvironmentResponse> {
        let ctx = self.context(request.timeout_secs);
        self.controller.delete(&request.environment_id, &ctx).await?;
        Ok(DeleteEnvironmentResponse {
            environment_id: request.environment_id,
            deleted: true,
        })
    }

    pub async fn get_environment_status(
        &self,
        request: GetEnvironmentStatusRequest,
    ) -> Result<EnvironmentStatus> {
        let ctx = self.context(None);
        self.controller.status(&request.environment_id, &ctx).await
    }

    pub async fn get_environment_logs(
        &self,
        request: GetEnvironmentLogsRequest,
    ) -> Result<LogEntryStream> {
        let mut ctx = OperationContext::background().with_cancellation(self.shutdown.clone());
        if let Some(secs) = request.timeout_secs {
            ctx = ctx.with_timeout(Duration::from_secs(secs));
        }
        let log_request = LogRequest {
            container_name: request.container_name,
            since: request.since,
            tail_lines: request.tail_lines,
            follow: request.follow,
        };
        self.controller
            .logs(&request.environment_id, log_request, &ctx)
            .await
    }

    pub fn connection_health(&self) -> ConnectionHealth {
        self.controller.supervisor().health()
    }
}
