//! Container log streaming

use crate::context::OperationContext;
use crate::controller::EnvironmentController;
use crate::error::{LifecycleError, Result};
use chrono::{DateTime, Utc};
use envsched_runtime::{LogOptions, RuntimeError};
use envsched_types::{EnvironmentId, LogEntry, ValidationError};
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Which log lines to read, and whether to keep following
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRequest {
    /// Logical container name; may be omitted for single-container environments
    #[serde(default)]
    pub container_name: Option<String>,

    #[serde(default)]
    pub since: Option<DateTime<Utc>>,

    /// Only the last N lines
    #[serde(default)]
    pub tail_lines: Option<usize>,

    #[serde(default)]
    pub follow: bool,
}

/// Log entries in order; ends after the first error
pub type LogEntryStream = BoxStream<'static, Result<LogEntry>>;

impl EnvironmentController {
    /// Stream logs of one container.
    ///
    /// The stream ends when the container's log ends (or, when following,
    /// when the container is deleted), when the context is interrupted, or
    /// right after the first error item.
    #[instrument(skip(self, request, ctx), fields(environment_id = %id))]
    pub async fn logs(
        &self,
        id: &EnvironmentId,
        request: LogRequest,
        ctx: &OperationContext,
    ) -> Result<LogEntryStream> {
        let env = self.get(id).await?;

        let name = match request.container_name {
            Some(name) => {
                if !env.containers.contains_key(&name) {
                    return Err(LifecycleError::NotFound(format!(
                        "container '{}' in environment {}",
                        name, id
                    )));
                }
                name
            }
            None => {
                let mut names = env.containers.keys();
                match (names.next(), names.next()) {
                    (Some(only), None) => only.clone(),
                    _ => {
                        return Err(ValidationError::single(
                            "container_name",
                            "required when the environment has more than one container",
                        )
                        .into())
                    }
                }
            }
        };

        let cid = env.container_id(&name).cloned().ok_or_else(|| {
            LifecycleError::Conflict(format!("container '{}' has no runtime container", name))
        })?;

        let rt = self.supervisor().acquire()?;
        let options = LogOptions {
            since: request.since,
            tail: request.tail_lines,
            follow: request.follow,
        };
        let opened = match ctx.run(rt.stream_logs(&cid, options)).await {
            Ok(opened) => opened,
            Err(interrupted) => Err(RuntimeError::Timeout(interrupted.to_string())),
        };
        let lines = opened.map_err(|source| LifecycleError::Runtime {
            container: name.clone(),
            source,
        })?;
        debug!(container = %name, follow = request.follow, "Streaming logs");

        let container_name = name;
        let entries = lines
            .map(move |line| match line {
                Ok(line) => Ok(LogEntry {
                    timestamp: line.timestamp,
                    container_name: container_name.clone(),
                    message: line.message,
                }),
                Err(source) => Err(LifecycleError::Runtime {
                    container: container_name.clone(),
                    source,
                }),
            })
            .scan(false, |failed, item| {
                if *failed {
                    return future::ready(None);
                }
                *failed = item.is_err();
                future::ready(Some(item))
            })
            .take_until(ctx.interrupted());

        Ok(entries.boxed())
    }
}
