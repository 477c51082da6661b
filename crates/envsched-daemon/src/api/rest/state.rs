//! Application state for API handlers

use crate::service::SchedulerService;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SchedulerService>,

    /// Daemon version
    pub version: String,

    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self {
            service,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }

    /// Uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (Utc::now() - self.started_at).num_seconds();
        match secs {
            s if s < 60 => format!("{}s", s),
            s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
            s if s < 86400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
            s => format!("{}d {}h", s / 86400, (s % 86400) / 3600),
        }
    }
}
