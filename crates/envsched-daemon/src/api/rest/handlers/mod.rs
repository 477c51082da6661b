//! API request handlers

mod environments;
mod health;
mod logs;

pub use environments::*;
pub use health::*;
pub use logs::*;

use crate::error::{ApiError, ApiResult};
use envsched_types::EnvironmentId;

/// Parse an environment ID path segment (`env-<uuid>` or a bare UUID).
pub(crate) fn parse_environment_id(id: &str) -> ApiResult<EnvironmentId> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid environment ID: {}", id)))
}
