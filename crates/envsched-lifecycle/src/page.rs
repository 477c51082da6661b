//! Listing: label filters and opaque continuation tokens

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use envsched_types::{Environment, EnvironmentId, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One list request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub page_size: Option<usize>,

    /// Token returned by the previous page
    #[serde(default)]
    pub page_token: Option<String>,

    /// Exact-match label filters; all must match
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One page of environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentPage {
    pub environments: Vec<Environment>,
    pub next_page_token: Option<String>,
}

/// Sort key of the last environment on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct PageKey {
    pub created_at: DateTime<Utc>,
    pub id: EnvironmentId,
}

impl PageKey {
    pub fn of(environment: &Environment) -> Self {
        Self {
            created_at: environment.created_at,
            id: environment.id,
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a struct of a timestamp and a UUID cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::single("page_token", "malformed page token");
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }
}

/// Filter, order and cut one page out of `environments`.
pub(crate) fn paginate(
    mut environments: Vec<Environment>,
    labels: &BTreeMap<String, String>,
    after: Option<PageKey>,
    page_size: usize,
) -> EnvironmentPage {
    environments.retain(|e| e.spec.matches_labels(labels));
    environments.sort_by_key(PageKey::of);
    if let Some(after) = after {
        environments.retain(|e| PageKey::of(e) > after);
    }

    let has_more = environments.len() > page_size;
    environments.truncate(page_size);
    let next_page_token = if has_more {
        environments.last().map(|e| PageKey::of(e).encode())
    } else {
        None
    };

    EnvironmentPage {
        environments,
        next_page_token,
    }
}
