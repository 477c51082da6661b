//! Environment lifecycle handlers

use super::parse_environment_id;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::service::{
    CreateEnvironmentRequest, DeleteEnvironmentRequest, DeleteEnvironmentResponse,
    GetEnvironmentRequest, GetEnvironmentStatusRequest, ListEnvironmentsRequest,
    RestartEnvironmentRequest, StartEnvironmentRequest, StopEnvironmentRequest,
    UpdateEnvironmentRequest,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use envsched_lifecycle::{EnvironmentPage, EnvironmentStatus, UpdateReport};
use envsched_types::{Environment, EnvironmentSpecification};
use serde::Deserialize;
use std::collections::BTreeMap;

/// List query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ListEnvironmentsQuery {
    pub page_size: Option<usize>,
    pub page_token: Option<String>,

    /// Label filters as `key=value` pairs separated by commas
    pub labels: Option<String>,
}

/// Optional deadline for a lifecycle call
#[derive(Debug, Default, Deserialize)]
pub struct OperationQuery {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopQuery {
    #[serde(default)]
    pub force: bool,
    pub timeout_secs: Option<u64>,
}

/// Update request body
#[derive(Debug, Deserialize)]
pub struct UpdateEnvironmentBody {
    pub specification: EnvironmentSpecification,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn parse_labels(raw: Option<&str>) -> ApiResult<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for pair in raw.unwrap_or("").split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid label filter: {}", pair)))?;
        labels.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(labels)
}

/// Create an environment
pub async fn create_environment(
    State(state): State<AppState>,
    Json(request): Json<CreateEnvironmentRequest>,
) -> ApiResult<(StatusCode, Json<Environment>)> {
    let environment = state.service.create_environment(request).await?;
    Ok((StatusCode::CREATED, Json(environment)))
}

/// List environments
pub async fn list_environments(
    State(state): State<AppState>,
    Query(query): Query<ListEnvironmentsQuery>,
) -> ApiResult<Json<EnvironmentPage>> {
    let request = ListEnvironmentsRequest {
        page_size: query.page_size,
        page_token: query.page_token,
        labels: parse_labels(query.labels.as_deref())?,
    };
    Ok(Json(state.service.list_environments(request).await?))
}

/// Get one environment
pub async fn get_environment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Environment>> {
    let environment_id = parse_environment_id(&id)?;
    let environment = state
        .service
        .get_environment(GetEnvironmentRequest { environment_id })
        .await?;
    Ok(Json(environment))
}

/// Apply a new specification
pub async fn update_environment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateEnvironmentBody>,
) -> ApiResult<Json<UpdateReport>> {
    let environment_id = parse_environment_id(&id)?;
    let report = state
        .service
        .update_environment(UpdateEnvironmentRequest {
            environment_id,
            specification: body.specification,
            timeout_secs: body.timeout_secs,
        })
        .await?;
    Ok(Json(report))
}

/// Delete an environment
pub async fn delete_environment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OperationQuery>,
) -> ApiResult<Json<DeleteEnvironmentResponse>> {
    let environment_id = parse_environment_id(&id)?;
    let response = state
        .service
        .delete_environment(DeleteEnvironmentRequest {
            environment_id,
            timeout_secs: query.timeout_secs,
        })
        .await?;
    Ok(Json(response))
}

pub async fn start_environment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OperationQuery>,
) -> ApiResult<Json<Environment>> {
    let environment_id = parse_environment_id(&id)?;
    let environment = state
        .service
        .start_environment(StartEnvironmentRequest {
            environment_id,
            timeout_secs: query.timeout_secs,
        })
        .await?;
    Ok(Json(environment))
}

pub async fn stop_environment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StopQuery>,
) -> ApiResult<Json<Environment>> {
    let environment_id = parse_environment_id(&id)?;
    let environment = state
        .service
        .stop_environment(StopEnvironmentRequest {
            environment_id,
            force: query.force,
            timeout_secs: query.timeout_secs,
        })
        .await?;
    Ok(Json(environment))
}

pub async fn restart_environment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OperationQuery>,
) -> ApiResult<Json<Environment>> {
    let environment_id = parse_environment_id(&id)?;
    let environment = state
        .service
        .restart_environment(RestartEnvironmentRequest {
            environment_id,
            timeout_secs: query.timeout_secs,
        })
        .await?;
    Ok(Json(environment))
}

/// Live status of an environment's containers
pub async fn environment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnvironmentStatus>> {
    let environment_id = parse_environment_id(&id)?;
    let status = state
        .service
        .get_environment_status(GetEnvironmentStatusRequest { environment_id })
        .await?;
    Ok(Json(status))
}
