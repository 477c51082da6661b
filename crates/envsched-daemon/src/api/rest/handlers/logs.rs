//! Log streaming handler
//!
//! Each log entry is sent as a `log` event. A failure mid-stream is sent as
//! an `error` event carrying the error body, and a normal end of the log as
//! an `end` event; the stream closes after either.

use super::parse_environment_id;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::service::GetEnvironmentLogsRequest;
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

/// Log query parameters
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub container: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub tail: Option<usize>,
    #[serde(default)]
    pub follow: bool,
    pub timeout_secs: Option<u64>,
}

/// Stream container logs via SSE
pub async fn stream_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let environment_id = parse_environment_id(&id)?;
    let entries = state
        .service
        .get_environment_logs(GetEnvironmentLogsRequest {
            environment_id,
            container_name: query.container,
            since: query.since,
            tail_lines: query.tail,
            follow: query.follow,
            timeout_secs: query.timeout_secs,
        })
        .await?;

    let events = stream::unfold(Some(entries), |entries| async move {
        let Some(mut entries) = entries else {
            return None;
        };
        let last = match entries.next().await {
            Some(Ok(entry)) => {
                let data = serde_json::to_string(&entry).unwrap_or_default();
                let event = Event::default().event("log").data(data);
                return Some((Ok::<_, Infallible>(event), Some(entries)));
            }
            Some(Err(e)) => {
                let body = ApiError::from(e).body();
                Event::default()
                    .event("error")
                    .data(serde_json::to_string(&body).unwrap_or_default())
            }
            None => Event::default().event("end").data("{}"),
        };
        Some((Ok(last), None))
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
