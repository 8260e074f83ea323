//! Observation CRUD and lifecycle endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use url::Url;
use viewtrace_common::observations::HISTORY_LIMIT;
use viewtrace_common::{Observation, ObservationStatus};

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    url: String,
    #[serde(default)]
    regions: Vec<String>,
    /// Single-region form accepted by older clients.
    #[serde(default)]
    region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedObservation {
    id: String,
    region: String,
    status: ObservationStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDetail {
    observation: Observation,
    related_observations: Vec<Observation>,
    history_observations: Vec<Observation>,
}

/// Absolute `http`/`https` URLs only. The caller's text is kept as typed
/// so repeat observations of the same input group together.
fn validate_url(raw: &str) -> ApiResult<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|_| ApiError::BadRequest(format!("Invalid URL: {}", trimmed)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(trimmed.to_string()),
        _ => Err(ApiError::BadRequest(
            "URL must be an absolute http or https address".into(),
        )),
    }
}

/// Merge `regions` and `region`, trimming blanks and dropping repeats while
/// keeping request order.
fn requested_regions(req: &CreateRequest) -> Vec<String> {
    let mut regions: Vec<String> = Vec::new();
    for region in req.regions.iter().chain(req.region.iter()) {
        let region = region.trim();
        if !region.is_empty() && !regions.iter().any(|r| r == region) {
            regions.push(region.to_string());
        }
    }
    regions
}

pub async fn create(
    State(state): State<SharedState>,
    Caller(account): Caller,
    Json(req): Json<CreateRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let url = validate_url(&req.url)?;
    let regions = requested_regions(&req);
    if regions.is_empty() {
        return Err(ApiError::BadRequest("URL and region are required".into()));
    }

    let count = regions.len() as i64;
    let metered = !state.billing.bypass_quota;
    if metered {
        state.accounts.reserve_quota(&account.id, count)?;
    }

    let created = match state.observations.create_batch(&account.id, &url, &regions) {
        Ok(created) => created,
        Err(e) => {
            if metered {
                if let Err(release) = state.accounts.release_quota(&account.id, count) {
                    error!(account_id = %account.id, "Failed to release quota: {}", release);
                }
            }
            return Err(e.into());
        }
    };

    let ids: Vec<String> = created.iter().map(|o| o.id.clone()).collect();
    let queued = state.queue.enqueue(ids);
    if queued < created.len() {
        warn!(
            "Queued {} of {} new observations; the rest wait for the reconciler",
            queued,
            created.len()
        );
    }
    info!(account_id = %account.id, url = %url, count, "Observations requested");

    let observations: Vec<CreatedObservation> = created
        .into_iter()
        .map(|o| CreatedObservation {
            id: o.id,
            region: o.region,
            status: o.status,
        })
        .collect();
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "observations": observations })),
    ))
}

pub async fn list(
    State(state): State<SharedState>,
    Caller(account): Caller,
) -> ApiResult<Json<Value>> {
    let observations = state
        .observations
        .list_for_owner(&account.id, HISTORY_LIMIT)?;
    Ok(Json(json!({ "observations": observations })))
}

pub async fn show(
    State(state): State<SharedState>,
    Caller(account): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<ObservationDetail>> {
    let observation = state.observations.get_owned(&id, &account.id)?;
    let related_observations = state.observations.related(&observation)?;
    let history_observations = state.observations.history(&observation)?;
    Ok(Json(ObservationDetail {
        observation,
        related_observations,
        history_observations,
    }))
}

pub async fn cancel(
    State(state): State<SharedState>,
    Caller(account): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let observation = state.observations.cancel(&id, &account.id)?;
    Ok(Json(json!({ "success": true, "observation": observation })))
}

/// Retry does not draw on the quota again.
pub async fn retry(
    State(state): State<SharedState>,
    Caller(account): Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let observation = state.observations.retry(&id, &account.id)?;
    state.queue.enqueue(vec![observation.id.clone()]);
    Ok(Json(json!({
        "success": true,
        "observation": observation,
        "message": "Observation queued for retry",
    })))
}
