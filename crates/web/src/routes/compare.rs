//! Visual and text comparison between two of the caller's observations
//!
//! `:id` is the current observation and `compareWith` the earlier one it is
//! measured against. The overlay is drawn over the current screenshot and
//! text changes read as "previous → current".

use axum::{
    extract::{Path, Query, State},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use viewtrace_common::Observation;
use viewtrace_diff::{Severity, TextComparison};

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareQuery {
    compare_with: Option<String>,
}

/// The parts of each side a comparison view needs
#[derive(Debug, Serialize)]
pub struct Side {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    screenshot_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_content: Option<String>,
    captured_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl Side {
    fn visual(obs: &Observation) -> Self {
        Self {
            id: obs.id.clone(),
            screenshot_ref: obs.screenshot_ref.clone(),
            text_content: None,
            captured_at: obs.captured_at,
            created_at: obs.created_at,
        }
    }

    fn text(obs: &Observation) -> Self {
        Self {
            id: obs.id.clone(),
            screenshot_ref: None,
            text_content: obs.text_content.clone(),
            captured_at: obs.captured_at,
            created_at: obs.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompareResponse<T> {
    current: Side,
    previous: Side,
    comparison: T,
}

#[derive(Debug, Serialize)]
pub struct Dimensions {
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualReport {
    has_changes: bool,
    change_score: f64,
    change_percentage: f64,
    num_diff_pixels: u64,
    total_pixels: u64,
    change_severity: Severity,
    image_dimensions: Dimensions,
    identical_bytes: bool,
    diff_image_url: Option<String>,
    days_diff: i64,
    time_diff: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextReport {
    #[serde(flatten)]
    result: TextComparison,
    days_diff: i64,
    time_diff: i64,
}

/// Milliseconds from `previous` to `current`, and the same in whole days
/// (rounded down).
fn elapsed(current: &Observation, previous: &Observation) -> (i64, i64) {
    let time_diff = current.reference_time().timestamp_millis()
        - previous.reference_time().timestamp_millis();
    (time_diff, time_diff.div_euclid(MILLIS_PER_DAY))
}

fn load_pair(
    state: &SharedState,
    owner_id: &str,
    id: &str,
    query: CompareQuery,
) -> ApiResult<(Observation, Observation)> {
    let compare_with = query
        .compare_with
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("compareWith parameter is required".into()))?;
    let current = state.observations.get_owned(id, owner_id)?;
    let previous = state.observations.get_owned(compare_with.trim(), owner_id)?;
    Ok((current, previous))
}

pub async fn visual(
    State(state): State<SharedState>,
    Caller(account): Caller,
    Path(id): Path<String>,
    Query(query): Query<CompareQuery>,
) -> ApiResult<Json<CompareResponse<VisualReport>>> {
    let (current, previous) = load_pair(&state, &account.id, &id, query)?;
    let (Some(current_ref), Some(previous_ref)) = (&current.screenshot_ref, &previous.screenshot_ref)
    else {
        return Err(ApiError::BadRequest(
            "Both observations must have screenshots to compare".into(),
        ));
    };

    let (current_png, previous_png) = tokio::try_join!(
        state.blobs.fetch(current_ref),
        state.blobs.fetch(previous_ref)
    )
    .map_err(ApiError::internal)?;

    let engine = state.visual.clone();
    let mut result =
        tokio::task::spawn_blocking(move || engine.compare(&current_png, &previous_png))
            .await
            .map_err(ApiError::internal)?
            .map_err(ApiError::internal)?;

    let key = format!(
        "diff-{}-{}-{}.png",
        current.id,
        previous.id,
        Utc::now().timestamp_millis()
    );
    let overlay = Bytes::from(std::mem::take(&mut result.diff_image));
    let diff_image_url = match state.blobs.put(&key, overlay, "image/png").await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("Failed to store diff overlay {}: {}", key, e);
            None
        }
    };

    let (time_diff, days_diff) = elapsed(&current, &previous);
    debug!(
        observation_id = %current.id,
        compare_with = %previous.id,
        change_score = result.change_score,
        "Visual comparison"
    );

    Ok(Json(CompareResponse {
        current: Side::visual(&current),
        previous: Side::visual(&previous),
        comparison: VisualReport {
            has_changes: result.has_changes(),
            change_score: result.change_score,
            change_percentage: result.change_percentage,
            num_diff_pixels: result.changed_pixels,
            total_pixels: result.total_pixels,
            change_severity: result.severity,
            image_dimensions: Dimensions {
                width: result.width,
                height: result.height,
            },
            identical_bytes: result.identical_bytes,
            diff_image_url,
            days_diff,
            time_diff,
        },
    }))
}

pub async fn text(
    State(state): State<SharedState>,
    Caller(account): Caller,
    Path(id): Path<String>,
    Query(query): Query<CompareQuery>,
) -> ApiResult<Json<CompareResponse<TextReport>>> {
    let (current, previous) = load_pair(&state, &account.id, &id, query)?;
    let has_text = |o: &Observation| o.text_content.as_deref().is_some_and(|t| !t.is_empty());
    if !has_text(&current) || !has_text(&previous) {
        return Err(ApiError::BadRequest(
            "Both observations must have extracted text to compare".into(),
        ));
    }

    let before = previous.text_content.clone().unwrap_or_default();
    let after = current.text_content.clone().unwrap_or_default();
    let engine = state.text.clone();
    let result = tokio::task::spawn_blocking(move || engine.compare(&before, &after))
        .await
        .map_err(ApiError::internal)?;

    let (time_diff, days_diff) = elapsed(&current, &previous);
    Ok(Json(CompareResponse {
        current: Side::text(&current),
        previous: Side::text(&previous),
        comparison: TextReport {
            result,
            days_diff,
            time_diff,
        },
    }))
}
