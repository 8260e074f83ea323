//! Billing provider webhook
//!
//! The provider posts subscription events authenticated with a shared
//! token. Events that do not concern the subscription are acknowledged and
//! ignored so the provider stops redelivering them.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use viewtrace_common::{Plan, SubscriptionStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

pub const WEBHOOK_TOKEN_HEADER: &str = "x-viewtrace-webhook-token";

#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: EventData,
}

#[derive(Debug, Default, Deserialize)]
struct EventData {
    account_id: Option<String>,
    email: Option<String>,
    plan: Option<String>,
    status: Option<String>,
}

fn authorize(headers: &HeaderMap, expected: Option<&str>) -> ApiResult<()> {
    let provided = headers
        .get(WEBHOOK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    match (expected, provided) {
        (Some(expected), Some(provided)) if expected == provided => Ok(()),
        _ => Err(ApiError::Unauthorized("Invalid webhook token")),
    }
}

pub async fn webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(event): Json<BillingEvent>,
) -> ApiResult<Json<Value>> {
    authorize(&headers, state.billing.webhook_token.as_deref())?;

    let (status, plan) = match event.kind.as_str() {
        "checkout.completed" => (SubscriptionStatus::Active, parse_plan(&event.data)?),
        "subscription.updated" => {
            let status = event
                .data
                .status
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("status is required".into()))?
                .parse::<SubscriptionStatus>()
                .map_err(ApiError::BadRequest)?;
            (status, parse_plan(&event.data)?)
        }
        "subscription.deleted" => (SubscriptionStatus::Canceled, None),
        other => {
            debug!("Ignoring billing event {}", other);
            return Ok(Json(json!({ "received": true, "ignored": true })));
        }
    };

    let account_id = resolve_account(&state, &event.data)?;
    let account = state
        .accounts
        .set_subscription(&account_id, status, plan)?;
    info!(
        account_id = %account.id,
        event = %event.kind,
        "Applied billing event"
    );

    Ok(Json(json!({ "received": true, "account": account })))
}

fn parse_plan(data: &EventData) -> ApiResult<Option<Plan>> {
    data.plan
        .as_deref()
        .map(|p| p.parse::<Plan>().map_err(ApiError::BadRequest))
        .transpose()
}

fn resolve_account(state: &SharedState, data: &EventData) -> ApiResult<String> {
    if let Some(id) = &data.account_id {
        return Ok(id.clone());
    }
    let email = data
        .email
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("account_id or email is required".into()))?;
    let account = state
        .accounts
        .find_by_email(email)?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;
    Ok(account.id)
}
