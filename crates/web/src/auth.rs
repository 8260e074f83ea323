//! Bearer-token caller authentication

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use viewtrace_common::Account;

use crate::error::ApiError;
use crate::state::SharedState;

/// The authenticated account behind a request
#[derive(Debug, Clone)]
pub struct Caller(pub Account);

pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl FromRequestParts<SharedState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers).ok_or(ApiError::Unauthorized(
            "Missing or invalid authorization header",
        ))?;
        let account = state
            .accounts
            .find_by_token(token)?
            .ok_or(ApiError::Unauthorized("Invalid API token"))?;
        Ok(Caller(account))
    }
}
