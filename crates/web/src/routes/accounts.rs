//! Sign-up and account lookup

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use viewtrace_common::{Account, NewAccount};

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::state::SharedState;

#[derive(Serialize)]
pub struct SignupResponse {
    account: Account,
    /// Shown once; only its hash is stored.
    token: String,
}

#[derive(Serialize)]
pub struct AccountView {
    #[serde(flatten)]
    account: Account,
    remaining: i64,
}

pub async fn signup(
    State(state): State<SharedState>,
    Json(input): Json<NewAccount>,
) -> ApiResult<(StatusCode, Json<SignupResponse>)> {
    let (account, token) = state
        .accounts
        .create(&input, state.billing.auto_activate)?;
    Ok((StatusCode::CREATED, Json(SignupResponse { account, token })))
}

pub async fn me(Caller(account): Caller) -> Json<AccountView> {
    let remaining = account.remaining();
    Json(AccountView { account, remaining })
}
