use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use viewtrace_capture::{CaptureConfig, CaptureQueue, CaptureWorker, PlaywrightLauncher, QueueConfig};
use viewtrace_common::{
    BlobStore, CaptureOutcome, Database, FsBlobStore, ObservationStore, ResultStatus,
    RetryPolicy,
};

use super::billing::WEBHOOK_TOKEN_HEADER;
use super::router;
use crate::config::BillingConfig;
use crate::state::{AppState, SharedState};

struct TestApp {
    router: Router,
    state: SharedState,
    blobs: FsBlobStore,
    _tmp: TempDir,
}

/// An app whose capture queue never runs anything: the supervisors see an
/// already-cancelled token and exit, so observations stay where the API
/// put them.
fn app(billing: BillingConfig) -> TestApp {
    let db = Database::open_memory().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let blobs = FsBlobStore::new(tmp.path(), "http://localhost/artifacts");

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let worker = Arc::new(CaptureWorker::new(
        ObservationStore::new(db.clone()),
        Arc::new(blobs.clone()),
        Arc::new(PlaywrightLauncher::new(&CaptureConfig::default())),
        CaptureConfig::default(),
        RetryPolicy::none(),
    ));
    let (queue, _) = CaptureQueue::start(worker, &QueueConfig::default(), shutdown);

    let state = Arc::new(AppState::new(
        db,
        Arc::new(blobs.clone()),
        Some(blobs.clone()),
        queue,
        billing,
    ));
    TestApp {
        router: router(state.clone()),
        state,
        blobs,
        _tmp: tmp,
    }
}

fn active() -> BillingConfig {
    BillingConfig {
        auto_activate: true,
        webhook_token: Some("whsec".into()),
        ..Default::default()
    }
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn signup(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/accounts",
                None,
                Some(json!({ "email": email, "name": "Test User" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            body["account"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn observe(&self, token: &str, regions: &[&str]) -> Vec<String> {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/observations",
                Some(token),
                Some(json!({ "url": "https://example.com", "regions": regions })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["observations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].as_str().unwrap().to_string())
            .collect()
    }

    /// Drive an observation to `completed` the way the worker would.
    async fn complete(&self, id: &str, screenshot: Option<Vec<u8>>, text: Option<&str>) {
        let screenshot_ref = match screenshot {
            Some(png) => self
                .blobs
                .put(&format!("{}.png", id), Bytes::from(png), "image/png")
                .await
                .unwrap(),
            None => String::new(),
        };
        let store = &self.state.observations;
        assert!(store.claim(id).unwrap());
        assert!(store
            .complete(
                id,
                &CaptureOutcome {
                    screenshot_ref,
                    text_content: text.map(str::to_string),
                    result_status: ResultStatus::Observed,
                    captured_at: Utc::now(),
                },
            )
            .unwrap());
    }
}

fn png(width: u32, height: u32, paint: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| Rgba(paint(x, y)));
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_health() {
    let app = app(active());
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_signup_and_me() {
    let app = app(BillingConfig::default());
    let (id, token) = app.signup("Ada@Example.com").await;
    assert!(token.starts_with("vt_"));

    let (status, body) = app
        .send(Method::GET, "/api/accounts/me", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["email"], "ada@example.com");
    assert_eq!(body["plan"], "starter");
    assert_eq!(body["subscription_status"], "inactive");
    assert_eq!(body["remaining"], 50);

    let (status, _) = app
        .send(Method::POST, "/api/accounts", None, Some(json!({ "email": "ada@example.com", "name": "Again" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_requests_need_a_valid_token() {
    let app = app(active());
    let (status, body) = app.send(Method::GET, "/api/observations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app
        .send(Method::GET, "/api/observations", Some("vt_bogus"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_observations() {
    let app = app(active());
    let (account_id, token) = app.signup("a@example.com").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/observations",
            Some(&token),
            Some(json!({ "url": "https://example.com", "regions": ["US-CA", "US-NY", "US-CA"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let created = body["observations"].as_array().unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0]["region"], "US-CA");
    assert_eq!(created[1]["region"], "US-NY");
    assert!(created.iter().all(|o| o["status"] == "pending"));

    let account = app.state.accounts.get(&account_id).unwrap().unwrap();
    assert_eq!(account.observations_used, 2);

    let (status, body) = app
        .send(Method::GET, "/api/observations", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["observations"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let app = app(active());
    let (_, token) = app.signup("a@example.com").await;

    for body in [
        json!({ "url": "ftp://example.com", "regions": ["US-CA"] }),
        json!({ "url": "example.com", "regions": ["US-CA"] }),
        json!({ "url": "https://example.com", "regions": [] }),
        json!({ "url": "https://example.com", "regions": ["  "] }),
    ] {
        let (status, response) = app
            .send(Method::POST, "/api/observations", Some(&token), Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} -> {}", body, response);
    }
}

#[tokio::test]
async fn test_quota_gate() {
    let app = app(BillingConfig::default());
    let (account_id, token) = app.signup("a@example.com").await;

    // Inactive subscription
    let (status, body) = app
        .send(
            Method::POST,
            "/api/observations",
            Some(&token),
            Some(json!({ "url": "https://example.com", "region": "US-CA" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("not active"));

    app.state
        .accounts
        .set_subscription(&account_id, viewtrace_common::SubscriptionStatus::Active, None)
        .unwrap();
    app.state.accounts.reserve_quota(&account_id, 49).unwrap();

    // One left, two requested: nothing is created or counted.
    let (status, body) = app
        .send(
            Method::POST,
            "/api/observations",
            Some(&token),
            Some(json!({ "url": "https://example.com", "regions": ["US-CA", "US-NY"] })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("limit reached"));
    assert_eq!(
        app.state.accounts.get(&account_id).unwrap().unwrap().observations_used,
        49
    );
    assert!(app
        .state
        .observations
        .list_for_owner(&account_id, 50)
        .unwrap()
        .is_empty());

    assert_eq!(app.observe(&token, &["US-CA"]).await.len(), 1);
}

#[tokio::test]
async fn test_bypass_quota_skips_gate_and_counter() {
    let app = app(BillingConfig {
        bypass_quota: true,
        ..Default::default()
    });
    let (account_id, token) = app.signup("a@example.com").await;

    assert_eq!(app.observe(&token, &["US-CA", "UK"]).await.len(), 2);
    assert_eq!(
        app.state.accounts.get(&account_id).unwrap().unwrap().observations_used,
        0
    );
}

#[tokio::test]
async fn test_show_scopes_to_owner() {
    let app = app(active());
    let (_, owner) = app.signup("owner@example.com").await;
    let (_, stranger) = app.signup("stranger@example.com").await;

    let first = app.observe(&owner, &["US-CA", "US-NY"]).await;
    let second = app.observe(&owner, &["US-CA"]).await;

    let (status, body) = app
        .send(Method::GET, &format!("/api/observations/{}", second[0]), Some(&owner), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["observation"]["id"], second[0].as_str());
    assert!(body["observation"].get("failure_reason").is_none());

    let related = body["relatedObservations"].as_array().unwrap();
    assert_eq!(related.len(), 2);
    let history: Vec<&str> = body["historyObservations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap())
        .collect();
    assert_eq!(history, vec![first[0].as_str()]);

    let (status, body) = app
        .send(Method::GET, &format!("/api/observations/{}", second[0]), Some(&stranger), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Observation not found");
}

#[tokio::test]
async fn test_cancel_and_retry() {
    let app = app(active());
    let (account_id, token) = app.signup("a@example.com").await;
    let id = app.observe(&token, &["US-CA"]).await.remove(0);

    let cancel = format!("/api/observations/{}/cancel", id);
    let retry = format!("/api/observations/{}/retry", id);

    let (status, body) = app.send(Method::POST, &retry, Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot retry observation with status: pending");

    let (status, body) = app.send(Method::POST, &cancel, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["observation"]["status"], "cancelled");

    let (status, body) = app.send(Method::POST, &cancel, Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot cancel observation with status: cancelled");

    let (status, body) = app.send(Method::POST, &retry, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["observation"]["status"], "pending");
    assert!(body["observation"]["screenshot_ref"].is_null());

    // Retrying does not draw on the quota again.
    assert_eq!(
        app.state.accounts.get(&account_id).unwrap().unwrap().observations_used,
        1
    );
}

#[tokio::test]
async fn test_compare_visual() {
    let app = app(active());
    let (_, token) = app.signup("a@example.com").await;
    let ids = app.observe(&token, &["US-CA", "US-NY"]).await;
    let (current, previous) = (&ids[1], &ids[0]);

    app.complete(previous, Some(png(10, 10, |_, _| [255, 255, 255, 255])), Some("a"))
        .await;
    app.complete(
        current,
        Some(png(10, 10, |x, _| if x < 5 { [0, 0, 0, 255] } else { [255, 255, 255, 255] })),
        Some("b"),
    )
    .await;

    let uri = format!("/api/observations/{}/compare-visual?compareWith={}", current, previous);
    let (status, body) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["current"]["id"], current.as_str());
    assert_eq!(body["previous"]["id"], previous.as_str());

    let comparison = &body["comparison"];
    assert_eq!(comparison["hasChanges"], true);
    assert_eq!(comparison["numDiffPixels"], 50);
    assert_eq!(comparison["totalPixels"], 100);
    assert_eq!(comparison["changeScore"], 50.0);
    assert_eq!(comparison["changeSeverity"], "high");
    assert_eq!(comparison["imageDimensions"]["width"], 10);
    assert_eq!(comparison["daysDiff"], 0);

    // The overlay is stored and served back as a PNG.
    let overlay_url = comparison["diffImageUrl"].as_str().unwrap();
    let key = app.blobs.key_for(overlay_url).unwrap();
    assert!(key.starts_with(&format!("diff-{}-{}-", current, previous)));
    let response = app
        .router
        .clone()
        .oneshot(
            Request::get(format!("/artifacts/{}", key))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    // `/compare` is the same endpoint.
    let uri = format!("/api/observations/{}/compare?compareWith={}", current, previous);
    let (status, _) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_compare_preconditions() {
    let app = app(active());
    let (_, token) = app.signup("a@example.com").await;
    let (_, stranger) = app.signup("b@example.com").await;
    let ids = app.observe(&token, &["US-CA", "US-NY"]).await;
    let theirs = app.observe(&stranger, &["US-CA"]).await;

    let (status, body) = app
        .send(Method::GET, &format!("/api/observations/{}/compare-visual", ids[0]), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "compareWith parameter is required");

    // Both still pending: nothing to compare.
    let uri = format!("/api/observations/{}/compare-visual?compareWith={}", ids[0], ids[1]);
    let (status, body) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Both observations must have screenshots to compare");

    let uri = format!("/api/observations/{}/compare-text?compareWith={}", ids[0], ids[1]);
    let (status, _) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Someone else's observation does not exist as far as the caller knows.
    let uri = format!("/api/observations/{}/compare-text?compareWith={}", ids[0], theirs[0]);
    let (status, _) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_compare_text_reads_previous_to_current() {
    let app = app(active());
    let (_, token) = app.signup("a@example.com").await;
    let ids = app.observe(&token, &["US-CA", "US-NY"]).await;
    let (current, previous) = (&ids[1], &ids[0]);

    app.complete(previous, None, Some("Buy now for $10 today")).await;
    app.complete(current, None, Some("Buy now for $8 today")).await;

    let uri = format!("/api/observations/{}/compare-text?compareWith={}", current, previous);
    let (status, body) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let comparison = &body["comparison"];
    assert_eq!(comparison["hasChanges"], true);
    assert_eq!(comparison["removedText"], "$10");
    assert_eq!(comparison["addedText"], "$8");
    assert!(comparison["changes"].as_array().unwrap().len() >= 3);
    assert_eq!(body["current"]["text_content"], "Buy now for $8 today");
    assert!(body["current"].get("screenshot_ref").is_none());
}

#[tokio::test]
async fn test_billing_webhook() {
    let app = app(active());
    let (account_id, _) = app.signup("payer@example.com").await;

    let send = |token: Option<&'static str>, body: Value| {
        let router = app.router.clone();
        async move {
            let mut builder = Request::post("/api/billing/webhook")
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(token) = token {
                builder = builder.header(WEBHOOK_TOKEN_HEADER, token);
            }
            let response = router
                .oneshot(builder.body(Body::from(body.to_string())).unwrap())
                .await
                .unwrap();
            response.status()
        }
    };

    let upgrade = json!({
        "type": "checkout.completed",
        "data": { "email": "payer@example.com", "plan": "pro" }
    });
    assert_eq!(send(None, upgrade.clone()).await, StatusCode::UNAUTHORIZED);
    assert_eq!(send(Some("wrong"), upgrade.clone()).await, StatusCode::UNAUTHORIZED);
    assert_eq!(send(Some("whsec"), upgrade).await, StatusCode::OK);

    let account = app.state.accounts.get(&account_id).unwrap().unwrap();
    assert_eq!(account.plan, viewtrace_common::Plan::Pro);
    assert_eq!(account.observations_limit, 200);

    let ignored = json!({ "type": "invoice.paid", "data": {} });
    assert_eq!(send(Some("whsec"), ignored).await, StatusCode::OK);

    let deleted = json!({ "type": "subscription.deleted", "data": { "account_id": account_id } });
    assert_eq!(send(Some("whsec"), deleted).await, StatusCode::OK);
    let account = app.state.accounts.get(&account_id).unwrap().unwrap();
    assert_eq!(
        account.subscription_status,
        viewtrace_common::SubscriptionStatus::Canceled
    );
}

#[tokio::test]
async fn test_webhooks_rejected_without_configured_token() {
    let app = app(BillingConfig::default());
    let (status, _) = app
        .send(
            Method::POST,
            "/api/billing/webhook",
            None,
            Some(json!({ "type": "subscription.deleted", "data": {} })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_artifacts_reject_bad_keys() {
    let app = app(active());
    for uri in ["/artifacts/missing.png", "/artifacts/..%2Fsecret", "/artifacts/.hidden"] {
        let response = app
            .router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}
