//! Viewtrace API client

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use viewtrace_common::{Account, Observation, ObservationStatus};
use viewtrace_diff::{Severity, TextComparison};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error body.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("No API token; pass --token or set VIEWTRACE_TOKEN")]
    MissingToken,
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Health {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Signup {
    pub account: Account,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountInfo {
    #[serde(flatten)]
    pub account: Account,
    pub remaining: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatedObservation {
    pub id: String,
    pub region: String,
    pub status: ObservationStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDetail {
    pub observation: Observation,
    pub related_observations: Vec<Observation>,
    pub history_observations: Vec<Observation>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Side {
    pub id: String,
    pub captured_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Comparison<T> {
    pub current: Side,
    pub previous: Side,
    pub comparison: T,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualReport {
    pub has_changes: bool,
    pub change_score: f64,
    pub change_percentage: f64,
    pub num_diff_pixels: u64,
    pub total_pixels: u64,
    pub change_severity: Severity,
    pub diff_image_url: Option<String>,
    pub days_diff: i64,
    pub time_diff: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextReport {
    #[serde(flatten)]
    pub result: TextComparison,
    pub days_diff: i64,
    pub time_diff: i64,
}

#[derive(Deserialize)]
struct ObservationList {
    observations: Vec<Observation>,
}

#[derive(Deserialize)]
struct CreatedList {
    observations: Vec<CreatedObservation>,
}

#[derive(Deserialize)]
struct Updated {
    observation: Observation,
}

/// Client for a Viewtrace server
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.token.as_deref().ok_or(ClientError::MissingToken)?;
        Ok(self.request(method, path).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        debug!("{} {}", status.as_u16(), response.url());

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn health(&self) -> Result<Health> {
        self.send(self.request(Method::GET, "/health")).await
    }

    pub async fn signup(&self, email: &str, name: &str, plan: &str) -> Result<Signup> {
        let body = json!({ "email": email, "name": name, "plan": plan });
        self.send(self.request(Method::POST, "/api/accounts").json(&body))
            .await
    }

    pub async fn me(&self) -> Result<AccountInfo> {
        self.send(self.authed(Method::GET, "/api/accounts/me")?)
            .await
    }

    pub async fn create_observations(
        &self,
        url: &str,
        regions: &[String],
    ) -> Result<Vec<CreatedObservation>> {
        let body = json!({ "url": url, "regions": regions });
        let created: CreatedList = self
            .send(self.authed(Method::POST, "/api/observations")?.json(&body))
            .await?;
        Ok(created.observations)
    }

    pub async fn list_observations(&self) -> Result<Vec<Observation>> {
        let list: ObservationList = self
            .send(self.authed(Method::GET, "/api/observations")?)
            .await?;
        Ok(list.observations)
    }

    pub async fn get_observation(&self, id: &str) -> Result<ObservationDetail> {
        self.send(self.authed(Method::GET, &format!("/api/observations/{}", id))?)
            .await
    }

    pub async fn cancel(&self, id: &str) -> Result<Observation> {
        let updated: Updated = self
            .send(self.authed(Method::POST, &format!("/api/observations/{}/cancel", id))?)
            .await?;
        Ok(updated.observation)
    }

    pub async fn retry(&self, id: &str) -> Result<Observation> {
        let updated: Updated = self
            .send(self.authed(Method::POST, &format!("/api/observations/{}/retry", id))?)
            .await?;
        Ok(updated.observation)
    }

    pub async fn compare_visual(&self, id: &str, with: &str) -> Result<Comparison<VisualReport>> {
        let path = format!("/api/observations/{}/compare-visual", id);
        self.send(self.authed(Method::GET, &path)?.query(&[("compareWith", with)]))
            .await
    }

    pub async fn compare_text(&self, id: &str, with: &str) -> Result<Comparison<TextReport>> {
        let path = format!("/api/observations/{}/compare-text", id);
        self.send(self.authed(Method::GET, &path)?.query(&[("compareWith", with)]))
            .await
    }
}
