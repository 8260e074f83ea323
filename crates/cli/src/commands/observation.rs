//! Observation commands

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use viewtrace_common::Observation;

use crate::client::ApiClient;
use crate::output::{
    print_info, print_item, print_json, print_list, print_success, print_warning, status_label,
    OutputFormat, TableDisplay,
};

#[derive(Args)]
pub struct ObserveArgs {
    /// Page to render
    pub url: String,

    /// Region code; repeat for several regions
    #[arg(short, long = "region", required = true)]
    pub regions: Vec<String>,

    /// Poll until every observation reaches a terminal status
    #[arg(short, long)]
    pub wait: bool,

    /// Seconds between polls
    #[arg(long, default_value = "2")]
    pub interval: u64,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "300")]
    pub timeout: u64,
}

/// Observation display wrapper for serialization
#[derive(Serialize)]
pub struct ObservationDisplay {
    pub id: String,
    pub url: String,
    pub region: String,
    #[serde(skip)]
    status_raw: viewtrace_common::ObservationStatus,
    pub status: String,
    pub result: String,
    pub screenshot: String,
    pub captured_at: String,
}

impl From<&Observation> for ObservationDisplay {
    fn from(obs: &Observation) -> Self {
        Self {
            id: obs.id.clone(),
            url: obs.url.clone(),
            region: obs.region.clone(),
            status_raw: obs.status,
            status: obs.status.to_string(),
            result: obs
                .result_status
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
            screenshot: obs.screenshot_ref.clone().unwrap_or_else(|| "-".to_string()),
            captured_at: obs
                .captured_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl TableDisplay for ObservationDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "URL", "Region", "Status", "Result", "Captured"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.url.clone(),
            self.region.clone(),
            status_label(self.status_raw),
            self.result.clone(),
            self.captured_at.clone(),
        ]
    }
}

fn displays(observations: &[Observation]) -> Vec<ObservationDisplay> {
    observations.iter().map(ObservationDisplay::from).collect()
}

pub async fn observe(args: ObserveArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let created = client.create_observations(&args.url, &args.regions).await?;
    if !args.wait {
        match format {
            OutputFormat::Json => print_json(&created),
            OutputFormat::Table => {
                print_success(&format!("Requested {} observation(s)", created.len()));
                for obs in &created {
                    println!("  {}  {}  {}", obs.id, obs.region, status_label(obs.status));
                }
            }
        }
        return Ok(());
    }

    if format == OutputFormat::Table {
        print_info(&format!(
            "Waiting for {} observation(s) of {}",
            created.len(),
            args.url
        ));
    }

    let ids: Vec<String> = created.into_iter().map(|c| c.id).collect();
    let finished = wait_for(client, &ids, args.interval, args.timeout, format).await?;
    print_list(&displays(&finished), format);

    let failed = finished
        .iter()
        .filter(|o| o.status == viewtrace_common::ObservationStatus::Failed)
        .count();
    if failed > 0 && format == OutputFormat::Table {
        print_warning(&format!("{} observation(s) failed", failed));
    }
    Ok(())
}

/// Poll until every id is terminal, printing status changes as they happen.
async fn wait_for(
    client: &ApiClient,
    ids: &[String],
    interval: u64,
    timeout: u64,
    format: OutputFormat,
) -> Result<Vec<Observation>> {
    let started = Instant::now();
    let mut last_seen = HashMap::new();

    loop {
        let mut current = Vec::with_capacity(ids.len());
        for id in ids {
            let detail = client.get_observation(id).await?;
            let obs = detail.observation;
            if format == OutputFormat::Table && last_seen.get(id) != Some(&obs.status) {
                println!("  {} {} → {}", obs.region.bold(), obs.id.dimmed(), status_label(obs.status));
            }
            last_seen.insert(id.clone(), obs.status);
            current.push(obs);
        }

        if current.iter().all(|o| o.status.is_terminal()) {
            return Ok(current);
        }
        if started.elapsed() >= Duration::from_secs(timeout) {
            bail!("Timed out after {}s waiting for observations", timeout);
        }
        tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
    }
}

pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let observations = client.list_observations().await?;
    print_list(&displays(&observations), format);
    Ok(())
}

pub async fn show(id: &str, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let detail = client.get_observation(id).await?;
    if format == OutputFormat::Json {
        print_json(&detail);
        return Ok(());
    }

    print_item(&ObservationDisplay::from(&detail.observation), format);
    if let Some(screenshot) = &detail.observation.screenshot_ref {
        println!("Screenshot: {}", screenshot);
    }
    if let Some(text) = &detail.observation.text_content {
        let words = viewtrace_common::text::word_count(text);
        println!("Text: {} words", words);
    }

    let related: Vec<&Observation> = detail
        .related_observations
        .iter()
        .filter(|o| o.id != detail.observation.id)
        .collect();
    if !related.is_empty() {
        println!();
        println!("{}", "Other regions".bold());
        let rows: Vec<ObservationDisplay> = related.into_iter().map(ObservationDisplay::from).collect();
        print_list(&rows, format);
    }
    if !detail.history_observations.is_empty() {
        println!();
        println!("{}", "History".bold());
        print_list(&displays(&detail.history_observations), format);
    }
    Ok(())
}

pub async fn cancel(id: &str, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let obs = client.cancel(id).await?;
    if format == OutputFormat::Table {
        print_success(&format!("Observation {} cancelled", obs.id));
    }
    print_item(&ObservationDisplay::from(&obs), format);
    Ok(())
}

pub async fn retry(id: &str, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let obs = client.retry(id).await?;
    if format == OutputFormat::Table {
        print_success(&format!("Observation {} queued for retry", obs.id));
    }
    print_item(&ObservationDisplay::from(&obs), format);
    Ok(())
}
