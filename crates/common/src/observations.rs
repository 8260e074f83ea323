//! Observation persistence
//!
//! Every status change goes through [`ObservationStore::apply`], a single
//! conditional `UPDATE` guarded by the transition's legal source statuses.
//! Whoever wins that update owns the move; a caller that loses the race sees
//! zero affected rows and never overwrites the newer status.

use crate::db::{from_millis, now_millis, parse_col, Database};
use crate::lifecycle::{ObservationStatus, Transition};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// How many rows the history and listing queries return.
pub const HISTORY_LIMIT: usize = 50;

/// Classification recorded on completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Screenshot and text were both captured.
    Observed,
    /// Degraded capture: the screenshot exists but text (or screenshot
    /// content) came back empty.
    NoIssues,
    DifferenceObserved,
}

impl ResultStatus {
    pub fn classify(screenshot_len: usize, text: Option<&str>) -> Self {
        let has_text = text.map(|t| !t.trim().is_empty()).unwrap_or(false);
        if screenshot_len > 0 && has_text {
            ResultStatus::Observed
        } else {
            ResultStatus::NoIssues
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Observed => write!(f, "observed"),
            Self::NoIssues => write!(f, "no_issues"),
            Self::DifferenceObserved => write!(f, "difference_observed"),
        }
    }
}

impl std::str::FromStr for ResultStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "observed" => Ok(Self::Observed),
            "no_issues" => Ok(Self::NoIssues),
            "difference_observed" => Ok(Self::DifferenceObserved),
            _ => Err(format!("unknown result status: {}", s)),
        }
    }
}

/// One request to render a URL under a region's conditions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub owner_id: String,
    pub url: String,
    pub region: String,
    pub status: ObservationStatus,
    pub result_status: Option<ResultStatus>,
    pub screenshot_ref: Option<String>,
    pub text_content: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    /// Worker diagnostics; kept out of API responses.
    #[serde(skip)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Observation {
    /// Whether any of the four result fields is set.
    pub fn has_results(&self) -> bool {
        self.result_status.is_some()
            || self.screenshot_ref.is_some()
            || self.text_content.is_some()
            || self.captured_at.is_some()
    }

    /// Capture time, or creation time for observations that never captured.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.captured_at.unwrap_or(self.created_at)
    }
}

/// Everything a successful capture writes
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub screenshot_ref: String,
    pub text_content: Option<String>,
    pub result_status: ResultStatus,
    pub captured_at: DateTime<Utc>,
}

const OBSERVATION_COLUMNS: &str = "id, owner_id, url, region, status, result_status, \
     screenshot_ref, text_content, captured_at, failure_reason, created_at, updated_at";

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Observation> {
    let result_status: Option<String> = row.get(5)?;
    let result_status = match result_status {
        Some(_) => Some(parse_col(row, 5)?),
        None => None,
    };
    let captured_at: Option<i64> = row.get(8)?;
    Ok(Observation {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        url: row.get(2)?,
        region: row.get(3)?,
        status: parse_col(row, 4)?,
        result_status,
        screenshot_ref: row.get(6)?,
        text_content: row.get(7)?,
        captured_at: captured_at.map(from_millis),
        failure_reason: row.get(9)?,
        created_at: from_millis(row.get(10)?),
        updated_at: from_millis(row.get(11)?),
    })
}

/// `status IN ('a', 'b')` for a transition's legal sources.
fn source_clause(transition: Transition) -> String {
    let statuses: Vec<String> = transition
        .sources()
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
    format!("status IN ({})", statuses.join(", "))
}

/// Observation persistence
#[derive(Clone)]
pub struct ObservationStore {
    db: Database,
}

impl ObservationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create one pending observation per region, in order, atomically.
    pub fn create_batch(
        &self,
        owner_id: &str,
        url: &str,
        regions: &[String],
    ) -> Result<Vec<Observation>> {
        if regions.is_empty() {
            return Err(Error::InvalidInput("at least one region is required".into()));
        }

        let conn = self.db.connection();
        let mut conn = conn.lock();
        let tx = conn.transaction()?;
        let mut created = Vec::with_capacity(regions.len());
        // Later rows get a later timestamp so "most recent" ordering is stable.
        let base = now_millis();
        for (offset, region) in regions.iter().enumerate() {
            let id = Uuid::new_v4().to_string();
            let now = base + offset as i64;
            tx.execute(
                "INSERT INTO observations (id, owner_id, url, region, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    owner_id,
                    url,
                    region,
                    ObservationStatus::Pending.as_str(),
                    now
                ],
            )?;
            created.push(Observation {
                id,
                owner_id: owner_id.to_string(),
                url: url.to_string(),
                region: region.clone(),
                status: ObservationStatus::Pending,
                result_status: None,
                screenshot_ref: None,
                text_content: None,
                captured_at: None,
                failure_reason: None,
                created_at: from_millis(now),
                updated_at: from_millis(now),
            });
        }
        tx.commit()?;

        info!(owner_id = %owner_id, url = %url, count = created.len(), "Created observations");
        Ok(created)
    }

    /// Unscoped lookup for the worker and reconciler.
    pub fn get(&self, id: &str) -> Result<Option<Observation>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let obs = conn
            .query_row(
                &format!("SELECT {} FROM observations WHERE id = ?1", OBSERVATION_COLUMNS),
                params![id],
                observation_from_row,
            )
            .optional()?;
        Ok(obs)
    }

    /// Owner-scoped lookup. Missing and foreign rows are indistinguishable.
    pub fn get_owned(&self, id: &str, owner_id: &str) -> Result<Observation> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM observations WHERE id = ?1 AND owner_id = ?2",
                OBSERVATION_COLUMNS
            ),
            params![id, owner_id],
            observation_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::not_found("Observation", id))
    }

    /// The owner's most recent observations, newest first.
    pub fn list_for_owner(&self, owner_id: &str, limit: usize) -> Result<Vec<Observation>> {
        self.query(
            &format!(
                "SELECT {} FROM observations WHERE owner_id = ?1
                 ORDER BY created_at DESC, id LIMIT ?2",
                OBSERVATION_COLUMNS
            ),
            params![owner_id, limit as i64],
        )
    }

    /// Same owner and URL, the most recent observation for each region,
    /// ordered by region.
    pub fn related(&self, obs: &Observation) -> Result<Vec<Observation>> {
        let rows = self.query(
            &format!(
                "SELECT {} FROM observations WHERE owner_id = ?1 AND url = ?2
                 ORDER BY region ASC, created_at DESC, id",
                OBSERVATION_COLUMNS
            ),
            params![obs.owner_id, obs.url],
        )?;
        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .filter(|o| seen.insert(o.region.clone()))
            .collect())
    }

    /// Same owner, URL and region, excluding `obs` itself, newest first.
    pub fn history(&self, obs: &Observation) -> Result<Vec<Observation>> {
        self.query(
            &format!(
                "SELECT {} FROM observations
                 WHERE owner_id = ?1 AND url = ?2 AND region = ?3 AND id != ?4
                 ORDER BY created_at DESC, id LIMIT ?5",
                OBSERVATION_COLUMNS
            ),
            params![obs.owner_id, obs.url, obs.region, obs.id, HISTORY_LIMIT as i64],
        )
    }

    pub fn status(&self, id: &str) -> Result<Option<ObservationStatus>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let status = conn
            .query_row(
                "SELECT status FROM observations WHERE id = ?1",
                params![id],
                |row| parse_col::<ObservationStatus>(row, 0),
            )
            .optional()?;
        Ok(status)
    }

    /// Pending observations, oldest first.
    pub fn pending_ids(&self) -> Result<Vec<String>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM observations WHERE status = 'pending' ORDER BY created_at ASC, id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Running observations whose last update is older than `cutoff_ms`.
    pub fn stale_running_ids(&self, cutoff_ms: i64) -> Result<Vec<String>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM observations WHERE status = 'running' AND updated_at < ?1
             ORDER BY updated_at ASC",
        )?;
        let ids = stmt
            .query_map(params![cutoff_ms], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Apply a transition that carries no payload. Returns whether the row
    /// moved; `false` means the row is gone or was not in a source status.
    pub fn apply(&self, id: &str, transition: Transition) -> Result<bool> {
        let sql = if transition.clears_results() {
            format!(
                "UPDATE observations
                 SET status = ?2, updated_at = ?3, result_status = NULL, screenshot_ref = NULL,
                     text_content = NULL, captured_at = NULL, failure_reason = NULL
                 WHERE id = ?1 AND {}",
                source_clause(transition)
            )
        } else {
            format!(
                "UPDATE observations SET status = ?2, updated_at = ?3 WHERE id = ?1 AND {}",
                source_clause(transition)
            )
        };

        let conn = self.db.connection();
        let conn = conn.lock();
        let updated = conn.execute(
            &sql,
            params![id, transition.target().as_str(), now_millis()],
        )?;
        if updated == 1 {
            debug!(observation_id = %id, "{} -> {}", transition.action(), transition.target());
        }
        Ok(updated == 1)
    }

    /// `pending -> running`. At most one caller wins per pending period.
    pub fn claim(&self, id: &str) -> Result<bool> {
        self.apply(id, Transition::Claim)
    }

    /// `running -> completed` with every result field. Does nothing if the
    /// observation was cancelled in the meantime.
    pub fn complete(&self, id: &str, outcome: &CaptureOutcome) -> Result<bool> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE observations
                 SET status = ?2, result_status = ?3, screenshot_ref = ?4, text_content = ?5,
                     captured_at = ?6, failure_reason = NULL, updated_at = ?7
                 WHERE id = ?1 AND {}",
                source_clause(Transition::Complete)
            ),
            params![
                id,
                Transition::Complete.target().as_str(),
                outcome.result_status.to_string(),
                outcome.screenshot_ref,
                outcome.text_content,
                outcome.captured_at.timestamp_millis(),
                now_millis(),
            ],
        )?;
        Ok(updated == 1)
    }

    /// `pending|running -> failed`, keeping the reason for diagnostics.
    pub fn fail(&self, id: &str, reason: &str) -> Result<bool> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE observations SET status = ?2, failure_reason = ?3, updated_at = ?4
                 WHERE id = ?1 AND {}",
                source_clause(Transition::Fail)
            ),
            params![id, Transition::Fail.target().as_str(), reason, now_millis()],
        )?;
        Ok(updated == 1)
    }

    /// `running -> pending` for a claim that stopped making progress. The
    /// staleness check is repeated in the update so a claim that moved on
    /// since the sweep read it is left alone.
    pub fn requeue_stale(&self, id: &str, cutoff_ms: i64) -> Result<bool> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE observations
                 SET status = ?2, updated_at = ?3, result_status = NULL, screenshot_ref = NULL,
                     text_content = NULL, captured_at = NULL
                 WHERE id = ?1 AND updated_at < ?4 AND {}",
                source_clause(Transition::Requeue)
            ),
            params![
                id,
                Transition::Requeue.target().as_str(),
                now_millis(),
                cutoff_ms
            ],
        )?;
        Ok(updated == 1)
    }

    /// User cancel.
    pub fn cancel(&self, id: &str, owner_id: &str) -> Result<Observation> {
        self.user_transition(id, owner_id, Transition::Cancel)
    }

    /// User retry; clears all result fields.
    pub fn retry(&self, id: &str, owner_id: &str) -> Result<Observation> {
        self.user_transition(id, owner_id, Transition::Retry)
    }

    fn user_transition(
        &self,
        id: &str,
        owner_id: &str,
        transition: Transition,
    ) -> Result<Observation> {
        let current = self.get_owned(id, owner_id)?;
        if !transition.allows(current.status) {
            return Err(Error::Precondition {
                action: transition.action(),
                status: current.status,
            });
        }

        if !self.apply(id, transition)? {
            // Lost a race; report whatever the row moved to.
            let now = self.get_owned(id, owner_id)?;
            return Err(Error::Precondition {
                action: transition.action(),
                status: now.status,
            });
        }

        info!(observation_id = %id, "Observation {} by owner", transition.target());
        self.get_owned(id, owner_id)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Observation>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, observation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
