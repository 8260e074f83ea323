//! Observation lifecycle state machine
//!
//! ```text
//!            claim              complete
//!  pending ─────────► running ───────────► completed
//!     │  ▲               │  │
//!     │  │ requeue       │  │ fail
//!     │  └───────────────┘  ▼
//!     │ fail             failed ◄──── pending
//!     ▼
//!  cancelled ◄─── cancel (pending | running)
//!
//!  retry: failed | cancelled ─► pending
//! ```
//!
//! Persisted transitions are applied as conditional updates whose
//! `WHERE status IN (...)` clause is built from [`Transition::sources`], so
//! the table below is the only place the legal moves are spelled out.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Observation processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl Default for ObservationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ObservationStatus {
    pub const ALL: [ObservationStatus; 5] = [
        ObservationStatus::Pending,
        ObservationStatus::Running,
        ObservationStatus::Completed,
        ObservationStatus::Failed,
        ObservationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationStatus::Pending => "pending",
            ObservationStatus::Running => "running",
            ObservationStatus::Completed => "completed",
            ObservationStatus::Failed => "failed",
            ObservationStatus::Cancelled => "cancelled",
        }
    }

    /// Pending or running.
    pub fn is_active(&self) -> bool {
        matches!(self, ObservationStatus::Pending | ObservationStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether a user may cancel from this status.
    pub fn can_cancel(&self) -> bool {
        Transition::Cancel.allows(*self)
    }

    /// Whether a user may retry from this status.
    pub fn can_retry(&self) -> bool {
        Transition::Retry.allows(*self)
    }

    /// Apply a transition, returning the new status.
    pub fn apply(self, transition: Transition) -> Result<ObservationStatus> {
        if transition.allows(self) {
            Ok(transition.target())
        } else {
            Err(Error::InvalidStateTransition {
                from: self,
                to: transition,
            })
        }
    }
}

impl std::fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObservationStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown observation status: {}", s)),
        }
    }
}

/// A move between two observation statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Worker takes ownership of a pending observation.
    Claim,
    /// Capture succeeded and result fields are populated.
    Complete,
    /// Unrecoverable error during setup, navigation, capture or upload.
    Fail,
    /// User-initiated.
    Cancel,
    /// User-initiated; clears every result field.
    Retry,
    /// Reconciler hands a stale claim back to the queue.
    Requeue,
}

impl Transition {
    /// Statuses this transition may start from.
    pub fn sources(&self) -> &'static [ObservationStatus] {
        use ObservationStatus::*;
        match self {
            Transition::Claim => &[Pending],
            Transition::Complete => &[Running],
            Transition::Fail => &[Pending, Running],
            Transition::Cancel => &[Pending, Running],
            Transition::Retry => &[Failed, Cancelled],
            Transition::Requeue => &[Running],
        }
    }

    pub fn target(&self) -> ObservationStatus {
        match self {
            Transition::Claim => ObservationStatus::Running,
            Transition::Complete => ObservationStatus::Completed,
            Transition::Fail => ObservationStatus::Failed,
            Transition::Cancel => ObservationStatus::Cancelled,
            Transition::Retry | Transition::Requeue => ObservationStatus::Pending,
        }
    }

    pub fn allows(&self, from: ObservationStatus) -> bool {
        self.sources().contains(&from)
    }

    /// Whether the transition wipes `screenshot_ref`, `text_content`,
    /// `result_status` and `captured_at`.
    pub fn clears_results(&self) -> bool {
        matches!(self, Transition::Retry | Transition::Requeue)
    }

    /// Verb used in user-facing precondition errors.
    pub fn action(&self) -> &'static str {
        match self {
            Transition::Claim => "claim",
            Transition::Complete => "complete",
            Transition::Fail => "fail",
            Transition::Cancel => "cancel",
            Transition::Retry => "retry",
            Transition::Requeue => "requeue",
        }
    }
}
