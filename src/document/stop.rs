//! Run Stop - the document that closes a run

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{new_uid, timestamp_now};

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitStatus {
    /// Run completed normally.
    Success,
    /// Run terminated with an error.
    Failure,
}

/// Run Stop closes a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStop {
    uid: String,
    time: f64,
    run_start: String,
    exit_status: ExitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl RunStop {
    /// Create a stop for `run_start` with a fresh uid and the current time.
    #[must_use]
    pub fn new(run_start: impl Into<String>, exit_status: ExitStatus) -> Self {
        Self {
            uid: new_uid(),
            time: timestamp_now(),
            run_start: run_start.into(),
            exit_status,
            reason: None,
            extra: Map::new(),
        }
    }

    /// Attach a human-readable reason for the exit status.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Get the stop uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Get the stop time.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Get the uid of the run this stop closes.
    #[must_use]
    pub fn run_start(&self) -> &str {
        &self.run_start
    }

    /// Get the exit status.
    #[must_use]
    pub const fn exit_status(&self) -> ExitStatus {
        self.exit_status
    }

    /// Get the reason, if one was recorded.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Get the free-form extension fields.
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}
