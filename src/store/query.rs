//! Run Query - equality filter over run starts

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::RunStart;

/// Equality query over run start fields.
///
/// All set criteria must hold for a run start to match. An empty query
/// matches every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uid_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scan_id: Option<i64>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl RunQuery {
    /// Create an empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Match the exact uid.
    #[must_use]
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Match uids beginning with `prefix`.
    #[must_use]
    pub fn uid_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.uid_prefix = Some(prefix.into());
        self
    }

    /// Match the scan identifier.
    #[must_use]
    pub const fn scan_id(mut self, scan_id: i64) -> Self {
        self.scan_id = Some(scan_id);
        self
    }

    /// Match any other start field by equality.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Whether no criteria are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uid.is_none()
            && self.uid_prefix.is_none()
            && self.scan_id.is_none()
            && self.fields.is_empty()
    }

    /// Whether `start` satisfies every criterion.
    #[must_use]
    pub fn matches(&self, start: &RunStart) -> bool {
        if let Some(uid) = &self.uid {
            if start.uid() != uid {
                return false;
            }
        }
        if let Some(prefix) = &self.uid_prefix {
            if !start.uid().starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(scan_id) = self.scan_id {
            if start.scan_id() != Some(scan_id) {
                return false;
            }
        }
        self.fields
            .iter()
            .all(|(name, value)| start.field(name).as_ref() == Some(value))
    }
}
