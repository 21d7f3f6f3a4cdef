//! Run Start - the document that opens a run

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{new_uid, timestamp_now};

/// Run Start opens a run. It is created exactly once per run.
///
/// Derived runs (produced by a stream operator) record the uids of the
/// runs they were computed from in `parents`, and a free-form description
/// of the operation in `provenance`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStart {
    uid: String,
    time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scan_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provenance: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl RunStart {
    /// Create a run start with the given identity and no optional fields.
    #[must_use]
    pub fn new(uid: impl Into<String>, time: f64) -> Self {
        Self {
            uid: uid.into(),
            time,
            scan_id: None,
            parents: Vec::new(),
            provenance: None,
            extra: Map::new(),
        }
    }

    /// Create a builder with a fresh uid and the current time.
    #[must_use]
    pub fn builder() -> RunStartBuilder {
        RunStartBuilder::default()
    }

    /// Get the run uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Get the creation time (seconds since the epoch).
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Get the scan identifier, if the run has one.
    #[must_use]
    pub const fn scan_id(&self) -> Option<i64> {
        self.scan_id
    }

    /// Get the uids of the runs this run was derived from.
    #[must_use]
    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    /// Get the provenance record of a derived run.
    #[must_use]
    pub const fn provenance(&self) -> Option<&Value> {
        self.provenance.as_ref()
    }

    /// Get the free-form extension fields.
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Look up a field by name, core or extension.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "uid" => Some(Value::from(self.uid.as_str())),
            "time" => Some(Value::from(self.time)),
            "scan_id" => self.scan_id.map(Value::from),
            "parents" => Some(Value::from(self.parents.clone())),
            "provenance" => self.provenance.clone(),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// Builder for `RunStart`.
#[derive(Debug)]
pub struct RunStartBuilder {
    uid: String,
    time: f64,
    scan_id: Option<i64>,
    parents: Vec<String>,
    provenance: Option<Value>,
    extra: Map<String, Value>,
}

impl Default for RunStartBuilder {
    fn default() -> Self {
        Self {
            uid: new_uid(),
            time: timestamp_now(),
            scan_id: None,
            parents: Vec::new(),
            provenance: None,
            extra: Map::new(),
        }
    }
}

impl RunStartBuilder {
    /// Override the generated uid.
    #[must_use]
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    /// Override the creation time.
    #[must_use]
    pub const fn time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    /// Set the scan identifier.
    #[must_use]
    pub const fn scan_id(mut self, scan_id: i64) -> Self {
        self.scan_id = Some(scan_id);
        self
    }

    /// Add a parent run uid.
    #[must_use]
    pub fn parent(mut self, uid: impl Into<String>) -> Self {
        self.parents.push(uid.into());
        self
    }

    /// Set the provenance record.
    #[must_use]
    pub fn provenance(mut self, provenance: Value) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Set a free-form extension field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Build the `RunStart`.
    #[must_use]
    pub fn build(self) -> RunStart {
        RunStart {
            uid: self.uid,
            time: self.time,
            scan_id: self.scan_id,
            parents: self.parents,
            provenance: self.provenance,
            extra: self.extra,
        }
    }
}
