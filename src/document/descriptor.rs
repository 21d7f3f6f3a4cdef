//! Event Descriptor - schema of one event stream within a run

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{new_uid, timestamp_now};

/// Stream name used when a descriptor does not carry one.
pub const DEFAULT_STREAM_NAME: &str = "primary";

fn default_stream_name() -> String {
    DEFAULT_STREAM_NAME.to_string()
}

/// Schema of one data field.
///
/// `external` is set when the field's values are stored outside the
/// metadata store and events carry a datum reference instead of the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    external: Option<String>,
    #[serde(flatten)]
    schema: Map<String, Value>,
}

impl DataKey {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one schema attribute (e.g. `dtype`, `shape`, `source`).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.schema.insert(name.into(), value);
        self
    }

    /// Whether values of this field are stored externally.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        self.external.is_some()
    }

    /// External storage tag, if any.
    #[must_use]
    pub fn external(&self) -> Option<&str> {
        self.external.as_deref()
    }

    /// Schema attributes other than the external tag.
    #[must_use]
    pub const fn schema(&self) -> &Map<String, Value> {
        &self.schema
    }

    /// Copy of this schema annotated as externally stored under `tag`.
    #[must_use]
    pub fn marked_external(&self, tag: impl Into<String>) -> Self {
        Self {
            external: Some(tag.into()),
            schema: self.schema.clone(),
        }
    }

    /// Copy of this schema with the external tag cleared.
    #[must_use]
    pub fn internal(&self) -> Self {
        Self {
            external: None,
            schema: self.schema.clone(),
        }
    }

    /// Copy of this schema with `fragment` merged over it.
    ///
    /// Keys in the fragment replace keys of the same name. An `external`
    /// string in the fragment sets the external tag; `external: null`
    /// clears it.
    #[must_use]
    pub fn merged(&self, fragment: &Map<String, Value>) -> Self {
        let mut out = self.clone();
        for (key, value) in fragment {
            if key == "external" {
                out.external = value.as_str().map(str::to_string);
            } else {
                out.schema.insert(key.clone(), value.clone());
            }
        }
        out
    }
}

/// Event Descriptor declares the schema of one named event stream.
///
/// A descriptor links to its run by `run_start`; every event of the stream
/// links back to the descriptor by uid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventDescriptor {
    uid: String,
    time: f64,
    run_start: String,
    #[serde(default = "default_stream_name")]
    name: String,
    #[serde(default)]
    data_keys: BTreeMap<String, DataKey>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl EventDescriptor {
    /// Create a builder for a descriptor belonging to `run_start`.
    #[must_use]
    pub fn builder(run_start: impl Into<String>) -> EventDescriptorBuilder {
        EventDescriptorBuilder::new(run_start)
    }

    /// Get the descriptor uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Get the creation time.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Get the uid of the owning run start.
    #[must_use]
    pub fn run_start(&self) -> &str {
        &self.run_start
    }

    /// Get the stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the field schemas.
    #[must_use]
    pub const fn data_keys(&self) -> &BTreeMap<String, DataKey> {
        &self.data_keys
    }

    /// Get the free-form extension fields.
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Names of fields declared as externally stored.
    pub fn external_keys(&self) -> impl Iterator<Item = &str> {
        self.data_keys
            .iter()
            .filter(|(_, key)| key.is_external())
            .map(|(name, _)| name.as_str())
    }

    /// Copy of this descriptor with its field schemas replaced.
    #[must_use]
    pub fn with_data_keys(&self, data_keys: BTreeMap<String, DataKey>) -> Self {
        Self {
            uid: self.uid.clone(),
            time: self.time,
            run_start: self.run_start.clone(),
            name: self.name.clone(),
            data_keys,
            extra: self.extra.clone(),
        }
    }
}

/// Builder for `EventDescriptor`.
#[derive(Debug)]
pub struct EventDescriptorBuilder {
    uid: String,
    time: f64,
    run_start: String,
    name: String,
    data_keys: BTreeMap<String, DataKey>,
    extra: Map<String, Value>,
}

impl EventDescriptorBuilder {
    /// Create a builder with a fresh uid, the current time and the default
    /// stream name.
    #[must_use]
    pub fn new(run_start: impl Into<String>) -> Self {
        Self {
            uid: new_uid(),
            time: timestamp_now(),
            run_start: run_start.into(),
            name: default_stream_name(),
            data_keys: BTreeMap::new(),
            extra: Map::new(),
        }
    }

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

    /// Set the stream name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Declare one field.
    #[must_use]
    pub fn data_key(mut self, name: impl Into<String>, key: DataKey) -> Self {
        self.data_keys.insert(name.into(), key);
        self
    }

    /// Replace all field declarations.
    #[must_use]
    pub fn data_keys(mut self, data_keys: BTreeMap<String, DataKey>) -> Self {
        self.data_keys = data_keys;
        self
    }

    /// Set a free-form extension field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Build the `EventDescriptor`.
    #[must_use]
    pub fn build(self) -> EventDescriptor {
        EventDescriptor {
            uid: self.uid,
            time: self.time,
            run_start: self.run_start,
            name: self.name,
            data_keys: self.data_keys,
            extra: self.extra,
        }
    }
}
