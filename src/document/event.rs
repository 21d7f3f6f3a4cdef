//! Event - one row of data in an event stream

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{new_uid, timestamp_now};

/// Event carries one reading of every field of its stream.
///
/// `filled` is source-side bookkeeping: it marks fields whose literal value
/// is present (`true`) or still a datum reference awaiting retrieval
/// (`false`). It is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    uid: String,
    time: f64,
    descriptor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq_num: Option<u64>,
    #[serde(default)]
    data: BTreeMap<String, Value>,
    #[serde(default)]
    timestamps: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    filled: BTreeMap<String, bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Event {
    /// Create a builder for an event of `descriptor`.
    #[must_use]
    pub fn builder(descriptor: impl Into<String>) -> EventBuilder {
        EventBuilder::new(descriptor)
    }

    /// Get the event uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Get the event time.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Get the uid of the owning descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Get the sequence number within the stream.
    #[must_use]
    pub const fn seq_num(&self) -> Option<u64> {
        self.seq_num
    }

    /// Get the data values.
    #[must_use]
    pub const fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Get the per-field timestamps.
    #[must_use]
    pub const fn timestamps(&self) -> &BTreeMap<String, f64> {
        &self.timestamps
    }

    /// Get the fill bookkeeping.
    #[must_use]
    pub const fn filled(&self) -> &BTreeMap<String, bool> {
        &self.filled
    }

    /// Get the free-form extension fields.
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Copy with a fresh uid, pointing at `descriptor`, carrying `data`.
    ///
    /// Time, timestamps, sequence number and extension fields are kept.
    #[must_use]
    pub fn derive(&self, descriptor: impl Into<String>, data: BTreeMap<String, Value>) -> Self {
        Self {
            uid: new_uid(),
            time: self.time,
            descriptor: descriptor.into(),
            seq_num: self.seq_num,
            data,
            timestamps: self.timestamps.clone(),
            filled: self.filled.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Copy with `data` replaced and everything else, uid included, kept.
    #[must_use]
    pub fn with_data(&self, data: BTreeMap<String, Value>) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// Copy with the fill bookkeeping replaced.
    #[must_use]
    pub fn with_filled(&self, filled: BTreeMap<String, bool>) -> Self {
        Self {
            filled,
            ..self.clone()
        }
    }

    /// Copy keeping only the fields named in `fields`.
    ///
    /// Values, timestamps and fill bookkeeping are narrowed together.
    #[must_use]
    pub fn retain_fields(&self, fields: &BTreeSet<String>) -> Self {
        let mut out = self.clone();
        out.data.retain(|name, _| fields.contains(name));
        out.timestamps.retain(|name, _| fields.contains(name));
        out.filled.retain(|name, _| fields.contains(name));
        out
    }

    /// Copy without fill bookkeeping, as it is persisted.
    #[must_use]
    pub fn without_filled(&self) -> Self {
        self.with_filled(BTreeMap::new())
    }
}

/// Builder for `Event`.
#[derive(Debug)]
pub struct EventBuilder {
    uid: String,
    time: f64,
    descriptor: String,
    seq_num: Option<u64>,
    data: BTreeMap<String, Value>,
    timestamps: BTreeMap<String, f64>,
    extra: Map<String, Value>,
}

impl EventBuilder {
    /// Create a builder with a fresh uid and the current time.
    #[must_use]
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            uid: new_uid(),
            time: timestamp_now(),
            descriptor: descriptor.into(),
            seq_num: None,
            data: BTreeMap::new(),
            timestamps: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Override the generated uid.
    #[must_use]
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    /// Override the event time.
    #[must_use]
    pub const fn time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    /// Set the sequence number.
    #[must_use]
    pub const fn seq_num(mut self, seq_num: u64) -> Self {
        self.seq_num = Some(seq_num);
        self
    }

    /// Set one field's value, timestamped with the event time.
    #[must_use]
    pub fn datum(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        self.timestamps.insert(name.clone(), self.time);
        self.data.insert(name, value);
        self
    }

    /// Set a free-form extension field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Build the `Event`.
    #[must_use]
    pub fn build(self) -> Event {
        Event {
            uid: self.uid,
            time: self.time,
            descriptor: self.descriptor,
            seq_num: self.seq_num,
            data: self.data,
            timestamps: self.timestamps,
            filled: BTreeMap::new(),
            extra: self.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derive_assigns_new_identity() {
        let event = Event::builder("d1")
            .time(5.0)
            .seq_num(1)
            .datum("x", json!(1))
            .build();
        let mut data = BTreeMap::new();
        data.insert("x".to_string(), json!(2));

        let derived = event.derive("d2", data);
        assert_ne!(derived.uid(), event.uid());
        assert_eq!(derived.descriptor(), "d2");
        assert_eq!(derived.time(), 5.0);
        assert_eq!(derived.timestamps(), event.timestamps());
        assert_eq!(derived.data()["x"], json!(2));
    }

    #[test]
    fn test_filled_not_serialized_when_empty() {
        let event = Event::builder("d1").uid("e1").time(1.0).build();
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("filled").is_none());

        let mut filled = BTreeMap::new();
        filled.insert("img".to_string(), false);
        let value = serde_json::to_value(event.with_filled(filled)).unwrap();
        assert_eq!(value["filled"], json!({"img": false}));
    }

    #[test]
    fn test_retain_fields_narrows_everything() {
        let mut filled = BTreeMap::new();
        filled.insert("img".to_string(), true);
        let event = Event::builder("d1")
            .datum("x", json!(1))
            .datum("img", json!([1, 2]))
            .build()
            .with_filled(filled);

        let keep: BTreeSet<String> = ["x".to_string()].into_iter().collect();
        let narrowed = event.retain_fields(&keep);
        assert_eq!(narrowed.uid(), event.uid());
        assert_eq!(narrowed.data().keys().collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(narrowed.timestamps().keys().collect::<Vec<_>>(), vec!["x"]);
        assert!(narrowed.filled().is_empty());
    }
}
