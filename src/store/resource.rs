//! Resource and Datum records for externally stored data

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resource identifies a unit of externally stored data.
///
/// `spec` names the storage format, `root` + `resource_path` locate the
/// content, and `resource_kwargs` carry format-specific constructor
/// arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    uid: String,
    spec: String,
    resource_path: String,
    #[serde(default)]
    root: String,
    #[serde(default)]
    resource_kwargs: Map<String, Value>,
}

impl Resource {
    /// Create a resource record.
    #[must_use]
    pub fn new(
        uid: impl Into<String>,
        spec: impl Into<String>,
        resource_path: impl Into<String>,
        root: impl Into<String>,
        resource_kwargs: Map<String, Value>,
    ) -> Self {
        Self {
            uid: uid.into(),
            spec: spec.into(),
            resource_path: resource_path.into(),
            root: root.into(),
            resource_kwargs,
        }
    }

    /// Get the resource uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Get the storage spec name.
    #[must_use]
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Get the path relative to `root`.
    #[must_use]
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Get the storage root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Get the format-specific arguments.
    #[must_use]
    pub const fn resource_kwargs(&self) -> &Map<String, Value> {
        &self.resource_kwargs
    }

    /// Location of the content: `root` joined with `resource_path`.
    #[must_use]
    pub fn full_path(&self) -> String {
        join_path(&self.root, &self.resource_path)
    }
}

/// Join a storage root and a relative path with a single separator.
#[must_use]
pub fn join_path(root: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if root.is_empty() {
        return path.to_string();
    }
    format!("{}/{}", root.trim_end_matches('/'), path)
}

/// Datum maps a reference id to a resource plus per-value arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Datum {
    datum_id: String,
    resource: String,
    #[serde(default)]
    datum_kwargs: Map<String, Value>,
}

impl Datum {
    /// Create a datum record.
    #[must_use]
    pub fn new(
        datum_id: impl Into<String>,
        resource: impl Into<String>,
        datum_kwargs: Map<String, Value>,
    ) -> Self {
        Self {
            datum_id: datum_id.into(),
            resource: resource.into(),
            datum_kwargs,
        }
    }

    /// Get the reference id events carry.
    #[must_use]
    pub fn datum_id(&self) -> &str {
        &self.datum_id
    }

    /// Get the uid of the referenced resource.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Get the per-value retrieval arguments.
    #[must_use]
    pub const fn datum_kwargs(&self) -> &Map<String, Value> {
        &self.datum_kwargs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_path_joins_once() {
        let res = Resource::new("r1", "JSON_FRAMES", "/a/b.frames", "/data/", Map::new());
        assert_eq!(res.full_path(), "/data/a/b.frames");

        let res = Resource::new("r1", "JSON_FRAMES", "b.frames", "", Map::new());
        assert_eq!(res.full_path(), "b.frames");
    }
}
