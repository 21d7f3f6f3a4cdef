//! In-memory blob store and the shared file namespace it writes into.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::resource::join_path;
use super::{BlobStore, Datum, Resource};
use crate::document::new_uid;
use crate::{Error, Result};

/// Storage spec of resources holding a sequence of JSON values.
///
/// Datums of such resources carry a `frame` index.
pub const FRAME_SPEC: &str = "JSON_FRAMES";

/// Options for [`BlobStore::copy_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Replace content already present at the destination path.
    #[serde(default)]
    pub overwrite: bool,
}

/// Shared in-memory file namespace.
///
/// Each "file" is a path holding a sequence of JSON frames. Several blob
/// stores can share one namespace, the way several stores share a disk.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: DashMap<String, Vec<Value>>,
}

impl MemoryFileSystem {
    /// Create an empty namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame to `path`, creating the file if needed.
    ///
    /// Returns the index of the new frame.
    pub fn append(&self, path: &str, frame: Value) -> u64 {
        let mut file = self.files.entry(path.to_string()).or_default();
        file.push(frame);
        (file.len() - 1) as u64
    }

    /// Read frame `index` of `path`.
    #[must_use]
    pub fn read(&self, path: &str, index: u64) -> Option<Value> {
        let file = self.files.get(path)?;
        let index = usize::try_from(index).ok()?;
        file.get(index).cloned()
    }

    /// Whether `path` exists.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if there are no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Copy the file at `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns `Store` if `from` does not exist, or if `to` exists and
    /// `overwrite` is false.
    pub fn copy(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let content = self
            .files
            .get(from)
            .map(|file| file.value().clone())
            .ok_or_else(|| Error::Store(format!("no stored content at '{from}'")))?;
        if !overwrite && self.files.contains_key(to) {
            return Err(Error::Store(format!(
                "'{to}' already exists; pass overwrite to replace it"
            )));
        }
        self.files.insert(to.to_string(), content);
        Ok(())
    }
}

/// In-memory blob store.
///
/// Resources and datums are indexed in `DashMap`s; content lives in a
/// [`MemoryFileSystem`] that may be shared with other stores.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use databroker::store::{BlobStore, MemoryBlobStore, MemoryFileSystem, FRAME_SPEC};
/// use serde_json::{json, Map};
///
/// # fn example() -> databroker::Result<()> {
/// let fs = Arc::new(MemoryFileSystem::new());
/// let store = MemoryBlobStore::new("/data", fs);
///
/// let res = store.insert_resource(FRAME_SPEC, "img.frames", Map::new(), None)?;
/// let frame = store.append_frame(&res, json!([1, 2, 3]))?;
/// let mut kwargs = Map::new();
/// kwargs.insert("frame".into(), json!(frame));
/// store.insert_datum(&res, "d-1", kwargs)?;
///
/// assert_eq!(store.retrieve("d-1")?, json!([1, 2, 3]));
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug)]
pub struct MemoryBlobStore {
    root: String,
    fs: Arc<MemoryFileSystem>,
    resources: DashMap<String, Resource>,
    datums: DashMap<String, Datum>,
    by_resource: DashMap<String, Vec<String>>,
}

impl MemoryBlobStore {
    /// Create a store whose resources default to `root`.
    #[must_use]
    pub fn new(root: impl Into<String>, fs: Arc<MemoryFileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
            resources: DashMap::new(),
            datums: DashMap::new(),
            by_resource: DashMap::new(),
        }
    }

    /// Default storage root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Shared file namespace.
    #[must_use]
    pub const fn file_system(&self) -> &Arc<MemoryFileSystem> {
        &self.fs
    }

    /// Number of registered resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Number of registered datums.
    #[must_use]
    pub fn datum_count(&self) -> usize {
        self.datums.len()
    }

    fn datum(&self, datum_id: &str) -> Result<Datum> {
        self.datums
            .get(datum_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| Error::Store(format!("unknown datum '{datum_id}'")))
    }
}

impl BlobStore for MemoryBlobStore {
    fn resource_given_eid(&self, datum_id: &str) -> Result<Resource> {
        let datum = self.datum(datum_id)?;
        self.resource_given_uid(datum.resource())
    }

    fn resource_given_uid(&self, uid: &str) -> Result<Resource> {
        self.resources
            .get(uid)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::Store(format!("unknown resource '{uid}'")))
    }

    fn copy_files(
        &self,
        resource_uid: &str,
        new_root: Option<&str>,
        options: &CopyOptions,
    ) -> Result<Vec<(String, String)>> {
        let resource = self.resource_given_uid(resource_uid)?;
        let old_path = resource.full_path();
        let new_path = join_path(new_root.unwrap_or(resource.root()), resource.resource_path());
        self.fs.copy(&old_path, &new_path, options.overwrite)?;
        debug!(target: "databroker::store", resource = %resource_uid, from = %old_path, to = %new_path, "Copied resource content");
        Ok(vec![(old_path, new_path)])
    }

    fn insert_resource(
        &self,
        spec: &str,
        resource_path: &str,
        resource_kwargs: Map<String, Value>,
        root: Option<&str>,
    ) -> Result<Resource> {
        let resource = Resource::new(
            new_uid(),
            spec,
            resource_path,
            root.unwrap_or(&self.root),
            resource_kwargs,
        );
        self.resources
            .insert(resource.uid().to_string(), resource.clone());
        Ok(resource)
    }

    fn datum_gen_given_resource(&self, resource_uid: &str) -> Result<Vec<Datum>> {
        let ids = self
            .by_resource
            .get(resource_uid)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        ids.iter().map(|id| self.datum(id)).collect()
    }

    fn insert_datum(
        &self,
        resource: &Resource,
        datum_id: &str,
        datum_kwargs: Map<String, Value>,
    ) -> Result<Datum> {
        if !self.resources.contains_key(resource.uid()) {
            return Err(Error::Store(format!(
                "datum '{datum_id}' references unknown resource '{}'",
                resource.uid()
            )));
        }
        if self.datums.contains_key(datum_id) {
            return Err(Error::Store(format!("datum '{datum_id}' already exists")));
        }
        let datum = Datum::new(datum_id, resource.uid(), datum_kwargs);
        self.datums.insert(datum_id.to_string(), datum.clone());
        self.by_resource
            .entry(resource.uid().to_string())
            .or_default()
            .push(datum_id.to_string());
        Ok(datum)
    }

    fn append_frame(&self, resource: &Resource, value: Value) -> Result<u64> {
        if resource.spec() != FRAME_SPEC {
            return Err(Error::Store(format!(
                "cannot append to resource '{}' with spec '{}'",
                resource.uid(),
                resource.spec()
            )));
        }
        Ok(self.fs.append(&resource.full_path(), value))
    }

    fn retrieve(&self, datum_id: &str) -> Result<Value> {
        let datum = self.datum(datum_id)?;
        let resource = self.resource_given_uid(datum.resource())?;
        if resource.spec() != FRAME_SPEC {
            return Err(Error::Store(format!(
                "no handler registered for spec '{}'",
                resource.spec()
            )));
        }
        let frame = datum
            .datum_kwargs()
            .get("frame")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let path = resource.full_path();
        self.fs.read(&path, frame).ok_or_else(|| {
            Error::Store(format!("frame {frame} of '{path}' is missing"))
        })
    }
}
