//! Store Collaborators
//!
//! The broker never owns persistence. It talks to two collaborators:
//!
//! - [`MetadataStore`]: run starts, descriptors, events and stops
//! - [`BlobStore`]: resources and datums describing externally stored data
//!
//! In-memory implementations of both are provided for embedding and tests.
//! They share "files" through a [`MemoryFileSystem`] handle, so a resource
//! copied by one blob store is readable by another.
//!
//! # Example
//!
//! ```rust
//! use databroker::document::RunStart;
//! use databroker::store::{MemoryMetadataStore, MetadataStore, RunQuery};
//!
//! # fn example() -> databroker::Result<()> {
//! let mds = MemoryMetadataStore::new();
//! mds.insert_run_start(RunStart::builder().scan_id(1).build())?;
//!
//! let found = mds.find_run_starts(&RunQuery::new().scan_id(1))?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod blob;
mod memory;
mod query;
mod resource;

pub use blob::{CopyOptions, MemoryBlobStore, MemoryFileSystem, FRAME_SPEC};
pub use memory::MemoryMetadataStore;
pub use query::RunQuery;
pub use resource::{Datum, Resource};

use serde_json::{Map, Value};

use crate::document::{Document, Event, EventDescriptor, RunStart, RunStop};
use crate::Result;

/// Metadata store for lifecycle documents.
pub trait MetadataStore: Send + Sync {
    /// Find run starts matching `query`, most recent first.
    fn find_run_starts(&self, query: &RunQuery) -> Result<Vec<RunStart>>;

    /// The `n` most recent run starts, most recent first.
    ///
    /// Returns fewer than `n` when fewer runs exist.
    fn find_last(&self, n: usize) -> Result<Vec<RunStart>>;

    /// Descriptors of the run `run_start`, in insertion order.
    fn descriptors_for(&self, run_start: &str) -> Result<Vec<EventDescriptor>>;

    /// Stop of the run `run_start`, if it has been closed.
    fn stop_for(&self, run_start: &str) -> Result<Option<RunStop>>;

    /// Events of the stream `descriptor`, ordered by time.
    fn events_for(&self, descriptor: &str) -> Result<Vec<Event>>;

    /// Insert a run start.
    fn insert_run_start(&self, doc: RunStart) -> Result<()>;

    /// Insert a descriptor. Its run start must already be present.
    fn insert_descriptor(&self, doc: EventDescriptor) -> Result<()>;

    /// Insert an event. Its descriptor must already be present.
    fn insert_event(&self, doc: Event) -> Result<()>;

    /// Insert a run stop. Its run start must already be present.
    fn insert_run_stop(&self, doc: RunStop) -> Result<()>;

    /// Insert any document, dispatching on its kind.
    fn insert(&self, doc: Document) -> Result<()> {
        match doc {
            Document::Start(doc) => self.insert_run_start(doc),
            Document::Descriptor(doc) => self.insert_descriptor(doc),
            Document::Event(doc) => self.insert_event(doc),
            Document::Stop(doc) => self.insert_run_stop(doc),
        }
    }
}

/// Blob store for externally stored data.
pub trait BlobStore: Send + Sync {
    /// Resource referenced by the datum `datum_id`.
    fn resource_given_eid(&self, datum_id: &str) -> Result<Resource>;

    /// Resource with uid `uid`.
    fn resource_given_uid(&self, uid: &str) -> Result<Resource>;

    /// Copy the stored content of a resource under `new_root`.
    ///
    /// Returns `(old_path, new_path)` pairs for every file copied.
    fn copy_files(
        &self,
        resource_uid: &str,
        new_root: Option<&str>,
        options: &CopyOptions,
    ) -> Result<Vec<(String, String)>>;

    /// Register a new resource. A fresh uid is assigned.
    fn insert_resource(
        &self,
        spec: &str,
        resource_path: &str,
        resource_kwargs: Map<String, Value>,
        root: Option<&str>,
    ) -> Result<Resource>;

    /// Every datum referencing the resource `resource_uid`.
    fn datum_gen_given_resource(&self, resource_uid: &str) -> Result<Vec<Datum>>;

    /// Register a datum against `resource`.
    fn insert_datum(
        &self,
        resource: &Resource,
        datum_id: &str,
        datum_kwargs: Map<String, Value>,
    ) -> Result<Datum>;

    /// Append one value to the stored content of `resource`.
    ///
    /// Returns the index the value was stored at.
    fn append_frame(&self, resource: &Resource, value: Value) -> Result<u64>;

    /// Retrieve the literal value a datum refers to.
    fn retrieve(&self, datum_id: &str) -> Result<Value>;
}
