//! External writers - move field values into the blob store

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::document::new_uid;
use crate::store::{BlobStore, Resource, FRAME_SPEC};
use crate::{Error, Result};

/// Writes literal values to external storage and hands back datum ids.
///
/// A writer is opened per run and field, and closed when the run stops.
pub trait ExternalWriter: Send {
    /// Store `value` and return the datum id that now refers to it.
    fn write(&mut self, value: &Value) -> Result<String>;

    /// Release the writer. Writing after close is an error.
    fn close(&mut self) -> Result<()>;
}

/// Constructor for a writer, given the blob store to write into.
pub type WriterFactory =
    Arc<dyn Fn(Arc<dyn BlobStore>) -> Result<Box<dyn ExternalWriter>> + Send + Sync>;

/// Writer storing each value as one frame of a fresh `JSON_FRAMES` resource.
pub struct FrameWriter {
    fs: Arc<dyn BlobStore>,
    resource: Resource,
    written: u64,
    closed: bool,
}

impl FrameWriter {
    /// Open a writer backed by a newly registered resource.
    ///
    /// # Errors
    ///
    /// Propagates blob store failures while registering the resource.
    pub fn new(fs: Arc<dyn BlobStore>) -> Result<Self> {
        let path = format!("{}.frames", new_uid());
        let resource = fs.insert_resource(FRAME_SPEC, &path, Map::new(), None)?;
        Ok(Self {
            fs,
            resource,
            written: 0,
            closed: false,
        })
    }

    /// Same as [`FrameWriter::new`], boxed for use as a [`WriterFactory`].
    ///
    /// # Errors
    ///
    /// See [`FrameWriter::new`].
    pub fn boxed(fs: Arc<dyn BlobStore>) -> Result<Box<dyn ExternalWriter>> {
        Ok(Box::new(Self::new(fs)?))
    }

    /// Resource this writer appends to.
    #[must_use]
    pub const fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Number of values written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Whether the writer has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ExternalWriter for FrameWriter {
    fn write(&mut self, value: &Value) -> Result<String> {
        if self.closed {
            return Err(Error::Store(format!(
                "write to closed resource '{}'",
                self.resource.uid()
            )));
        }
        let frame = self.fs.append_frame(&self.resource, value.clone())?;
        let datum_id = new_uid();
        let mut kwargs = Map::new();
        kwargs.insert("frame".to_string(), json!(frame));
        self.fs.insert_datum(&self.resource, &datum_id, kwargs)?;
        self.written += 1;
        Ok(datum_id)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
