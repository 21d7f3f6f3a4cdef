//! Header - read-only view of one run

use serde::Serialize;

use super::{EventDescriptor, RunStart, RunStop};
use crate::store::MetadataStore;
use crate::Result;

/// Header aggregates a run's Start, its Descriptors, and its Stop.
///
/// Events are not embedded; they are pulled lazily from the metadata store
/// when the run is restreamed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    start: RunStart,
    descriptors: Vec<EventDescriptor>,
    stop: Option<RunStop>,
}

impl Header {
    /// Assemble a header from its parts.
    #[must_use]
    pub const fn new(
        start: RunStart,
        descriptors: Vec<EventDescriptor>,
        stop: Option<RunStop>,
    ) -> Self {
        Self {
            start,
            descriptors,
            stop,
        }
    }

    /// Materialise the header of `start` by querying its descriptors and
    /// stop from `mds`.
    ///
    /// # Errors
    ///
    /// Propagates any metadata store failure.
    pub fn from_run_start(mds: &dyn MetadataStore, start: RunStart) -> Result<Self> {
        let descriptors = mds.descriptors_for(start.uid())?;
        let stop = mds.stop_for(start.uid())?;
        Ok(Self::new(start, descriptors, stop))
    }

    /// Get the run uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        self.start.uid()
    }

    /// Get the run start.
    #[must_use]
    pub const fn start(&self) -> &RunStart {
        &self.start
    }

    /// Get the descriptors, one per event stream.
    #[must_use]
    pub fn descriptors(&self) -> &[EventDescriptor] {
        &self.descriptors
    }

    /// Get the run stop, if the run has been closed.
    #[must_use]
    pub const fn stop(&self) -> Option<&RunStop> {
        self.stop.as_ref()
    }

    /// Names of the event streams in this run.
    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(EventDescriptor::name)
    }

    /// Whether any descriptor declares `field`.
    #[must_use]
    pub fn declares_field(&self, field: &str) -> bool {
        self.descriptors
            .iter()
            .any(|d| d.data_keys().contains_key(field))
    }
}
