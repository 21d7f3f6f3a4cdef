//! Lifecycle Document Model
//!
//! A run is described by an ordered sequence of typed documents:
//!
//! ```text
//! RunStart (1) ──< EventDescriptor (N, one per stream)
//!    │                   │
//!    │                   └──< Event (N)
//!    └── RunStop (0..1)
//! ```
//!
//! Each document carries its required core fields as typed struct fields
//! and keeps any store-specific metadata in an extension map, so unknown
//! fields survive a parse / re-emit cycle.
//!
//! ## Usage
//!
//! ```rust
//! use databroker::document::{Document, DocumentKind, RunStart};
//!
//! let start = RunStart::builder().scan_id(7).build();
//! let doc = Document::Start(start);
//! assert_eq!(doc.kind(), DocumentKind::Start);
//!
//! let (kind, json) = doc.to_name_doc().unwrap();
//! let parsed = Document::from_name_doc(kind.as_str(), json).unwrap();
//! assert_eq!(parsed, doc);
//! ```

mod descriptor;
mod event;
mod header;
mod start;
mod stop;

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

pub use descriptor::{DataKey, EventDescriptor, EventDescriptorBuilder, DEFAULT_STREAM_NAME};
pub use event::{Event, EventBuilder};
pub use header::Header;
pub use start::{RunStart, RunStartBuilder};
pub use stop::{ExitStatus, RunStop};

/// Generate a fresh globally unique document identifier.
#[must_use]
pub fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall-clock time as seconds since the Unix epoch.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn timestamp_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// The four kinds of lifecycle documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Opens a run
    Start,
    /// Declares one event stream's schema
    Descriptor,
    /// One row of data in a stream
    Event,
    /// Closes a run
    Stop,
}

impl DocumentKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Descriptor => "descriptor",
            Self::Event => "event",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Self::Start),
            "descriptor" => Ok(Self::Descriptor),
            "event" => Ok(Self::Event),
            "stop" => Ok(Self::Stop),
            other => Err(Error::Validation(format!(
                "unknown document kind '{other}'; expected one of start, descriptor, event, stop"
            ))),
        }
    }
}

/// A lifecycle document tagged with its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Run start
    Start(RunStart),
    /// Event descriptor
    Descriptor(EventDescriptor),
    /// Event
    Event(Event),
    /// Run stop
    Stop(RunStop),
}

impl Document {
    /// Kind tag of this document.
    #[must_use]
    pub const fn kind(&self) -> DocumentKind {
        match self {
            Self::Start(_) => DocumentKind::Start,
            Self::Descriptor(_) => DocumentKind::Descriptor,
            Self::Event(_) => DocumentKind::Event,
            Self::Stop(_) => DocumentKind::Stop,
        }
    }

    /// Unique identifier of this document.
    #[must_use]
    pub fn uid(&self) -> &str {
        match self {
            Self::Start(doc) => doc.uid(),
            Self::Descriptor(doc) => doc.uid(),
            Self::Event(doc) => doc.uid(),
            Self::Stop(doc) => doc.uid(),
        }
    }

    /// Parse one `(kind, document)` pair of the wire shape.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an unknown kind or an empty uid, and `Json`
    /// when a required field is missing or mistyped.
    pub fn from_name_doc(name: &str, doc: Value) -> Result<Self> {
        let parsed = match name.parse::<DocumentKind>()? {
            DocumentKind::Start => Self::Start(serde_json::from_value(doc)?),
            DocumentKind::Descriptor => Self::Descriptor(serde_json::from_value(doc)?),
            DocumentKind::Event => Self::Event(serde_json::from_value(doc)?),
            DocumentKind::Stop => Self::Stop(serde_json::from_value(doc)?),
        };
        if parsed.uid().is_empty() {
            return Err(Error::Validation(format!(
                "{name} document has an empty uid"
            )));
        }
        Ok(parsed)
    }

    /// Emit this document as a `(kind, document)` pair.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the extension map holds a value that cannot be
    /// serialized.
    pub fn to_name_doc(&self) -> Result<(DocumentKind, Value)> {
        let value = match self {
            Self::Start(doc) => serde_json::to_value(doc)?,
            Self::Descriptor(doc) => serde_json::to_value(doc)?,
            Self::Event(doc) => serde_json::to_value(doc)?,
            Self::Stop(doc) => serde_json::to_value(doc)?,
        };
        Ok((self.kind(), value))
    }
}

impl From<RunStart> for Document {
    fn from(doc: RunStart) -> Self {
        Self::Start(doc)
    }
}

impl From<EventDescriptor> for Document {
    fn from(doc: EventDescriptor) -> Self {
        Self::Descriptor(doc)
    }
}

impl From<Event> for Document {
    fn from(doc: Event) -> Self {
        Self::Event(doc)
    }
}

impl From<RunStop> for Document {
    fn from(doc: RunStop) -> Self {
        Self::Stop(doc)
    }
}
