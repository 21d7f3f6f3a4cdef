//! Document Stream Pipeline
//!
//! Pull-based operators over ordered lifecycle document streams. Every
//! operator is an [`Iterator`] adapter: it does work only when the consumer
//! pulls, computes at most a short bounded burst per input document, and
//! never buffers more than one pending item.
//!
//! - [`EventMap`]: derive a new run by transforming one stream's events
//! - [`ExternalStoreInterceptor`]: persist documents while moving selected
//!   fields into the blob store
//! - [`Restream`]: replay a stored run as a document stream
//!
//! Operators compose by nesting:
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use databroker::document::{DataKey, Document, Event, EventDescriptor, RunStart, RunStop, ExitStatus};
//! use databroker::stream::EventMap;
//! use serde_json::{json, Map, Value};
//!
//! let start = RunStart::builder().build();
//! let desc = EventDescriptor::builder(start.uid()).data_key("x", DataKey::new()).build();
//! let event = Event::builder(desc.uid()).datum("x", json!(2)).build();
//! let stop = RunStop::new(start.uid(), ExitStatus::Success);
//! let source: Vec<databroker::Result<Document>> =
//!     vec![Ok(start.into()), Ok(desc.into()), Ok(event.into()), Ok(stop.into())];
//!
//! let mut fields = BTreeMap::new();
//! fields.insert("x".to_string(), Map::new());
//! let doubled = EventMap::new("primary", fields, json!({"op": "double"}), |v: &Value| {
//!     Ok(json!(v.as_i64().unwrap_or(0) * 2))
//! });
//!
//! let out: Vec<Document> = doubled.apply(source).collect::<databroker::Result<_>>().unwrap();
//! assert_eq!(out.len(), 4);
//! ```

mod event_map;
mod interceptor;
mod restream;
mod writer;

pub use event_map::{EventMap, EventMapStream};
pub use interceptor::{ExternalStoreInterceptor, InterceptStream, EXTERNAL_TAG};
pub use restream::{fill_event, Restream};
pub use writer::{ExternalWriter, FrameWriter, WriterFactory};

use crate::document::Document;
use crate::Result;

/// A boxed, lazily evaluated document stream.
pub type DocumentStream<'a> = Box<dyn Iterator<Item = Result<Document>> + 'a>;
