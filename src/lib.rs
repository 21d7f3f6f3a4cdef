//! # Databroker: Run Lookup and Document Stream Pipeline
//!
//! **Version**: 0.1.0
//!
//! Databroker resolves user-supplied keys into recorded experiment runs, and
//! transforms and persists the ordered lifecycle documents describing those
//! runs.
//!
//! ## Components
//!
//! - **Document model** ([`document`]): Start, Descriptor, Event, Stop and the
//!   [`Header`](document::Header) aggregate
//! - **Run locator** ([`locator`]): integers, ranges, uids and collections to
//!   headers
//! - **Stream pipeline** ([`stream`]): `event_map` transform, external-store
//!   interceptor, restream
//! - **Replicator** ([`replicator`]): derive runs into another broker, and
//!   bulk export including externally stored resources
//!
//! Evaluation is single-threaded and pull-based: streams do work only when
//! the consumer pulls the next document.
//!
//! ## Example Usage
//!
//! ```rust
//! use databroker::document::{DataKey, Document, Event, EventDescriptor, ExitStatus, RunStart, RunStop};
//! use databroker::stream::FrameWriter;
//! use databroker::Broker;
//! use serde_json::json;
//!
//! # fn example() -> databroker::Result<()> {
//! let broker = Broker::in_memory("/data");
//!
//! let start = RunStart::builder().scan_id(1).build();
//! let desc = EventDescriptor::builder(start.uid())
//!     .data_key("img", DataKey::new().with("shape", json!([2])))
//!     .build();
//! let event = Event::builder(desc.uid()).datum("img", json!([1, 2])).build();
//! let stop = RunStop::new(start.uid(), ExitStatus::Success);
//! let docs: Vec<databroker::Result<Document>> =
//!     vec![Ok(start.into()), Ok(desc.into()), Ok(event.into()), Ok(stop.into())];
//!
//! // Persist the run, moving "img" into the blob store.
//! let interceptor = broker.interceptor().writer("img", FrameWriter::boxed);
//! for doc in interceptor.intercept(docs) {
//!     doc?;
//! }
//!
//! let header = broker.resolve(1)?.into_vec().remove(0);
//! assert_eq!(broker.resource_uids(&header)?.len(), 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod broker;
pub mod document;
pub mod error;
pub mod locator;
pub mod replicator;
pub mod store;
pub mod stream;

pub use broker::{Broker, BrokerBuilder, BrokerConfig};
pub use error::{Error, Result};
pub use replicator::ExportOptions;
