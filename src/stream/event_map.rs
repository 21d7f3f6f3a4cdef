//! Event Map - derive a run by transforming the events of one stream

use std::collections::BTreeMap;
use std::iter::FusedIterator;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::document::{
    DataKey, Document, Event, EventDescriptor, ExitStatus, RunStart, RunStop,
};
use crate::{Error, Result};

/// Configuration of an event map operator.
///
/// For every run in the input, the operator emits a derived run:
///
/// ```text
/// NoRun ──start──> HasRun(no descriptor) ──descriptor──> HasRun(active)
///   ^                                                        │
///   └────────────── stop (success) / transform error (failure)┘
/// ```
///
/// Only the stream named `stream_name` is carried over; descriptors and
/// events of other streams are dropped. Within that stream, every declared
/// field has its value replaced by `transform(value)`. Fields named in
/// `data_keys` also have their schema updated with the matching fragment (an
/// empty fragment passes the original schema through).
///
/// Derived fields hold literal values, so the derived descriptor never
/// inherits the source's `external` tags. A fragment may set one again.
pub struct EventMap<F> {
    stream_name: String,
    data_keys: BTreeMap<String, Map<String, Value>>,
    provenance: Value,
    transform: F,
}

impl<F> EventMap<F>
where
    F: FnMut(&Value) -> anyhow::Result<Value>,
{
    /// Create an event map over `stream_name`.
    ///
    /// # Arguments
    ///
    /// * `stream_name` - e.g. `"primary"` or `"baseline"`
    /// * `data_keys` - schema updates per field (e.g. `{"shape": [10, 10]}`),
    ///   or an empty map when unchanged
    /// * `provenance` - metadata about this operation, stored on the derived start
    /// * `transform` - per-value function
    #[must_use]
    pub fn new(
        stream_name: impl Into<String>,
        data_keys: BTreeMap<String, Map<String, Value>>,
        provenance: Value,
        transform: F,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            data_keys,
            provenance,
            transform,
        }
    }

    /// Stream name this operator narrows to.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Apply the operator to a document stream.
    pub fn apply<I>(self, stream: I) -> EventMapStream<I::IntoIter, F>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        EventMapStream {
            upstream: stream.into_iter(),
            config: self,
            run_start: None,
            active: None,
            pending_error: None,
            finished: false,
        }
    }
}

/// Descriptor currently being mapped.
struct ActiveDescriptor {
    run_start: String,
    source_uid: String,
    derived_uid: String,
    fields: Vec<String>,
}

/// Iterator produced by [`EventMap::apply`].
pub struct EventMapStream<I, F> {
    upstream: I,
    config: EventMap<F>,
    run_start: Option<String>,
    active: Option<ActiveDescriptor>,
    pending_error: Option<Error>,
    finished: bool,
}

impl<I, F> EventMapStream<I, F>
where
    I: Iterator<Item = Result<Document>>,
    F: FnMut(&Value) -> anyhow::Result<Value>,
{
    /// Uid of the derived run currently open, if any.
    #[must_use]
    pub fn active_run(&self) -> Option<&str> {
        self.run_start.as_deref()
    }

    fn step(&mut self, doc: Document) -> Result<Option<Document>> {
        match doc {
            Document::Start(start) => Ok(Some(self.on_start(&start))),
            Document::Descriptor(desc) if desc.name() == self.config.stream_name => {
                self.on_descriptor(&desc).map(Some)
            }
            Document::Descriptor(_) => Ok(None),
            Document::Event(event) => self.on_event(&event),
            Document::Stop(_) => self.on_stop().map(Some),
        }
    }

    fn on_start(&mut self, source: &RunStart) -> Document {
        let start = RunStart::builder()
            .parent(source.uid())
            .provenance(self.config.provenance.clone())
            .build();
        debug!(target: "databroker::stream", parent = %source.uid(), derived = %start.uid(), "Derived run opened");
        self.run_start = Some(start.uid().to_string());
        self.active = None;
        Document::Start(start)
    }

    fn on_descriptor(&mut self, source: &EventDescriptor) -> Result<Document> {
        let run_start = self.run_start.as_ref().ok_or_else(|| {
            Error::Protocol("Received EventDescriptor before RunStart.".to_string())
        })?;

        let data_keys: BTreeMap<String, DataKey> = source
            .data_keys()
            .iter()
            .map(|(name, key)| {
                let key = key.internal();
                let key = match self.config.data_keys.get(name) {
                    Some(fragment) => key.merged(fragment),
                    None => key,
                };
                (name.clone(), key)
            })
            .collect();
        let fields = data_keys.keys().cloned().collect();

        let derived = EventDescriptor::builder(run_start.as_str())
            .name(self.config.stream_name.as_str())
            .data_keys(data_keys)
            .build();
        self.active = Some(ActiveDescriptor {
            run_start: run_start.clone(),
            source_uid: source.uid().to_string(),
            derived_uid: derived.uid().to_string(),
            fields,
        });
        Ok(Document::Descriptor(derived))
    }

    // Events of dropped streams, or arriving outside a run, are dropped too.
    fn on_event(&mut self, source: &Event) -> Result<Option<Document>> {
        let Some(active) = self
            .active
            .as_ref()
            .filter(|a| a.source_uid == source.descriptor())
        else {
            return Ok(None);
        };

        match transform_fields(&mut self.config.transform, &active.fields, source) {
            Ok(data) => Ok(Some(Document::Event(
                source.derive(active.derived_uid.as_str(), data),
            ))),
            Err(err) => {
                warn!(target: "databroker::stream", run = %active.run_start, error = %err, "Transform failed; closing derived run");
                let stop = RunStop::new(active.run_start.as_str(), ExitStatus::Failure)
                    .with_reason(err.to_string());
                self.run_start = None;
                self.active = None;
                self.pending_error = Some(err);
                Ok(Some(Document::Stop(stop)))
            }
        }
    }

    // The incoming stop's run_start is not compared with the active run.
    fn on_stop(&mut self) -> Result<Document> {
        let run_start = self
            .run_start
            .take()
            .ok_or_else(|| Error::Protocol("Received RunStop before RunStart.".to_string()))?;
        self.active = None;
        debug!(target: "databroker::stream", run = %run_start, "Derived run closed");
        Ok(Document::Stop(RunStop::new(run_start, ExitStatus::Success)))
    }
}

fn transform_fields<F>(
    transform: &mut F,
    fields: &[String],
    source: &Event,
) -> Result<BTreeMap<String, Value>>
where
    F: FnMut(&Value) -> anyhow::Result<Value>,
{
    let mut data = source.data().clone();
    for field in fields {
        let value = source
            .data()
            .get(field)
            .ok_or_else(|| Error::transform(field.as_str(), "field missing from event data"))?;
        let mapped = transform(value).map_err(|err| Error::transform(field.as_str(), err))?;
        data.insert(field.clone(), mapped);
    }
    Ok(data)
}

impl<I, F> Iterator for EventMapStream<I, F>
where
    I: Iterator<Item = Result<Document>>,
    F: FnMut(&Value) -> anyhow::Result<Value>,
{
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(err) = self.pending_error.take() {
                self.finished = true;
                return Some(Err(err));
            }
            if self.finished {
                return None;
            }
            let doc = match self.upstream.next()? {
                Ok(doc) => doc,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            };
            match self.step(doc) {
                Ok(Some(out)) => return Some(Ok(out)),
                Ok(None) => {}
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl<I, F> FusedIterator for EventMapStream<I, F>
where
    I: Iterator<Item = Result<Document>>,
    F: FnMut(&Value) -> anyhow::Result<Value>,
{
}
