//! External Store Interceptor - persist a stream, moving fields to the blob store
//!
//! Each document is split into two independently built copies:
//!
//! - the **persisted** copy goes to the metadata store; configured fields of
//!   its events hold datum ids, its descriptors mark those fields external
//! - the **emitted** copy goes to the consumer; it is the input document,
//!   plus a `filled` map (field -> false) on events
//!
//! Writers are opened on every Start and closed on the matching Stop. They
//! are also force-closed when the stream fails, ends without a Stop, or is
//! dropped before it is drained.

use std::collections::BTreeMap;
use std::iter::FusedIterator;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{ExternalWriter, WriterFactory};
use crate::document::{DataKey, Document, Event, EventDescriptor, RunStart, RunStop};
use crate::store::{BlobStore, MetadataStore};
use crate::{Error, Result};

/// Tag placed on the `external` attribute of intercepted fields.
pub const EXTERNAL_TAG: &str = "FILESTORE:";

/// Configuration of an interceptor: destination stores plus one writer
/// constructor per externally stored field.
#[derive(Clone)]
pub struct ExternalStoreInterceptor {
    mds: Arc<dyn MetadataStore>,
    fs: Arc<dyn BlobStore>,
    writers: BTreeMap<String, WriterFactory>,
}

impl ExternalStoreInterceptor {
    /// Create an interceptor persisting into `mds` and `fs`, with no
    /// externally stored fields.
    #[must_use]
    pub fn new(mds: Arc<dyn MetadataStore>, fs: Arc<dyn BlobStore>) -> Self {
        Self {
            mds,
            fs,
            writers: BTreeMap::new(),
        }
    }

    /// Store `field` externally, using `factory` to open a writer per run.
    #[must_use]
    pub fn writer<W>(mut self, field: impl Into<String>, factory: W) -> Self
    where
        W: Fn(Arc<dyn BlobStore>) -> Result<Box<dyn ExternalWriter>> + Send + Sync + 'static,
    {
        self.writers.insert(field.into(), Arc::new(factory));
        self
    }

    /// Names of the externally stored fields.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.writers.keys().map(String::as_str)
    }

    /// Apply the interceptor to a document stream.
    pub fn intercept<I>(&self, stream: I) -> InterceptStream<I::IntoIter>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        InterceptStream {
            upstream: stream.into_iter(),
            config: self.clone(),
            open: BTreeMap::new(),
            in_run: false,
            finished: false,
        }
    }
}

/// Iterator produced by [`ExternalStoreInterceptor::intercept`].
pub struct InterceptStream<I> {
    upstream: I,
    config: ExternalStoreInterceptor,
    open: BTreeMap<String, Box<dyn ExternalWriter>>,
    in_run: bool,
    finished: bool,
}

impl<I> InterceptStream<I>
where
    I: Iterator<Item = Result<Document>>,
{
    /// Number of writers currently open.
    #[must_use]
    pub fn open_writers(&self) -> usize {
        self.open.len()
    }

    /// Close and discard every open writer.
    ///
    /// Every writer is closed even if an earlier one fails; the first
    /// failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first writer close failure.
    pub fn close_writers(&mut self) -> Result<()> {
        let mut first_err = None;
        for (field, mut writer) in std::mem::take(&mut self.open) {
            if let Err(err) = writer.close() {
                warn!(target: "databroker::stream", field = %field, error = %err, "Writer failed to close");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn abort(&mut self) {
        self.in_run = false;
        self.finished = true;
        if !self.open.is_empty() {
            debug!(target: "databroker::stream", writers = self.open.len(), "Force-closing writers");
            // Close failures are already logged; the caller sees the primary error.
            let _ = self.close_writers();
        }
    }

    fn require_run(&self, kind: &str) -> Result<()> {
        if self.in_run {
            Ok(())
        } else {
            Err(Error::Protocol(format!("Received {kind} before RunStart.")))
        }
    }

    fn process(&mut self, doc: Document) -> Result<Document> {
        match doc {
            Document::Start(start) => self.on_start(start),
            Document::Descriptor(desc) => self.on_descriptor(desc),
            Document::Event(event) => self.on_event(event),
            Document::Stop(stop) => self.on_stop(stop),
        }
    }

    fn on_start(&mut self, start: RunStart) -> Result<Document> {
        if !self.open.is_empty() {
            warn!(target: "databroker::stream", "RunStart received while the previous run is still open");
            self.close_writers()?;
        }
        for (field, factory) in &self.config.writers {
            let writer = factory(Arc::clone(&self.config.fs))?;
            self.open.insert(field.clone(), writer);
        }
        self.in_run = true;
        self.config.mds.insert_run_start(start.clone())?;
        Ok(Document::Start(start))
    }

    fn on_descriptor(&mut self, desc: EventDescriptor) -> Result<Document> {
        self.require_run("EventDescriptor")?;
        let data_keys = desc
            .data_keys()
            .iter()
            .map(|(name, key)| {
                let key: DataKey = if self.config.writers.contains_key(name) {
                    key.marked_external(EXTERNAL_TAG)
                } else {
                    key.clone()
                };
                (name.clone(), key)
            })
            .collect();
        self.config.mds.insert_descriptor(desc.with_data_keys(data_keys))?;
        Ok(Document::Descriptor(desc))
    }

    fn on_event(&mut self, event: Event) -> Result<Document> {
        self.require_run("Event")?;
        let mut persisted: BTreeMap<String, Value> = event.data().clone();
        for (field, writer) in &mut self.open {
            if let Some(value) = event.data().get(field) {
                let datum_id = writer.write(value)?;
                persisted.insert(field.clone(), Value::String(datum_id));
            }
        }
        self.config
            .mds
            .insert_event(event.with_data(persisted).without_filled())?;

        let mut filled = event.filled().clone();
        filled.extend(self.config.writers.keys().map(|field| (field.clone(), false)));
        Ok(Document::Event(event.with_filled(filled)))
    }

    fn on_stop(&mut self, stop: RunStop) -> Result<Document> {
        self.require_run("RunStop")?;
        self.close_writers()?;
        self.in_run = false;
        self.config.mds.insert_run_stop(stop.clone())?;
        Ok(Document::Stop(stop))
    }
}

impl<I> Iterator for InterceptStream<I>
where
    I: Iterator<Item = Result<Document>>,
{
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let doc = match self.upstream.next() {
            Some(Ok(doc)) => doc,
            Some(Err(err)) => {
                self.abort();
                return Some(Err(err));
            }
            None => {
                self.finished = true;
                if self.open.is_empty() {
                    return None;
                }
                warn!(target: "databroker::stream", "Stream ended without RunStop; closing writers");
                return self.close_writers().err().map(Err);
            }
        };
        match self.process(doc) {
            Ok(doc) => Some(Ok(doc)),
            Err(err) => {
                self.abort();
                Some(Err(err))
            }
        }
    }
}

impl<I> FusedIterator for InterceptStream<I> where I: Iterator<Item = Result<Document>> {}

impl<I> Drop for InterceptStream<I> {
    fn drop(&mut self) {
        for (field, mut writer) in std::mem::take(&mut self.open) {
            if let Err(err) = writer.close() {
                warn!(target: "databroker::stream", field = %field, error = %err, "Writer failed to close on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ExitStatus, DataKey};
    use crate::store::{MemoryBlobStore, MemoryFileSystem, MemoryMetadataStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;

    struct CountingWriter {
        closes: Arc<AtomicUsize>,
        fail_write: bool,
    }

    impl ExternalWriter for CountingWriter {
        fn write(&mut self, _value: &Value) -> Result<String> {
            if self.fail_write {
                return Err(Error::writer("img", "disk full"));
            }
            Ok("datum".to_string())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stores() -> (Arc<MemoryMetadataStore>, Arc<dyn BlobStore>) {
        (
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryBlobStore::new("", Arc::new(MemoryFileSystem::new()))),
        )
    }

    fn counting(closes: &Arc<AtomicUsize>, fail_write: bool) -> impl Fn(Arc<dyn BlobStore>) -> Result<Box<dyn ExternalWriter>> + Send + Sync + 'static {
        let closes = Arc::clone(closes);
        move |_fs| {
            Ok(Box::new(CountingWriter {
                closes: Arc::clone(&closes),
                fail_write,
            }) as Box<dyn ExternalWriter>)
        }
    }

    fn open_run() -> (RunStart, EventDescriptor, Event) {
        let start = RunStart::builder().build();
        let desc = EventDescriptor::builder(start.uid())
            .data_key("img", DataKey::new())
            .build();
        let event = Event::builder(desc.uid()).datum("img", json!([0, 1])).build();
        (start, desc, event)
    }

    #[test]
    fn test_writers_closed_on_drop() {
        let (mds, fs) = stores();
        let closes = Arc::new(AtomicUsize::new(0));
        let interceptor = ExternalStoreInterceptor::new(mds, fs).writer("img", counting(&closes, false));

        let (start, desc, event) = open_run();
        let docs: Vec<Result<Document>> = vec![Ok(start.into()), Ok(desc.into()), Ok(event.into())];
        let mut stream = interceptor.intercept(docs);
        stream.next().unwrap().unwrap();
        assert_eq!(stream.open_writers(), 1);
        drop(stream);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_writer_failure_closes_writers_and_stops() {
        let (mds, fs) = stores();
        let closes = Arc::new(AtomicUsize::new(0));
        let interceptor = ExternalStoreInterceptor::new(mds, fs).writer("img", counting(&closes, true));

        let (start, desc, event) = open_run();
        let stop = RunStop::new(start.uid(), ExitStatus::Success);
        let docs: Vec<Result<Document>> =
            vec![Ok(start.into()), Ok(desc.into()), Ok(event.into()), Ok(stop.into())];
        let out: Vec<Result<Document>> = interceptor.intercept(docs).collect();

        assert_eq!(out.len(), 3);
        assert!(matches!(out[2], Err(Error::Writer { .. })));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stream_ending_without_stop_closes_writers() {
        let (mds, fs) = stores();
        let closes = Arc::new(AtomicUsize::new(0));
        let interceptor = ExternalStoreInterceptor::new(mds, fs).writer("img", counting(&closes, false));

        let (start, desc, event) = open_run();
        let docs: Vec<Result<Document>> = vec![Ok(start.into()), Ok(desc.into()), Ok(event.into())];
        let out: Vec<Result<Document>> = interceptor.intercept(docs).collect();
        assert_eq!(out.len(), 3);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_before_start_is_protocol_error() {
        let (mds, fs) = stores();
        let interceptor = ExternalStoreInterceptor::new(mds, fs);
        let (_, _, event) = open_run();
        let mut stream = interceptor.intercept(vec![Ok(Document::Event(event))]);
        assert!(matches!(stream.next(), Some(Err(Error::Protocol(_)))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_persisted_descriptor_marked_external() {
        let (mds, fs) = stores();
        let interceptor = ExternalStoreInterceptor::new(Arc::clone(&mds) as Arc<dyn MetadataStore>, fs)
            .writer("img", crate::stream::FrameWriter::boxed);

        let (start, desc, _) = open_run();
        let desc_uid = desc.uid().to_string();
        let run_uid = start.uid().to_string();
        let out: Vec<Document> = interceptor
            .intercept(vec![Ok(start.into()), Ok(desc.into())])
            .collect::<Result<_>>()
            .unwrap();

        let Document::Descriptor(emitted) = &out[1] else {
            panic!("expected descriptor");
        };
        assert!(!emitted.data_keys()["img"].is_external());

        let persisted = mds.descriptors_for(&run_uid).unwrap();
        assert_eq!(persisted[0].uid(), desc_uid);
        assert_eq!(persisted[0].data_keys()["img"].external(), Some(EXTERNAL_TAG));
    }
}
