//! Restream - replay a stored run as a document stream

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::iter::FusedIterator;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::document::{DataKey, Document, Event, EventDescriptor, Header};
use crate::store::{BlobStore, MetadataStore};
use crate::Result;

/// Materialise the externally stored fields of `event`.
///
/// Every field in `external` whose value is a datum id is replaced with
/// the literal value retrieved from `fs`, and marked `filled = true`.
///
/// # Errors
///
/// Propagates blob store retrieval failures.
pub fn fill_event(fs: &dyn BlobStore, external: &BTreeSet<String>, event: &Event) -> Result<Event> {
    let mut data = event.data().clone();
    let mut filled = event.filled().clone();
    for field in external {
        if filled.get(field) == Some(&true) {
            continue;
        }
        if let Some(Value::String(datum_id)) = event.data().get(field) {
            data.insert(field.clone(), fs.retrieve(datum_id)?);
            filled.insert(field.clone(), true);
        }
    }
    Ok(event.with_data(data).with_filled(filled))
}

enum Phase {
    Start,
    Descriptors(usize),
    Events,
    Stop,
    Done,
}

/// Document stream of one stored run: Start, every Descriptor, Events of
/// all streams ordered by time, then Stop if the run was closed.
///
/// Events are fetched from the metadata store only once the descriptors
/// have been consumed.
pub struct Restream<'a> {
    mds: &'a dyn MetadataStore,
    fs: Option<&'a dyn BlobStore>,
    header: Header,
    descriptors: Vec<EventDescriptor>,
    fields: Option<BTreeSet<String>>,
    phase: Phase,
    events: VecDeque<Event>,
    external: FxHashMap<String, BTreeSet<String>>,
}

impl<'a> Restream<'a> {
    /// Replay `header` from `mds`, leaving external fields as datum ids.
    #[must_use]
    pub fn new(mds: &'a dyn MetadataStore, header: Header) -> Self {
        Self {
            mds,
            fs: None,
            descriptors: header.descriptors().to_vec(),
            header,
            fields: None,
            phase: Phase::Start,
            events: VecDeque::new(),
            external: FxHashMap::default(),
        }
    }

    /// Materialise external fields from `fs` while replaying.
    #[must_use]
    pub fn filled(mut self, fs: &'a dyn BlobStore) -> Self {
        self.external = self
            .header
            .descriptors()
            .iter()
            .map(|d| {
                let keys = d.external_keys().map(str::to_string).collect();
                (d.uid().to_string(), keys)
            })
            .collect();
        self.fs = Some(fs);
        self
    }

    /// Replay only the named fields.
    ///
    /// Descriptors are narrowed to the whitelisted fields and dropped, with
    /// their events, when they declare none of them. Events keep only the
    /// whitelisted values.
    #[must_use]
    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        let fields: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        self.descriptors = self
            .header
            .descriptors()
            .iter()
            .filter_map(|d| {
                let data_keys: BTreeMap<String, DataKey> = d
                    .data_keys()
                    .iter()
                    .filter(|(name, _)| fields.contains(name.as_str()))
                    .map(|(name, key)| (name.clone(), key.clone()))
                    .collect();
                (!data_keys.is_empty()).then(|| d.with_data_keys(data_keys))
            })
            .collect();
        self.fields = Some(fields);
        self
    }

    fn load_events(&mut self) -> Result<()> {
        let mut events = Vec::new();
        for descriptor in &self.descriptors {
            let stored = self.mds.events_for(descriptor.uid())?;
            match &self.fields {
                Some(fields) => events.extend(stored.iter().map(|e| e.retain_fields(fields))),
                None => events.extend(stored),
            }
        }
        events.sort_by(|a, b| a.time().partial_cmp(&b.time()).unwrap_or(Ordering::Equal));
        self.events = events.into();
        Ok(())
    }

    fn emit_event(&self, event: Event) -> Result<Document> {
        let Some(fs) = self.fs else {
            return Ok(Document::Event(event));
        };
        match self.external.get(event.descriptor()) {
            Some(keys) if !keys.is_empty() => Ok(Document::Event(fill_event(fs, keys, &event)?)),
            _ => Ok(Document::Event(event)),
        }
    }
}

impl Iterator for Restream<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.phase {
                Phase::Start => {
                    self.phase = Phase::Descriptors(0);
                    return Some(Ok(Document::Start(self.header.start().clone())));
                }
                Phase::Descriptors(i) => {
                    if let Some(desc) = self.descriptors.get(i) {
                        self.phase = Phase::Descriptors(i + 1);
                        return Some(Ok(Document::Descriptor(desc.clone())));
                    }
                    self.phase = Phase::Events;
                    if let Err(err) = self.load_events() {
                        self.phase = Phase::Done;
                        return Some(Err(err));
                    }
                }
                Phase::Events => match self.events.pop_front() {
                    Some(event) => {
                        let out = self.emit_event(event);
                        if out.is_err() {
                            self.phase = Phase::Done;
                        }
                        return Some(out);
                    }
                    None => self.phase = Phase::Stop,
                },
                Phase::Stop => {
                    self.phase = Phase::Done;
                    if let Some(stop) = self.header.stop() {
                        return Some(Ok(Document::Stop(stop.clone())));
                    }
                }
                Phase::Done => return None,
            }
        }
    }
}

impl FusedIterator for Restream<'_> {}
