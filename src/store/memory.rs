//! In-memory metadata store using `DashMap`.
//!
//! Data is lost on process restart. Documents are stamped with an insertion
//! sequence number so that runs created within the same clock tick still
//! have a well-defined recency order.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{MetadataStore, RunQuery};
use crate::document::{Event, EventDescriptor, RunStart, RunStop};
use crate::{Error, Result};

/// In-memory metadata store.
///
/// Thread-safe, and enforces the referential invariants of the document
/// model on insert: descriptors and stops must name a known run start,
/// events must name a known descriptor, uids are never reused and a run is
/// stopped at most once.
///
/// # Example
///
/// ```rust
/// use databroker::document::{ExitStatus, RunStart, RunStop};
/// use databroker::store::{MemoryMetadataStore, MetadataStore};
///
/// # fn example() -> databroker::Result<()> {
/// let mds = MemoryMetadataStore::new();
/// let start = RunStart::builder().build();
/// let uid = start.uid().to_string();
/// mds.insert_run_start(start)?;
/// mds.insert_run_stop(RunStop::new(&uid, ExitStatus::Success))?;
/// assert!(mds.stop_for(&uid)?.is_some());
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    starts: DashMap<String, (u64, RunStart)>,
    descriptors: DashMap<String, (u64, EventDescriptor)>,
    events: DashMap<String, (u64, Event)>,
    stops: DashMap<String, RunStop>,
    seq: AtomicU64,
}

impl MemoryMetadataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs in the store.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.starts.len()
    }

    /// Number of events in the store.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Check if the store holds no runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn starts_most_recent_first(&self) -> Vec<(u64, RunStart)> {
        let mut starts: Vec<(u64, RunStart)> =
            self.starts.iter().map(|entry| entry.value().clone()).collect();
        starts.sort_by(|(seq_a, a), (seq_b, b)| {
            b.time()
                .partial_cmp(&a.time())
                .unwrap_or(Ordering::Equal)
                .then(seq_b.cmp(seq_a))
        });
        starts
    }
}

fn duplicate(kind: &str, uid: &str) -> Error {
    Error::Store(format!("{kind} with uid '{uid}' already exists"))
}

impl MetadataStore for MemoryMetadataStore {
    fn find_run_starts(&self, query: &RunQuery) -> Result<Vec<RunStart>> {
        Ok(self
            .starts_most_recent_first()
            .into_iter()
            .map(|(_, start)| start)
            .filter(|start| query.matches(start))
            .collect())
    }

    fn find_last(&self, n: usize) -> Result<Vec<RunStart>> {
        Ok(self
            .starts_most_recent_first()
            .into_iter()
            .take(n)
            .map(|(_, start)| start)
            .collect())
    }

    fn descriptors_for(&self, run_start: &str) -> Result<Vec<EventDescriptor>> {
        let mut descriptors: Vec<(u64, EventDescriptor)> = self
            .descriptors
            .iter()
            .filter(|entry| entry.value().1.run_start() == run_start)
            .map(|entry| entry.value().clone())
            .collect();
        descriptors.sort_by_key(|(seq, _)| *seq);
        Ok(descriptors.into_iter().map(|(_, d)| d).collect())
    }

    fn stop_for(&self, run_start: &str) -> Result<Option<RunStop>> {
        Ok(self.stops.get(run_start).map(|stop| stop.value().clone()))
    }

    fn events_for(&self, descriptor: &str) -> Result<Vec<Event>> {
        let mut events: Vec<(u64, Event)> = self
            .events
            .iter()
            .filter(|entry| entry.value().1.descriptor() == descriptor)
            .map(|entry| entry.value().clone())
            .collect();
        events.sort_by(|(seq_a, a), (seq_b, b)| {
            a.time()
                .partial_cmp(&b.time())
                .unwrap_or(Ordering::Equal)
                .then(seq_a.cmp(seq_b))
        });
        Ok(events.into_iter().map(|(_, e)| e).collect())
    }

    fn insert_run_start(&self, doc: RunStart) -> Result<()> {
        let seq = self.next_seq();
        match self.starts.entry(doc.uid().to_string()) {
            Entry::Occupied(entry) => Err(duplicate("run start", entry.key())),
            Entry::Vacant(entry) => {
                entry.insert((seq, doc));
                Ok(())
            }
        }
    }

    fn insert_descriptor(&self, doc: EventDescriptor) -> Result<()> {
        if !self.starts.contains_key(doc.run_start()) {
            return Err(Error::Store(format!(
                "descriptor '{}' references unknown run start '{}'",
                doc.uid(),
                doc.run_start()
            )));
        }
        let seq = self.next_seq();
        match self.descriptors.entry(doc.uid().to_string()) {
            Entry::Occupied(entry) => Err(duplicate("descriptor", entry.key())),
            Entry::Vacant(entry) => {
                entry.insert((seq, doc));
                Ok(())
            }
        }
    }

    fn insert_event(&self, doc: Event) -> Result<()> {
        if !self.descriptors.contains_key(doc.descriptor()) {
            return Err(Error::Store(format!(
                "event '{}' references unknown descriptor '{}'",
                doc.uid(),
                doc.descriptor()
            )));
        }
        let seq = self.next_seq();
        let doc = doc.without_filled();
        match self.events.entry(doc.uid().to_string()) {
            Entry::Occupied(entry) => Err(duplicate("event", entry.key())),
            Entry::Vacant(entry) => {
                entry.insert((seq, doc));
                Ok(())
            }
        }
    }

    fn insert_run_stop(&self, doc: RunStop) -> Result<()> {
        if !self.starts.contains_key(doc.run_start()) {
            return Err(Error::Store(format!(
                "run stop '{}' references unknown run start '{}'",
                doc.uid(),
                doc.run_start()
            )));
        }
        match self.stops.entry(doc.run_start().to_string()) {
            Entry::Occupied(entry) => Err(Error::Store(format!(
                "run '{}' already has a stop document",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(doc);
                Ok(())
            }
        }
    }
}
