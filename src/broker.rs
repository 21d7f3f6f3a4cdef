//! Broker - unified interface over a metadata store and a blob store

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::{Document, Event, Header};
use crate::locator::{Resolved, RunKey, RunLocator, UID_LENGTH};
use crate::replicator::{self, ExportOptions};
use crate::store::{
    BlobStore, MemoryBlobStore, MemoryFileSystem, MemoryMetadataStore, MetadataStore, RunQuery,
};
use crate::stream::{fill_event, DocumentStream, ExternalStoreInterceptor, Restream};
use crate::{Error, Result};

const fn default_uid_length() -> usize {
    UID_LENGTH
}

/// Broker configuration.
///
/// ```rust
/// use databroker::BrokerConfig;
///
/// let config = BrokerConfig::from_json(r#"{"filters": [{"owner": "dan"}]}"#).unwrap();
/// assert_eq!(config.filters.len(), 1);
/// assert_eq!(config.uid_length, 36);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Queries AND-ed with every search.
    #[serde(default)]
    pub filters: Vec<RunQuery>,
    /// Storage root for exported resources when none is given.
    #[serde(default)]
    pub default_root: Option<String>,
    /// Canonical run uid length used for exact-match lookups.
    #[serde(default = "default_uid_length")]
    pub uid_length: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            default_root: None,
            uid_length: UID_LENGTH,
        }
    }
}

impl BrokerConfig {
    /// Parse a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the text is not a valid configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Unified interface to a metadata store and a blob store.
///
/// # Example
///
/// ```rust
/// use databroker::document::RunStart;
/// use databroker::Broker;
///
/// # fn example() -> databroker::Result<()> {
/// let broker = Broker::in_memory("/data");
/// broker.mds().insert_run_start(RunStart::builder().scan_id(42).build())?;
///
/// let header = broker.resolve(42)?.into_vec().remove(0);
/// assert_eq!(header.start().scan_id(), Some(42));
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct Broker {
    mds: Arc<dyn MetadataStore>,
    fs: Arc<dyn BlobStore>,
    config: BrokerConfig,
}

impl Broker {
    /// Create a new broker builder.
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::default()
    }

    /// Broker over fresh in-memory stores with a private file namespace.
    #[must_use]
    pub fn in_memory(root: impl Into<String>) -> Self {
        Self::in_memory_shared(root, Arc::new(MemoryFileSystem::new()))
    }

    /// Broker over fresh in-memory stores writing into a shared namespace.
    #[must_use]
    pub fn in_memory_shared(root: impl Into<String>, files: Arc<MemoryFileSystem>) -> Self {
        Self {
            mds: Arc::new(MemoryMetadataStore::new()),
            fs: Arc::new(MemoryBlobStore::new(root, files)),
            config: BrokerConfig::default(),
        }
    }

    /// Metadata store.
    #[must_use]
    pub fn mds(&self) -> &Arc<dyn MetadataStore> {
        &self.mds
    }

    /// Blob store.
    #[must_use]
    pub fn fs(&self) -> &Arc<dyn BlobStore> {
        &self.fs
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Locator over this broker's metadata store.
    #[must_use]
    pub fn locator(&self) -> RunLocator<'_> {
        RunLocator::new(self.mds.as_ref()).with_uid_length(self.config.uid_length)
    }

    /// Resolve a key into one or more headers.
    ///
    /// # Errors
    ///
    /// See [`RunLocator::resolve`].
    pub fn resolve(&self, key: impl Into<RunKey>) -> Result<Resolved> {
        self.locator().resolve(key)
    }

    /// Add a query that restricts every search.
    pub fn add_filter(&mut self, query: RunQuery) {
        self.config.filters.push(query);
    }

    /// Remove every filter query.
    pub fn clear_filters(&mut self) {
        self.config.filters.clear();
    }

    /// Current filter queries.
    #[must_use]
    pub fn filters(&self) -> &[RunQuery] {
        &self.config.filters
    }

    /// Find headers of runs matching `query` and every filter, most recent
    /// first.
    ///
    /// With `data_key`, only runs whose descriptors declare that field are
    /// returned.
    ///
    /// # Errors
    ///
    /// Propagates metadata store failures.
    pub fn search(&self, query: &RunQuery, data_key: Option<&str>) -> Result<Vec<Header>> {
        let mut headers = Vec::new();
        for start in self.mds.find_run_starts(query)? {
            if !self.config.filters.iter().all(|f| f.matches(&start)) {
                continue;
            }
            let header = Header::from_run_start(self.mds.as_ref(), start)?;
            if data_key.map_or(true, |key| header.declares_field(key)) {
                headers.push(header);
            }
        }
        Ok(headers)
    }

    /// Replay a stored run as a document stream.
    ///
    /// With `fill`, externally stored values are retrieved and placed in
    /// the events.
    #[must_use]
    pub fn restream(&self, header: &Header, fill: bool) -> Restream<'_> {
        let stream = Restream::new(self.mds.as_ref(), header.clone());
        if fill {
            stream.filled(self.fs.as_ref())
        } else {
            stream
        }
    }

    /// Replay several runs back to back, optionally narrowed to `fields`.
    ///
    /// The stream ends after the first error.
    #[must_use]
    pub fn restream_many<'a>(
        &'a self,
        headers: &'a [Header],
        fields: Option<&'a BTreeSet<String>>,
        fill: bool,
    ) -> DocumentStream<'a> {
        let docs = headers.iter().flat_map(move |header| {
            let stream = self.restream(header, fill);
            match fields {
                Some(fields) => stream.fields(fields.iter().cloned()),
                None => stream,
            }
        });
        Box::new(docs.scan(false, |failed, doc| {
            if *failed {
                return None;
            }
            *failed = doc.is_err();
            Some(doc)
        }))
    }

    /// Populate an event of `header` with its externally stored data.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the event does not belong to `header`, and
    /// propagates blob store retrieval failures.
    pub fn fill_event(&self, header: &Header, event: &Event) -> Result<Event> {
        let descriptor = header
            .descriptors()
            .iter()
            .find(|d| d.uid() == event.descriptor())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "event '{}' does not belong to run '{}'",
                    event.uid(),
                    header.uid()
                ))
            })?;
        let external: BTreeSet<String> = descriptor.external_keys().map(str::to_string).collect();
        fill_event(self.fs.as_ref(), &external, event)
    }

    /// Uids of every resource referenced by the run.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn resource_uids(&self, header: &Header) -> Result<BTreeSet<String>> {
        replicator::resource_uids(self.mds.as_ref(), self.fs.as_ref(), header)
    }

    /// Interceptor persisting documents into this broker's stores.
    #[must_use]
    pub fn interceptor(&self) -> ExternalStoreInterceptor {
        ExternalStoreInterceptor::new(Arc::clone(&self.mds), Arc::clone(&self.fs))
    }

    /// Copy runs, and the external data they reference, into `destination`.
    ///
    /// Returns `(old_path, new_path)` pairs for every file copied.
    ///
    /// # Errors
    ///
    /// Propagates store failures; nothing already written is rolled back.
    pub fn export(
        &self,
        headers: &[Header],
        destination: &Self,
        options: &ExportOptions,
    ) -> Result<Vec<(String, String)>> {
        replicator::export(self, headers, destination, options)
    }

    /// Run `header`'s filled stream through `operator` and resolve the
    /// derived runs in `destination`.
    ///
    /// # Errors
    ///
    /// See [`replicator::drive_and_resolve`].
    pub fn drive_and_resolve<'a, Op, S>(
        &'a self,
        header: &Header,
        destination: &Self,
        operator: Op,
    ) -> Result<Vec<Header>>
    where
        Op: FnOnce(DocumentStream<'a>) -> S,
        S: Iterator<Item = Result<Document>>,
    {
        replicator::drive_and_resolve(self, header, destination, operator)
    }
}

/// Broker builder
#[derive(Default)]
pub struct BrokerBuilder {
    mds: Option<Arc<dyn MetadataStore>>,
    fs: Option<Arc<dyn BlobStore>>,
    config: BrokerConfig,
}

impl BrokerBuilder {
    /// Set the metadata store.
    #[must_use]
    pub fn metadata_store(mut self, mds: Arc<dyn MetadataStore>) -> Self {
        self.mds = Some(mds);
        self
    }

    /// Set the blob store.
    #[must_use]
    pub fn blob_store(mut self, fs: Arc<dyn BlobStore>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a filter query.
    #[must_use]
    pub fn filter(mut self, query: RunQuery) -> Self {
        self.config.filters.push(query);
        self
    }

    /// Build the broker
    ///
    /// # Errors
    ///
    /// Returns `Validation` if either store is missing.
    pub fn build(self) -> Result<Broker> {
        let mds = self
            .mds
            .ok_or_else(|| Error::Validation("broker needs a metadata store".to_string()))?;
        let fs = self
            .fs
            .ok_or_else(|| Error::Validation("broker needs a blob store".to_string()))?;
        Ok(Broker {
            mds,
            fs,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DataKey, EventDescriptor, RunStart};
    use serde_json::json;

    #[test]
    fn test_builder_requires_both_stores() {
        let err = Broker::builder()
            .metadata_store(Arc::new(MemoryMetadataStore::new()))
            .build();
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[test]
    fn test_search_applies_filters_and_data_key() {
        let mut broker = Broker::in_memory("");
        let mds = Arc::clone(broker.mds());
        for (owner, field) in [("dan", "x"), ("dan", "y"), ("tom", "x")] {
            let start = RunStart::builder().field("owner", json!(owner)).build();
            let desc = EventDescriptor::builder(start.uid())
                .data_key(field, DataKey::new())
                .build();
            mds.insert_run_start(start).unwrap();
            mds.insert_descriptor(desc).unwrap();
        }

        assert_eq!(broker.search(&RunQuery::new(), None).unwrap().len(), 3);
        assert_eq!(broker.search(&RunQuery::new(), Some("x")).unwrap().len(), 2);

        broker.add_filter(RunQuery::new().field("owner", json!("dan")));
        assert_eq!(broker.search(&RunQuery::new(), None).unwrap().len(), 2);
        assert_eq!(broker.search(&RunQuery::new(), Some("x")).unwrap().len(), 1);

        broker.clear_filters();
        assert!(broker.filters().is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config = BrokerConfig::from_json("{}").unwrap();
        assert_eq!(config, BrokerConfig::default());
        assert!(BrokerConfig::from_json("{\"uid_length\": \"x\"}").is_err());
    }
}
