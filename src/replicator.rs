//! Run Replicator - derive runs into a destination, and bulk-copy runs
//!
//! Two operations move runs between brokers:
//!
//! - [`drive_and_resolve`]: push a source run through a stream operator
//!   (typically an [`EventMap`](crate::stream::EventMap) feeding a
//!   destination [`ExternalStoreInterceptor`](crate::stream::ExternalStoreInterceptor)),
//!   then look up the derived runs in the destination
//! - [`export`]: copy runs verbatim, re-registering every resource they
//!   reference under a new uid and re-pointing its datums at it

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::document::{Document, Header};
use crate::locator::RunKey;
use crate::store::{BlobStore, CopyOptions, MetadataStore};
use crate::stream::DocumentStream;
use crate::{Broker, Result};

/// Options for [`export`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Root directory for copied files. Falls back to the destination's
    /// configured default root, then to each resource's current root.
    #[serde(default)]
    pub new_root: Option<String>,
    /// Passed through to [`BlobStore::copy_files`].
    #[serde(default)]
    pub copy: CopyOptions,
}

impl ExportOptions {
    /// Export under `new_root`.
    #[must_use]
    pub fn with_root(new_root: impl Into<String>) -> Self {
        Self {
            new_root: Some(new_root.into()),
            copy: CopyOptions::default(),
        }
    }
}

/// Uids of every resource referenced by `header`'s run.
///
/// Scans the descriptors for externally stored fields, reads the datum ids
/// those fields hold in the stored events, and maps each to its resource.
///
/// # Errors
///
/// Propagates store failures, including datum ids the blob store does not
/// know.
pub fn resource_uids(
    mds: &dyn MetadataStore,
    fs: &dyn BlobStore,
    header: &Header,
) -> Result<BTreeSet<String>> {
    let mut resources = BTreeSet::new();
    for descriptor in header.descriptors() {
        let external: Vec<&str> = descriptor.external_keys().collect();
        if external.is_empty() {
            continue;
        }
        for event in mds.events_for(descriptor.uid())? {
            for field in &external {
                if let Some(Value::String(datum_id)) = event.data().get(*field) {
                    resources.insert(fs.resource_given_eid(datum_id)?.uid().to_string());
                }
            }
        }
    }
    Ok(resources)
}

/// Copy `headers` and their external data from `source` into `destination`.
///
/// Documents are inserted verbatim (events without fill bookkeeping). Each
/// referenced resource has its content copied, is registered anew in the
/// destination under a fresh uid, and every datum of the old resource is
/// registered against the new one with its datum id unchanged, so stored
/// events keep resolving.
///
/// # Errors
///
/// Propagates store failures. Nothing written before a failure is undone.
pub fn export(
    source: &Broker,
    headers: &[Header],
    destination: &Broker,
    options: &ExportOptions,
) -> Result<Vec<(String, String)>> {
    let new_root = options
        .new_root
        .as_deref()
        .or(destination.config().default_root.as_deref());
    let dest_mds = destination.mds();
    let dest_fs = destination.fs();
    let mut file_pairs = Vec::new();

    for header in headers {
        info!(target: "databroker::export", run = %header.uid(), "Exporting run");
        dest_mds.insert_run_start(header.start().clone())?;
        for descriptor in header.descriptors() {
            dest_mds.insert_descriptor(descriptor.clone())?;
        }
        for descriptor in header.descriptors() {
            for event in source.mds().events_for(descriptor.uid())? {
                dest_mds.insert_event(event.without_filled())?;
            }
        }
        if let Some(stop) = header.stop() {
            dest_mds.insert_run_stop(stop.clone())?;
        }

        for uid in source.resource_uids(header)? {
            file_pairs.extend(source.fs().copy_files(&uid, new_root, &options.copy)?);
            let resource = source.fs().resource_given_uid(&uid)?;
            let new_resource = dest_fs.insert_resource(
                resource.spec(),
                resource.resource_path(),
                resource.resource_kwargs().clone(),
                Some(new_root.unwrap_or(resource.root())),
            )?;
            let datums = source.fs().datum_gen_given_resource(&uid)?;
            debug!(target: "databroker::export", old = %uid, new = %new_resource.uid(), datums = datums.len(), "Re-registered resource");
            for datum in datums {
                dest_fs.insert_datum(&new_resource, datum.datum_id(), datum.datum_kwargs().clone())?;
            }
        }
    }
    info!(target: "databroker::export", runs = headers.len(), files = file_pairs.len(), "Export finished");
    Ok(file_pairs)
}

/// Run `header`'s filled document stream through `operator`, then resolve
/// every derived run it started in `destination`.
///
/// The operator is responsible for persisting into `destination`, usually
/// by ending in `destination.interceptor()`.
///
/// # Errors
///
/// Propagates the first error raised by the stream, then any lookup
/// failure in the destination (e.g. a derived run that was not persisted).
pub fn drive_and_resolve<'a, Op, S>(
    source: &'a Broker,
    header: &Header,
    destination: &Broker,
    operator: Op,
) -> Result<Vec<Header>>
where
    Op: FnOnce(DocumentStream<'a>) -> S,
    S: Iterator<Item = Result<Document>>,
{
    let stream: DocumentStream<'a> = Box::new(source.restream(header, true));
    let mut derived = Vec::new();
    for doc in operator(stream) {
        if let Document::Start(start) = doc? {
            derived.push(RunKey::Uid(start.uid().to_string()));
        }
    }
    debug!(target: "databroker::export", source = %header.uid(), derived = derived.len(), "Stream drained");
    Ok(destination.resolve(RunKey::Many(derived))?.into_vec())
}
