//! Run Locator - resolve user-supplied keys into run headers
//!
//! A key is interpreted by its shape:
//!
//! | Key                      | Meaning                                   |
//! |--------------------------|-------------------------------------------|
//! | `RunKey::ScanId(n >= 0)` | most recent run with scan id `n`          |
//! | `RunKey::ScanId(n < 0)`  | the `|n|`-th most recent run              |
//! | `RunKey::Range`          | a slice into the most recent runs         |
//! | `RunKey::Uid`            | full uid, or unambiguous uid prefix       |
//! | `RunKey::Many`           | each element resolved in order            |
//!
//! ```rust
//! use databroker::document::RunStart;
//! use databroker::locator::{RunKey, RunLocator};
//! use databroker::store::{MemoryMetadataStore, MetadataStore};
//!
//! # fn example() -> databroker::Result<()> {
//! let mds = MemoryMetadataStore::new();
//! for scan_id in 1..=3 {
//!     mds.insert_run_start(RunStart::builder().scan_id(scan_id).build())?;
//! }
//! let locator = RunLocator::new(&mds);
//!
//! let latest = locator.resolve(-1)?.into_vec();
//! assert_eq!(latest[0].start().scan_id(), Some(3));
//!
//! let last_two = locator.resolve(-2..0)?;
//! assert_eq!(last_two.len(), 2);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::fmt;
use std::ops::{Range, RangeFrom};

use serde_json::Value;
use tracing::{debug, info};

use crate::document::{Header, RunStart};
use crate::store::{MetadataStore, RunQuery};
use crate::{Error, Result};

/// Length of a canonical (hyphenated UUID) run identifier.
pub const UID_LENGTH: usize = 36;

const SUPPORTED_SHAPES: &str = "Must give an integer scan ID like 6, a range into past \
    scans like -5 or -5..0 (start -5, stop 0, step 2), a list like [1, 7, 13], a (partial) \
    uid like 'a23jslk' or a full uid like 'f26efc1d-8263-46c8-a560-7bf73d2786e1'.";

/// A slice into past runs, counted backwards from the most recent.
///
/// `start` is how far back to begin (must be negative), `stop` how far back
/// to end (`None` or `<= 0`), and `step` the stride over the most-recent-first
/// list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunRange {
    /// How far back to start; required and negative.
    pub start: Option<i64>,
    /// How far back to stop; `None` or `<= 0`.
    pub stop: Option<i64>,
    /// Stride over the most-recent-first list; nonzero.
    pub step: Option<i64>,
}

impl RunRange {
    /// Create a range from its three optional bounds.
    #[must_use]
    pub const fn new(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Self {
        Self { start, stop, step }
    }

    /// The `n` most recent runs.
    #[must_use]
    pub const fn last(n: i64) -> Self {
        Self::new(Some(-n), None, None)
    }

    /// Same range with a stride.
    #[must_use]
    pub const fn step_by(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    fn validate(&self) -> Result<(usize, Option<usize>)> {
        if let Some(start) = self.start {
            if start > -1 {
                return Err(Error::Validation(format!(
                    "range start must be negative. You gave me {self}. \
                     The offending part is start={start}"
                )));
            }
        }
        if let Some(stop) = self.stop {
            if stop > 0 {
                return Err(Error::Validation(format!(
                    "range stop must be <= 0. You gave me {self}. \
                     The offending part is stop={stop}"
                )));
            }
        }
        let Some(start) = self.start else {
            return Err(Error::Validation(
                "range start cannot be None because slicing infinitely into the past is \
                 not supported; the size of the result would be unbounded."
                    .to_string(),
            ));
        };
        let depth = to_count(start)?;
        let from = self.stop.map(to_count).transpose()?;
        Ok((depth, from))
    }
}

impl fmt::Display for RunRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |bound: Option<i64>| bound.map_or_else(|| "None".to_string(), |b| b.to_string());
        write!(
            f,
            "range(start={}, stop={}, step={})",
            show(self.start),
            show(self.stop),
            show(self.step)
        )
    }
}

fn to_count(n: i64) -> Result<usize> {
    usize::try_from(n.unsigned_abs())
        .map_err(|_| Error::Validation(format!("{n} is too far into the past")))
}

/// A key identifying one or more runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunKey {
    /// Scan id when non-negative, distance into the past when negative
    ScanId(i64),
    /// Slice into past runs
    Range(RunRange),
    /// Full uid or uid prefix
    Uid(String),
    /// Ordered collection, resolved elementwise
    Many(Vec<RunKey>),
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScanId(n) => write!(f, "{n}"),
            Self::Range(range) => write!(f, "{range}"),
            Self::Uid(uid) => write!(f, "{uid:?}"),
            Self::Many(keys) => {
                f.write_str("[")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for RunKey {
    fn from(n: i64) -> Self {
        Self::ScanId(n)
    }
}

impl From<i32> for RunKey {
    fn from(n: i32) -> Self {
        Self::ScanId(i64::from(n))
    }
}

impl From<&str> for RunKey {
    fn from(uid: &str) -> Self {
        Self::Uid(uid.to_string())
    }
}

impl From<String> for RunKey {
    fn from(uid: String) -> Self {
        Self::Uid(uid)
    }
}

impl From<&String> for RunKey {
    fn from(uid: &String) -> Self {
        Self::Uid(uid.clone())
    }
}

impl From<RunRange> for RunKey {
    fn from(range: RunRange) -> Self {
        Self::Range(range)
    }
}

impl From<Range<i64>> for RunKey {
    fn from(range: Range<i64>) -> Self {
        Self::Range(RunRange::new(Some(range.start), Some(range.end), None))
    }
}

impl From<RangeFrom<i64>> for RunKey {
    fn from(range: RangeFrom<i64>) -> Self {
        Self::Range(RunRange::new(Some(range.start), None, None))
    }
}

impl From<Range<i32>> for RunKey {
    fn from(range: Range<i32>) -> Self {
        Self::from(i64::from(range.start)..i64::from(range.end))
    }
}

impl From<RangeFrom<i32>> for RunKey {
    fn from(range: RangeFrom<i32>) -> Self {
        Self::from(i64::from(range.start)..)
    }
}

impl<K: Into<Self>> From<Vec<K>> for RunKey {
    fn from(keys: Vec<K>) -> Self {
        Self::Many(keys.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<&Value> for RunKey {
    type Error = Error;

    /// Interpret a JSON value as a key: integers, strings, arrays of keys,
    /// and `{"start", "stop", "step"}` objects are accepted.
    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::ScanId)
                .ok_or_else(|| Error::Validation(SUPPORTED_SHAPES.to_string())),
            Value::String(uid) => Ok(Self::Uid(uid.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::try_from)
                .collect::<Result<Vec<_>>>()
                .map(Self::Many),
            Value::Object(map)
                if !map.is_empty()
                    && map.keys().all(|k| matches!(k.as_str(), "start" | "stop" | "step")) =>
            {
                let bound = |name: &str| -> Result<Option<i64>> {
                    match map.get(name) {
                        None | Some(Value::Null) => Ok(None),
                        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
                            Error::Validation(format!("range {name} must be an integer, got {v}"))
                        }),
                    }
                };
                Ok(Self::Range(RunRange::new(
                    bound("start")?,
                    bound("stop")?,
                    bound("step")?,
                )))
            }
            _ => Err(Error::Validation(SUPPORTED_SHAPES.to_string())),
        }
    }
}

/// Outcome of resolving a key: one header, or an ordered list of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Key named a single run
    One(Header),
    /// Key named a range or collection
    Many(Vec<Header>),
}

impl Resolved {
    /// Flatten into a list of headers.
    #[must_use]
    pub fn into_vec(self) -> Vec<Header> {
        match self {
            Self::One(header) => vec![header],
            Self::Many(headers) => headers,
        }
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(headers) => headers.len(),
        }
    }

    /// Whether no headers were resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single header, if the key named exactly one run.
    #[must_use]
    pub const fn as_one(&self) -> Option<&Header> {
        match self {
            Self::One(header) => Some(header),
            Self::Many(_) => None,
        }
    }
}

/// Resolves keys against a metadata store.
pub struct RunLocator<'a> {
    mds: &'a dyn MetadataStore,
    uid_length: usize,
}

impl<'a> RunLocator<'a> {
    /// Create a locator over `mds` using canonical 36-character uids.
    #[must_use]
    pub fn new(mds: &'a dyn MetadataStore) -> Self {
        Self {
            mds,
            uid_length: UID_LENGTH,
        }
    }

    /// Override the canonical uid length used for the exact-match shortcut.
    #[must_use]
    pub const fn with_uid_length(mut self, uid_length: usize) -> Self {
        self.uid_length = uid_length;
        self
    }

    /// Resolve `key` into one or more headers.
    ///
    /// # Errors
    ///
    /// - `NotFound` when no run has the given scan id
    /// - `OutOfRange` when a negative index reaches past the oldest run
    /// - `Validation` for invalid ranges and absent or ambiguous uids
    pub fn resolve(&self, key: impl Into<RunKey>) -> Result<Resolved> {
        self.resolve_key(&key.into())
    }

    /// Resolve an already-built key.
    ///
    /// # Errors
    ///
    /// See [`RunLocator::resolve`].
    pub fn resolve_key(&self, key: &RunKey) -> Result<Resolved> {
        match key {
            RunKey::ScanId(n) if *n >= 0 => self.by_scan_id(*n).map(Resolved::One),
            RunKey::ScanId(n) => self.by_recency(*n).map(Resolved::One),
            RunKey::Range(range) => self.by_range(range).map(Resolved::Many),
            RunKey::Uid(uid) => self.by_uid(uid).map(Resolved::One),
            RunKey::Many(keys) => {
                info!(target: "databroker::locator", key = %key, "Interpreting key as a collection");
                let mut headers = Vec::with_capacity(keys.len());
                for key in keys {
                    headers.extend(self.resolve_key(key)?.into_vec());
                }
                Ok(Resolved::Many(headers))
            }
        }
    }

    fn header(&self, start: RunStart) -> Result<Header> {
        Header::from_run_start(self.mds, start)
    }

    fn by_scan_id(&self, scan_id: i64) -> Result<Header> {
        info!(target: "databroker::locator", key = scan_id, "Interpreting key as a scan id");
        let start = self
            .mds
            .find_run_starts(&RunQuery::new().scan_id(scan_id))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No such run found for key={scan_id} which is being interpreted as a scan id."
                ))
            })?;
        self.header(start)
    }

    fn by_recency(&self, n: i64) -> Result<Header> {
        info!(target: "databroker::locator", key = n, "Interpreting key as the Nth most recent run");
        let requested = to_count(n)?;
        let mut recent = self.mds.find_last(requested)?;
        if recent.len() < requested {
            return Err(Error::OutOfRange {
                requested,
                available: recent.len(),
            });
        }
        recent.truncate(requested);
        let start = recent.pop().ok_or(Error::OutOfRange {
            requested,
            available: 0,
        })?;
        self.header(start)
    }

    fn by_range(&self, range: &RunRange) -> Result<Vec<Header>> {
        info!(target: "databroker::locator", key = %range, "Interpreting key as a range");
        let (depth, from) = range.validate()?;
        let recent = self.mds.find_last(depth)?;
        slice_recent(recent, from, range.step)?
            .into_iter()
            .map(|start| self.header(start))
            .collect()
    }

    fn by_uid(&self, key: &str) -> Result<Header> {
        info!(target: "databroker::locator", key = %key, "Interpreting key as a uid");
        if key.is_empty() {
            return Err(Error::Validation(
                "No such run found for an empty uid".to_string(),
            ));
        }
        let mut results = Vec::new();
        if key.len() == self.uid_length {
            debug!(target: "databroker::locator", key = %key, "Treating key as a full uid");
            results = self.mds.find_run_starts(&RunQuery::new().uid(key))?;
            debug!(target: "databroker::locator", key = %key, found = results.len(), "Full uid lookup done");
        }
        if results.is_empty() {
            debug!(target: "databroker::locator", key = %key, "Treating key as a partial uid");
            results = self.mds.find_run_starts(&RunQuery::new().uid_prefix(key))?;
        }
        match results.len() {
            0 => Err(Error::Validation(format!("No such run found for key={key:?}"))),
            1 => {
                let start = results.remove(0);
                self.header(start)
            }
            n => Err(Error::Validation(format!(
                "key={key:?} matches {n} runs. Provide more characters."
            ))),
        }
    }
}

/// Apply `[from::step]` slicing to a most-recent-first list.
///
/// An open `from` starts at the head for a positive step and at the tail
/// for a negative one.
fn slice_recent(
    recent: Vec<RunStart>,
    from: Option<usize>,
    step: Option<i64>,
) -> Result<Vec<RunStart>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Error::Validation("range step cannot be zero".to_string()));
    }
    let stride = to_count(step)?;
    if step > 0 {
        return Ok(recent
            .into_iter()
            .skip(from.unwrap_or(0))
            .step_by(stride)
            .collect());
    }
    // Negative stride walks back toward the most recent run.
    let Some(last) = recent.len().checked_sub(1) else {
        return Ok(Vec::new());
    };
    let first = from.map_or(last, |from| from.min(last));
    let mut slots: Vec<Option<RunStart>> = recent.into_iter().map(Some).collect();
    Ok((0..=first)
        .rev()
        .step_by(stride)
        .filter_map(|i| slots[i].take())
        .collect())
}
