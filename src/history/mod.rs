//! # Historian
//!
//! Records and serves historical values of historizing variables.
//!
//! [`HistoryBackend`] is the durability seam; [`MemoryHistorian`] is the
//! in-memory ring-buffer implementation. The live write path feeds
//! `record_update`; the access-controlled history services use `update` and
//! `delete_raw`.
//!
//! Paged reads are stateless on the server: a [`ContinuationPoint`] encodes
//! the last key returned plus a fingerprint of the request parameters, so a
//! follow-up with different parameters is rejected.

mod memory;

pub use memory::MemoryHistorian;

use std::hash::{DefaultHasher, Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DataValue, NodeId, StatusCode};
use crate::{Error, Result};

/// Order of values returned by `read_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HistoryOrdering {
    #[default]
    SourceTimestamp,
    Arrival,
}

/// Parameters of a raw history read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRawDetails {
    /// A start later than `end` returns values newest first.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// 0 means no limit besides the page size.
    pub max_values_per_node: u32,
    /// Add the nearest values just outside `[start, end]`; a sample exactly
    /// on a bound serves as that bound.
    pub return_bounds: bool,
    pub ordering: HistoryOrdering,
}

impl ReadRawDetails {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end, max_values_per_node: 0, return_bounds: false, ordering: HistoryOrdering::default() }
    }

    /// Everything ever recorded, oldest first.
    pub fn all() -> Self {
        Self::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
    }

    pub fn with_max_values(mut self, max: u32) -> Self {
        self.max_values_per_node = max;
        self
    }

    pub fn with_bounds(mut self) -> Self {
        self.return_bounds = true;
        self
    }

    pub fn with_ordering(mut self, ordering: HistoryOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn is_reverse(&self) -> bool {
        self.start > self.end
    }

    fn fingerprint(&self, node: &NodeId) -> u64 {
        let mut h = DefaultHasher::new();
        node.hash(&mut h);
        self.start.hash(&mut h);
        self.end.hash(&mut h);
        self.max_values_per_node.hash(&mut h);
        self.return_bounds.hash(&mut h);
        self.ordering.hash(&mut h);
        h.finish()
    }
}

/// Resume key of a paged read: the last `(timestamp, arrival)` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct HistoryKey {
    pub secs: i64,
    pub nanos: u32,
    pub seq: u64,
}

/// Opaque token resuming a paged read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationPoint(Vec<u8>);

impl ContinuationPoint {
    const LEN: usize = 8 + 8 + 4 + 8;

    pub(crate) fn encode(details: &ReadRawDetails, node: &NodeId, key: HistoryKey) -> Self {
        let mut bytes = Vec::with_capacity(Self::LEN);
        bytes.extend_from_slice(&details.fingerprint(node).to_le_bytes());
        bytes.extend_from_slice(&key.secs.to_le_bytes());
        bytes.extend_from_slice(&key.nanos.to_le_bytes());
        bytes.extend_from_slice(&key.seq.to_le_bytes());
        Self(bytes)
    }

    /// The key to resume after, if the token belongs to this request.
    pub(crate) fn decode(&self, details: &ReadRawDetails, node: &NodeId) -> Result<HistoryKey> {
        if self.0.len() != Self::LEN {
            return Err(Error::InvalidContinuationPoint);
        }
        let word = |range: std::ops::Range<usize>| -> [u8; 8] {
            let mut out = [0u8; 8];
            out.copy_from_slice(&self.0[range]);
            out
        };
        if u64::from_le_bytes(word(0..8)) != details.fingerprint(node) {
            return Err(Error::InvalidContinuationPoint);
        }
        let mut nanos = [0u8; 4];
        nanos.copy_from_slice(&self.0[16..20]);
        Ok(HistoryKey {
            secs: i64::from_le_bytes(word(8..16)),
            nanos: u32::from_le_bytes(nanos),
            seq: u64::from_le_bytes(word(20..28)),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// One page of a raw read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryData {
    pub values: Vec<DataValue>,
    pub continuation_point: Option<ContinuationPoint>,
}

/// How a history update treats existing entries at the same source
/// timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    /// Fails with BadEntryExists if an entry exists.
    Insert,
    /// Fails with BadNoEntryExists if none exists.
    Replace,
    /// Insert or replace.
    Upsert,
}

/// Storage behind the historian.
pub trait HistoryBackend: Send + Sync {
    /// Append a live value. Never fails; a full buffer drops its oldest entry.
    fn record_update(&self, node: &NodeId, value: DataValue);

    fn read_raw(&self, details: &ReadRawDetails, node: &NodeId, continuation: Option<&ContinuationPoint>) -> Result<HistoryData>;

    /// One status per value.
    fn update(&self, node: &NodeId, kind: UpdateKind, values: Vec<DataValue>) -> Vec<StatusCode>;

    /// Remove entries with a source timestamp in `[start, end]`; returns the
    /// number removed.
    fn delete_raw(&self, node: &NodeId, start: DateTime<Utc>, end: DateTime<Utc>) -> usize;

    /// Prepare a buffer; `None` uses the backend's default capacity.
    fn register_node(&self, node: &NodeId, capacity: Option<usize>);

    fn value_count(&self, node: &NodeId) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_point_checks_parameters() {
        let node = NodeId::numeric(1, 7);
        let details = ReadRawDetails::all().with_max_values(10);
        let key = HistoryKey { secs: 12, nanos: 34, seq: 56 };
        let cp = ContinuationPoint::encode(&details, &node, key);
        assert_eq!(cp.decode(&details, &node).unwrap(), key);

        let other = details.clone().with_max_values(11);
        assert!(matches!(cp.decode(&other, &node), Err(Error::InvalidContinuationPoint)));
        assert!(matches!(cp.decode(&details, &NodeId::numeric(1, 8)), Err(Error::InvalidContinuationPoint)));
        assert!(matches!(
            ContinuationPoint::from_bytes(vec![1, 2, 3]).decode(&details, &node),
            Err(Error::InvalidContinuationPoint)
        ));
    }
}
