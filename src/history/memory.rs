//! In-memory historian.
//!
//! One ring buffer per node behind its own mutex; the outer map lock is only
//! taken to find or create a buffer. Entries are kept in arrival order and
//! sorted per read.
//!
//! ## Limitations
//!
//! - Nothing survives a restart.
//! - Reads copy the matching range before paging, so very large buffers make
//!   every page cost a full scan.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::config::HistoryConfig;
use crate::model::{DataValue, NodeId, StatusCode, Variant};
use crate::Result;

use super::{
    ContinuationPoint, HistoryBackend, HistoryData, HistoryKey, HistoryOrdering, ReadRawDetails,
    UpdateKind,
};

// ============================================================================
// NodeBuffer
// ============================================================================

struct Entry {
    seq: u64,
    value: DataValue,
}

impl Entry {
    fn timestamp(&self) -> DateTime<Utc> {
        self.value
            .source_timestamp
            .or(self.value.server_timestamp)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn key(&self, ordering: HistoryOrdering) -> HistoryKey {
        match ordering {
            HistoryOrdering::SourceTimestamp => {
                let ts = self.timestamp();
                HistoryKey { secs: ts.timestamp(), nanos: ts.timestamp_subsec_nanos(), seq: self.seq }
            }
            HistoryOrdering::Arrival => HistoryKey { secs: 0, nanos: 0, seq: self.seq },
        }
    }
}

struct NodeBuffer {
    capacity: usize,
    entries: VecDeque<Entry>,
    next_seq: u64,
}

impl NodeBuffer {
    fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: VecDeque::new(), next_seq: 0 }
    }

    fn push(&mut self, node: &NodeId, value: DataValue) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(Entry { seq, value });
        self.evict(node);
    }

    fn evict(&mut self, node: &NodeId) {
        let mut evicted = 0usize;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            trace!(node = %node, evicted, capacity = self.capacity, "history buffer full, oldest evicted");
        }
    }

    fn position_at(&self, ts: DateTime<Utc>) -> Option<usize> {
        self.entries.iter().position(|e| e.value.source_timestamp == Some(ts))
    }
}

/// Stamp missing timestamps so every entry sorts somewhere sensible.
fn stamped(mut value: DataValue) -> DataValue {
    let now = Utc::now();
    if value.server_timestamp.is_none() {
        value.server_timestamp = Some(now);
    }
    if value.source_timestamp.is_none() {
        value.source_timestamp = value.server_timestamp;
    }
    value
}

/// Bounding value at `at`: the nearest entry at or before it (`before`) or
/// at or after it. `None` when an entry sits exactly on `at`, since the
/// range itself already returns it.
fn bound_value<'a>(entries: impl IntoIterator<Item = &'a Entry>, at: DateTime<Utc>, before: bool) -> Option<DataValue> {
    let by_time = |e: &&Entry| e.key(HistoryOrdering::SourceTimestamp);
    let candidates = entries
        .into_iter()
        .filter(|e| if before { e.timestamp() <= at } else { e.timestamp() >= at });
    let nearest = if before { candidates.max_by_key(by_time) } else { candidates.min_by_key(by_time) };
    match nearest {
        Some(e) if e.timestamp() == at => None,
        Some(e) => Some(e.value.clone()),
        None => Some(bound_placeholder(at)),
    }
}

fn bound_placeholder(at: DateTime<Utc>) -> DataValue {
    DataValue {
        value: Variant::Empty,
        status: StatusCode::BAD_BOUND_NOT_FOUND,
        source_timestamp: Some(at),
        server_timestamp: None,
    }
}

// ============================================================================
// MemoryHistorian
// ============================================================================

/// Ring-buffer [`HistoryBackend`].
pub struct MemoryHistorian {
    nodes: RwLock<HashMap<NodeId, Arc<Mutex<NodeBuffer>>>>,
    default_capacity: usize,
    page_size: usize,
}

impl MemoryHistorian {
    pub fn new(default_capacity: usize, page_size: usize) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            default_capacity: default_capacity.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::new(config.default_capacity, config.page_size)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    fn buffer(&self, node: &NodeId) -> Option<Arc<Mutex<NodeBuffer>>> {
        self.nodes.read().get(node).cloned()
    }

    fn buffer_or_insert(&self, node: &NodeId) -> Arc<Mutex<NodeBuffer>> {
        if let Some(b) = self.buffer(node) {
            return b;
        }
        self.nodes
            .write()
            .entry(node.clone())
            .or_insert_with(|| Arc::new(Mutex::new(NodeBuffer::new(self.default_capacity))))
            .clone()
    }
}

impl Default for MemoryHistorian {
    fn default() -> Self {
        Self::from_config(&HistoryConfig::default())
    }
}

impl std::fmt::Debug for MemoryHistorian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHistorian")
            .field("nodes", &self.node_count())
            .field("default_capacity", &self.default_capacity)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl HistoryBackend for MemoryHistorian {
    fn record_update(&self, node: &NodeId, value: DataValue) {
        self.buffer_or_insert(node).lock().push(node, stamped(value));
    }

    fn read_raw(&self, details: &ReadRawDetails, node: &NodeId, continuation: Option<&ContinuationPoint>) -> Result<HistoryData> {
        let resume = continuation.map(|cp| cp.decode(details, node)).transpose()?;
        let Some(buffer) = self.buffer(node) else {
            return Ok(HistoryData::default());
        };
        let buffer = buffer.lock();

        let reverse = details.is_reverse();
        let (lo, hi) = if reverse { (details.end, details.start) } else { (details.start, details.end) };

        let mut rows: Vec<(HistoryKey, &Entry)> = buffer
            .entries
            .iter()
            .filter(|e| {
                let ts = e.timestamp();
                ts >= lo && ts <= hi
            })
            .map(|e| (e.key(details.ordering), e))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        if reverse {
            rows.reverse();
        }
        if let Some(after) = resume {
            rows.retain(|(k, _)| if reverse { *k < after } else { *k > after });
        }

        let limit = match details.max_values_per_node {
            0 => self.page_size,
            max => (max as usize).min(self.page_size),
        };
        let more = rows.len() > limit;
        rows.truncate(limit);

        let mut values: Vec<DataValue> = Vec::with_capacity(rows.len() + 2);
        if details.return_bounds && resume.is_none() {
            values.extend(bound_value(&buffer.entries, details.start, !reverse));
        }

        let last_key = rows.last().map(|(k, _)| *k);
        values.extend(rows.into_iter().map(|(_, e)| e.value.clone()));

        if details.return_bounds && !more {
            values.extend(bound_value(&buffer.entries, details.end, reverse));
        }

        let continuation_point = match (more, last_key) {
            (true, Some(key)) => Some(ContinuationPoint::encode(details, node, key)),
            _ => None,
        };
        Ok(HistoryData { values, continuation_point })
    }

    fn update(&self, node: &NodeId, kind: UpdateKind, values: Vec<DataValue>) -> Vec<StatusCode> {
        let buffer = self.buffer_or_insert(node);
        let mut buffer = buffer.lock();
        values
            .into_iter()
            .map(|value| {
                let Some(ts) = value.source_timestamp else {
                    return StatusCode::BAD_INVALID_ARGUMENT;
                };
                let value = stamped(value);
                match (kind, buffer.position_at(ts)) {
                    (UpdateKind::Insert, Some(_)) => StatusCode::BAD_ENTRY_EXISTS,
                    (UpdateKind::Replace, None) => StatusCode::BAD_NO_ENTRY_EXISTS,
                    (UpdateKind::Replace | UpdateKind::Upsert, Some(i)) => {
                        buffer.entries[i].value = value;
                        StatusCode::GOOD_ENTRY_REPLACED
                    }
                    (UpdateKind::Insert | UpdateKind::Upsert, None) => {
                        buffer.push(node, value);
                        StatusCode::GOOD_ENTRY_INSERTED
                    }
                }
            })
            .collect()
    }

    fn delete_raw(&self, node: &NodeId, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        let Some(buffer) = self.buffer(node) else {
            return 0;
        };
        let (lo, hi) = if start > end { (end, start) } else { (start, end) };
        let mut buffer = buffer.lock();
        let before = buffer.entries.len();
        buffer.entries.retain(|e| {
            let ts = e.timestamp();
            ts < lo || ts > hi
        });
        let removed = before - buffer.entries.len();
        debug!(node = %node, removed, "history range deleted");
        removed
    }

    fn register_node(&self, node: &NodeId, capacity: Option<usize>) {
        let buffer = self.buffer_or_insert(node);
        if let Some(capacity) = capacity {
            let mut buffer = buffer.lock();
            buffer.capacity = capacity.max(1);
            buffer.evict(node);
        }
    }

    fn value_count(&self, node: &NodeId) -> usize {
        self.buffer(node).map_or(0, |b| b.lock().entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fill(h: &MemoryHistorian, node: &NodeId, n: i64) {
        for i in 0..n {
            h.record_update(node, DataValue::new_at(i as i32, t(i)));
        }
    }

    fn ints(data: &HistoryData) -> Vec<i32> {
        data.values
            .iter()
            .map(|v| match v.value {
                Variant::Int32(i) => i,
                _ => -1,
            })
            .collect()
    }

    #[test]
    fn test_capacity_keeps_newest_in_order() {
        let h = MemoryHistorian::new(1000, 1000);
        let node = NodeId::numeric(1, 1);
        h.register_node(&node, Some(100));
        fill(&h, &node, 150);

        let data = h.read_raw(&ReadRawDetails::all(), &node, None).unwrap();
        assert_eq!(data.values.len(), 100);
        assert_eq!(ints(&data), (50..150).collect::<Vec<_>>());
        assert!(data.continuation_point.is_none());
    }

    #[test]
    fn test_paging_with_continuation() {
        let h = MemoryHistorian::new(1000, 1000);
        let node = NodeId::numeric(1, 1);
        fill(&h, &node, 25);

        let details = ReadRawDetails::all().with_max_values(10);
        let mut seen = Vec::new();
        let mut cp = None;
        let mut pages = 0;
        loop {
            let page = h.read_raw(&details, &node, cp.as_ref()).unwrap();
            seen.extend(ints(&page));
            pages += 1;
            cp = page.continuation_point;
            if cp.is_none() {
                break;
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(seen, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_continuation_rejected_for_changed_request() {
        let h = MemoryHistorian::new(1000, 1000);
        let node = NodeId::numeric(1, 1);
        fill(&h, &node, 5);
        let page = h.read_raw(&ReadRawDetails::all().with_max_values(2), &node, None).unwrap();
        let cp = page.continuation_point.unwrap();
        assert!(h.read_raw(&ReadRawDetails::all().with_max_values(3), &node, Some(&cp)).is_err());
    }

    #[test]
    fn test_page_size_caps_unbounded_reads() {
        let h = MemoryHistorian::new(1000, 4);
        let node = NodeId::numeric(1, 1);
        fill(&h, &node, 6);
        let page = h.read_raw(&ReadRawDetails::all(), &node, None).unwrap();
        assert_eq!(ints(&page), vec![0, 1, 2, 3]);
        assert!(page.continuation_point.is_some());
    }

    #[test]
    fn test_reverse_range_and_bounds() {
        let h = MemoryHistorian::default();
        let node = NodeId::numeric(1, 1);
        fill(&h, &node, 10);

        let reverse = h.read_raw(&ReadRawDetails::new(t(6), t(3)), &node, None).unwrap();
        assert_eq!(ints(&reverse), vec![6, 5, 4, 3]);

        let exact = h.read_raw(&ReadRawDetails::new(t(3), t(6)).with_bounds(), &node, None).unwrap();
        assert_eq!(ints(&exact), vec![3, 4, 5, 6], "samples on the bounds are the bounds");

        let half = Duration::milliseconds(500);
        let between = h
            .read_raw(&ReadRawDetails::new(t(3) + half, t(6) + half).with_bounds(), &node, None)
            .unwrap();
        assert_eq!(ints(&between), vec![3, 4, 5, 6, 7]);

        let reverse_between = h
            .read_raw(&ReadRawDetails::new(t(6) + half, t(3) + half).with_bounds(), &node, None)
            .unwrap();
        assert_eq!(ints(&reverse_between), vec![7, 6, 5, 4, 3]);

        let open = h
            .read_raw(&ReadRawDetails::new(t(-5), t(20)).with_bounds(), &node, None)
            .unwrap();
        assert_eq!(open.values.first().unwrap().status, StatusCode::BAD_BOUND_NOT_FOUND);
        assert_eq!(open.values.last().unwrap().status, StatusCode::BAD_BOUND_NOT_FOUND);
        assert_eq!(open.values.len(), 12);
    }

    #[test]
    fn test_arrival_ordering_differs_from_timestamp_ordering() {
        let h = MemoryHistorian::default();
        let node = NodeId::numeric(1, 1);
        h.record_update(&node, DataValue::new_at(1i32, t(10)));
        h.record_update(&node, DataValue::new_at(2i32, t(5)));

        let by_time = h.read_raw(&ReadRawDetails::all(), &node, None).unwrap();
        assert_eq!(ints(&by_time), vec![2, 1]);
        let by_arrival = h
            .read_raw(&ReadRawDetails::all().with_ordering(HistoryOrdering::Arrival), &node, None)
            .unwrap();
        assert_eq!(ints(&by_arrival), vec![1, 2]);
    }

    #[test]
    fn test_update_kinds() {
        let h = MemoryHistorian::default();
        let node = NodeId::numeric(1, 1);
        h.record_update(&node, DataValue::new_at(1i32, t(0)));

        assert_eq!(
            h.update(&node, UpdateKind::Insert, vec![DataValue::new_at(9i32, t(0)), DataValue::new_at(2i32, t(1))]),
            vec![StatusCode::BAD_ENTRY_EXISTS, StatusCode::GOOD_ENTRY_INSERTED]
        );
        assert_eq!(
            h.update(&node, UpdateKind::Replace, vec![DataValue::new_at(7i32, t(0)), DataValue::new_at(3i32, t(2))]),
            vec![StatusCode::GOOD_ENTRY_REPLACED, StatusCode::BAD_NO_ENTRY_EXISTS]
        );
        assert_eq!(
            h.update(&node, UpdateKind::Upsert, vec![DataValue::new_at(8i32, t(1)), DataValue::new_at(4i32, t(3))]),
            vec![StatusCode::GOOD_ENTRY_REPLACED, StatusCode::GOOD_ENTRY_INSERTED]
        );
        let data = h.read_raw(&ReadRawDetails::all(), &node, None).unwrap();
        assert_eq!(ints(&data), vec![7, 8, 4]);
    }

    #[test]
    fn test_delete_raw_range() {
        let h = MemoryHistorian::default();
        let node = NodeId::numeric(1, 1);
        fill(&h, &node, 10);
        assert_eq!(h.delete_raw(&node, t(2), t(4)), 3);
        assert_eq!(h.value_count(&node), 7);
        assert_eq!(h.delete_raw(&NodeId::numeric(1, 99), t(0), t(0) + Duration::days(1)), 0);
    }
}
