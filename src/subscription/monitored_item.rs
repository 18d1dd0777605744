//! Monitored items: one sampled attribute or one event notifier, with a
//! bounded notification queue.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AttributeId, DataValue, NodeId, TimestampsToReturn, Variant};

use super::filter::MonitoringFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitoredItemId(pub u32);

impl std::fmt::Display for MonitoredItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MonitoringMode {
    Disabled,
    /// Sample and queue, but do not publish.
    Sampling,
    #[default]
    Reporting,
}

/// Parameters of a new monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemCreateRequest {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
    pub monitoring_mode: MonitoringMode,
    pub client_handle: u32,
    /// Negative: use the subscription's publishing interval.
    pub sampling_interval_ms: f64,
    pub filter: MonitoringFilter,
    pub queue_size: u32,
    pub discard_oldest: bool,
}

impl MonitoredItemCreateRequest {
    pub fn new(node_id: NodeId, attribute_id: AttributeId, client_handle: u32) -> Self {
        Self {
            node_id,
            attribute_id,
            monitoring_mode: MonitoringMode::Reporting,
            client_handle,
            sampling_interval_ms: -1.0,
            filter: MonitoringFilter::None,
            queue_size: 1,
            discard_oldest: true,
        }
    }

    /// Value item.
    pub fn value(node_id: NodeId, client_handle: u32) -> Self {
        Self::new(node_id, AttributeId::Value, client_handle)
    }

    /// Event item on a notifier node.
    pub fn events(node_id: NodeId, client_handle: u32, filter: super::EventFilter) -> Self {
        Self {
            filter: MonitoringFilter::Event(filter),
            queue_size: 0,
            ..Self::new(node_id, AttributeId::EventNotifier, client_handle)
        }
    }

    pub fn with_sampling_interval(mut self, ms: f64) -> Self {
        self.sampling_interval_ms = ms;
        self
    }

    pub fn with_filter(mut self, filter: MonitoringFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_queue(mut self, queue_size: u32, discard_oldest: bool) -> Self {
        self.queue_size = queue_size;
        self.discard_oldest = discard_oldest;
        self
    }

    pub fn with_mode(mut self, mode: MonitoringMode) -> Self {
        self.monitoring_mode = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemCreateResult {
    pub id: MonitoredItemId,
    pub revised_sampling_interval_ms: f64,
    pub revised_queue_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemModifyRequest {
    pub id: MonitoredItemId,
    pub client_handle: u32,
    pub sampling_interval_ms: f64,
    pub filter: MonitoringFilter,
    pub queue_size: u32,
    pub discard_oldest: bool,
}

/// A queued notification of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Queued {
    Data(DataValue),
    Event(Vec<Variant>),
}

pub(crate) struct MonitoredItem {
    pub id: MonitoredItemId,
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
    pub client_handle: u32,
    pub mode: MonitoringMode,
    pub sampling_interval_ms: f64,
    pub filter: MonitoringFilter,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub timestamps: TimestampsToReturn,
    /// EURange `(low, high)` resolved when a percent deadband was set.
    pub eu_range: Option<(f64, f64)>,
    pub queue: VecDeque<Queued>,
    pub last_value: Option<DataValue>,
    pub next_sample: Option<DateTime<Utc>>,
}

impl MonitoredItem {
    pub fn is_event_item(&self) -> bool {
        self.attribute_id == AttributeId::EventNotifier
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.mode != MonitoringMode::Disabled
            && !self.is_event_item()
            && self.next_sample.is_none_or(|at| at <= now)
    }

    pub fn schedule_next(&mut self, now: DateTime<Utc>) {
        let micros = (self.sampling_interval_ms * 1000.0) as i64;
        self.next_sample = Some(now + Duration::microseconds(micros));
    }

    pub fn set_mode(&mut self, mode: MonitoringMode) {
        if mode == MonitoringMode::Disabled {
            self.queue.clear();
            self.last_value = None;
            self.next_sample = None;
        }
        self.mode = mode;
    }

    /// Apply the data-change filter and queue `value` if reportable.
    pub fn offer_sample(&mut self, value: DataValue) -> bool {
        let filter = self.filter.data_change();
        if !filter.is_reportable(self.last_value.as_ref(), &value, self.eu_range) {
            return false;
        }
        self.last_value = Some(value.clone());
        self.enqueue(Queued::Data(self.timestamps.apply(value)));
        true
    }

    /// Queue with the discard policy. On overflow the surviving neighbour
    /// of the discarded entry gets the overflow bit; a queue of one just
    /// keeps the latest.
    pub fn enqueue(&mut self, entry: Queued) {
        let capacity = self.queue_size.max(1) as usize;
        if self.queue.len() < capacity {
            self.queue.push_back(entry);
            return;
        }
        if capacity == 1 {
            self.queue.clear();
            self.queue.push_back(entry);
            return;
        }
        if self.discard_oldest {
            self.queue.pop_front();
            self.queue.push_back(entry);
            if let Some(Queued::Data(front)) = self.queue.front_mut() {
                front.status = front.status.with_overflow();
            }
        } else {
            self.queue.pop_back();
            let entry = match entry {
                Queued::Data(mut v) => {
                    v.status = v.status.with_overflow();
                    Queued::Data(v)
                }
                other => other,
            };
            self.queue.push_back(entry);
        }
    }

    pub fn has_reportable(&self) -> bool {
        self.mode == MonitoringMode::Reporting && !self.queue.is_empty()
    }
}
