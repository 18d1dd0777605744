//! Per-subscription publishing state machine.
//!
//! ```text
//! Created ──first cycle──▶ Normal ◀──▶ Late ──lifetime──▶ Closed
//! ```
//!
//! A publishing cycle either assembles queued notifications into messages
//! or counts towards a keep-alive. Messages wait in `ready` until a Publish
//! request takes them; while any wait the subscription is Late and
//! assembles nothing new, leaving notifications in the item queues.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SubscriptionLimits;
use crate::model::{DataValue, StatusCode, Variant};
use crate::runtime::SessionId;

use super::monitored_item::{MonitoredItem, MonitoredItemId, MonitoringMode, Queued};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u32);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Created,
    Normal,
    /// Messages are waiting for a Publish request.
    Late,
    Closed,
}

/// Requested subscription parameters; the server revises them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub publishing_interval_ms: f64,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
    /// 0 means no client limit.
    pub max_notifications_per_publish: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
}

impl Default for SubscriptionParams {
    fn default() -> Self {
        Self {
            publishing_interval_ms: 1000.0,
            lifetime_count: 60,
            max_keep_alive_count: 10,
            max_notifications_per_publish: 0,
            publishing_enabled: true,
            priority: 0,
        }
    }
}

impl SubscriptionParams {
    pub fn new(publishing_interval_ms: f64) -> Self {
        Self { publishing_interval_ms, ..Default::default() }
    }

    pub fn with_counts(mut self, lifetime_count: u32, max_keep_alive_count: u32) -> Self {
        self.lifetime_count = lifetime_count;
        self.max_keep_alive_count = max_keep_alive_count;
        self
    }

    pub fn with_max_notifications(mut self, max: u32) -> Self {
        self.max_notifications_per_publish = max;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.publishing_enabled = false;
        self
    }
}

/// Values the server actually applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisedSubscription {
    pub id: SubscriptionId,
    pub publishing_interval_ms: f64,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemNotification {
    pub client_handle: u32,
    pub value: DataValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFieldList {
    pub client_handle: u32,
    pub fields: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationData {
    DataChange(Vec<MonitoredItemNotification>),
    Events(Vec<EventFieldList>),
    StatusChange(StatusCode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub sequence_number: u32,
    pub publish_time: DateTime<Utc>,
    /// Empty for a keep-alive.
    pub notifications: Vec<NotificationData>,
}

impl NotificationMessage {
    pub fn is_keep_alive(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn data_changes(&self) -> impl Iterator<Item = &MonitoredItemNotification> {
        self.notifications.iter().flat_map(|n| match n {
            NotificationData::DataChange(items) => items.as_slice(),
            _ => &[],
        })
    }

    pub fn events(&self) -> impl Iterator<Item = &EventFieldList> {
        self.notifications.iter().flat_map(|n| match n {
            NotificationData::Events(items) => items.as_slice(),
            _ => &[],
        })
    }

    pub fn status_change(&self) -> Option<StatusCode> {
        self.notifications.iter().find_map(|n| match n {
            NotificationData::StatusChange(s) => Some(*s),
            _ => None,
        })
    }
}

pub(crate) struct ReadyMessage {
    pub message: NotificationMessage,
    pub more_notifications: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    Continue,
    Expired,
}

/// Bring requested parameters into the configured bounds, keeping
/// `lifetime >= 3 * keep_alive`.
pub(crate) fn revise(params: &SubscriptionParams, limits: &SubscriptionLimits) -> (f64, u32, u32, u32) {
    let interval = if params.publishing_interval_ms.is_finite() {
        params
            .publishing_interval_ms
            .clamp(limits.min_publishing_interval_ms, limits.max_publishing_interval_ms)
    } else {
        limits.min_publishing_interval_ms
    };
    let mut keep_alive = params.max_keep_alive_count.clamp(1, limits.max_keep_alive_count);
    if keep_alive.saturating_mul(3) > limits.max_lifetime_count {
        keep_alive = (limits.max_lifetime_count / 3).max(1);
    }
    let lifetime = params
        .lifetime_count
        .max(keep_alive.saturating_mul(3))
        .min(limits.max_lifetime_count);
    let max_notifications = match params.max_notifications_per_publish {
        0 => limits.max_notifications_per_publish,
        n => n.min(limits.max_notifications_per_publish),
    };
    (interval, lifetime, keep_alive, max_notifications)
}

pub(crate) struct Subscription {
    pub id: SubscriptionId,
    pub session: SessionId,
    pub state: SubscriptionState,
    pub publishing_interval_ms: f64,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
    pub max_notifications: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
    pub items: BTreeMap<MonitoredItemId, MonitoredItem>,
    pub ready: VecDeque<ReadyMessage>,
    keep_alive_counter: u32,
    lifetime_counter: u32,
    next_sequence: u32,
    next_publish: Option<DateTime<Utc>>,
    retransmission: VecDeque<NotificationMessage>,
    max_retransmission: usize,
}

impl Subscription {
    pub fn new(id: SubscriptionId, session: SessionId, params: &SubscriptionParams, limits: &SubscriptionLimits) -> Self {
        let (interval, lifetime, keep_alive, max_notifications) = revise(params, limits);
        Self {
            id,
            session,
            state: SubscriptionState::Created,
            publishing_interval_ms: interval,
            lifetime_count: lifetime,
            max_keep_alive_count: keep_alive,
            max_notifications,
            publishing_enabled: params.publishing_enabled,
            priority: params.priority,
            items: BTreeMap::new(),
            ready: VecDeque::new(),
            // A fresh subscription answers its first cycle at once.
            keep_alive_counter: keep_alive,
            lifetime_counter: 0,
            next_sequence: 1,
            next_publish: None,
            retransmission: VecDeque::new(),
            max_retransmission: limits.max_retransmission_queue,
        }
    }

    pub fn modify(&mut self, params: &SubscriptionParams, limits: &SubscriptionLimits) {
        let (interval, lifetime, keep_alive, max_notifications) = revise(params, limits);
        self.publishing_interval_ms = interval;
        self.lifetime_count = lifetime;
        self.max_keep_alive_count = keep_alive;
        self.max_notifications = max_notifications;
        self.priority = params.priority;
    }

    pub fn revised(&self) -> RevisedSubscription {
        RevisedSubscription {
            id: self.id,
            publishing_interval_ms: self.publishing_interval_ms,
            lifetime_count: self.lifetime_count,
            max_keep_alive_count: self.max_keep_alive_count,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state != SubscriptionState::Closed && self.next_publish.is_none_or(|at| at <= now)
    }

    pub fn reset_lifetime(&mut self) {
        self.lifetime_counter = 0;
    }

    fn take_sequence(&mut self) -> u32 {
        let s = self.next_sequence;
        self.next_sequence = if s == u32::MAX { 1 } else { s + 1 };
        s
    }

    /// One publishing cycle at `now`.
    pub fn publish_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        let micros = (self.publishing_interval_ms * 1000.0) as i64;
        self.next_publish = Some(now + Duration::microseconds(micros));

        if self.ready.is_empty() {
            let has_data = self.items.values().any(MonitoredItem::has_reportable);
            if self.publishing_enabled && has_data {
                self.assemble(now);
                self.keep_alive_counter = 0;
            } else {
                self.keep_alive_counter += 1;
                if self.keep_alive_counter >= self.max_keep_alive_count {
                    self.keep_alive_counter = 0;
                    let message = NotificationMessage {
                        sequence_number: self.next_sequence,
                        publish_time: now,
                        notifications: Vec::new(),
                    };
                    self.ready.push_back(ReadyMessage { message, more_notifications: false });
                }
            }
        }

        self.lifetime_counter += 1;
        if self.lifetime_counter >= self.lifetime_count {
            self.state = SubscriptionState::Closed;
            return CycleOutcome::Expired;
        }
        if self.state == SubscriptionState::Created {
            self.state = SubscriptionState::Normal;
        }
        CycleOutcome::Continue
    }

    /// Drain every Reporting item (ascending id, FIFO within an item) into
    /// messages of at most `max_notifications` entries.
    fn assemble(&mut self, now: DateTime<Utc>) {
        let mut data: Vec<MonitoredItemNotification> = Vec::new();
        let mut events: Vec<EventFieldList> = Vec::new();
        let mut order: Vec<bool> = Vec::new();
        for item in self.items.values_mut() {
            if item.mode != MonitoringMode::Reporting {
                continue;
            }
            for queued in item.queue.drain(..) {
                match queued {
                    Queued::Data(value) => {
                        data.push(MonitoredItemNotification { client_handle: item.client_handle, value });
                        order.push(true);
                    }
                    Queued::Event(fields) => {
                        events.push(EventFieldList { client_handle: item.client_handle, fields });
                        order.push(false);
                    }
                }
            }
        }

        let chunk = match self.max_notifications {
            0 => usize::MAX,
            n => n as usize,
        };
        let mut data = data.into_iter();
        let mut events = events.into_iter();
        let total = order.len();
        let mut taken = 0;
        while taken < total {
            let end = total.min(taken.saturating_add(chunk));
            let data_n = order[taken..end].iter().filter(|d| **d).count();
            let event_n = (end - taken) - data_n;
            let mut notifications = Vec::new();
            if data_n > 0 {
                notifications.push(NotificationData::DataChange(data.by_ref().take(data_n).collect()));
            }
            if event_n > 0 {
                notifications.push(NotificationData::Events(events.by_ref().take(event_n).collect()));
            }
            taken = end;
            let message = NotificationMessage { sequence_number: self.take_sequence(), publish_time: now, notifications };
            self.ready.push_back(ReadyMessage { message, more_notifications: taken < total });
        }
    }

    /// Hand the next waiting message to a Publish request.
    pub fn take_ready(&mut self) -> Option<ReadyMessage> {
        let ready = self.ready.pop_front()?;
        if !ready.message.is_keep_alive() {
            self.retransmission.push_back(ready.message.clone());
            while self.retransmission.len() > self.max_retransmission {
                self.retransmission.pop_front();
            }
        }
        self.lifetime_counter = 0;
        self.state = if self.ready.is_empty() { SubscriptionState::Normal } else { SubscriptionState::Late };
        Some(ready)
    }

    pub fn acknowledge(&mut self, sequence_number: u32) -> StatusCode {
        match self.retransmission.iter().position(|m| m.sequence_number == sequence_number) {
            Some(i) => {
                self.retransmission.remove(i);
                StatusCode::GOOD
            }
            None => StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN,
        }
    }

    pub fn republish(&self, sequence_number: u32) -> Option<NotificationMessage> {
        self.retransmission.iter().find(|m| m.sequence_number == sequence_number).cloned()
    }

    pub fn available_sequence_numbers(&self) -> Vec<u32> {
        self.retransmission.iter().map(|m| m.sequence_number).collect()
    }

    /// The final StatusChange sent to the session once the lifetime ran out.
    pub fn timeout_message(&mut self, now: DateTime<Utc>) -> NotificationMessage {
        NotificationMessage {
            sequence_number: self.take_sequence(),
            publish_time: now,
            notifications: vec![NotificationData::StatusChange(StatusCode::BAD_TIMEOUT)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeId, NodeId, TimestampsToReturn};
    use crate::subscription::filter::MonitoringFilter;

    fn limits() -> SubscriptionLimits {
        SubscriptionLimits::default()
    }

    fn item(id: u32, handle: u32) -> MonitoredItem {
        MonitoredItem {
            id: MonitoredItemId(id),
            node_id: NodeId::numeric(1, id),
            attribute_id: AttributeId::Value,
            client_handle: handle,
            mode: MonitoringMode::Reporting,
            sampling_interval_ms: 0.0,
            filter: MonitoringFilter::None,
            queue_size: 10,
            discard_oldest: true,
            timestamps: TimestampsToReturn::Both,
            eu_range: None,
            queue: VecDeque::new(),
            last_value: None,
            next_sample: None,
        }
    }

    #[test]
    fn test_revise_enforces_lifetime_ratio() {
        let params = SubscriptionParams::new(1.0).with_counts(5, 10);
        let (interval, lifetime, keep_alive, max_n) = revise(&params, &limits());
        assert_eq!(interval, 10.0);
        assert_eq!(keep_alive, 10);
        assert_eq!(lifetime, 30);
        assert_eq!(max_n, 1000);

        let huge = SubscriptionParams::new(f64::NAN).with_counts(u32::MAX, u32::MAX);
        let (interval, lifetime, keep_alive, _) = revise(&huge, &limits());
        assert_eq!(interval, 10.0);
        assert_eq!(keep_alive, 10_000);
        assert_eq!(lifetime, 30_000);
    }

    #[test]
    fn test_first_cycle_sends_keep_alive() {
        let mut s = Subscription::new(SubscriptionId(1), SessionId(1), &SubscriptionParams::default(), &limits());
        assert_eq!(s.publish_cycle(Utc::now()), CycleOutcome::Continue);
        let ready = s.take_ready().unwrap();
        assert!(ready.message.is_keep_alive());
        assert_eq!(ready.message.sequence_number, 1);
        assert!(s.available_sequence_numbers().is_empty());
    }

    #[test]
    fn test_messages_split_and_ordered() {
        let params = SubscriptionParams::default().with_max_notifications(2);
        let mut s = Subscription::new(SubscriptionId(1), SessionId(1), &params, &limits());
        let mut b = item(2, 20);
        let mut a = item(1, 10);
        a.queue.push_back(Queued::Data(DataValue::from(Variant::Int32(1))));
        a.queue.push_back(Queued::Data(DataValue::from(Variant::Int32(2))));
        b.queue.push_back(Queued::Data(DataValue::from(Variant::Int32(3))));
        s.items.insert(b.id, b);
        s.items.insert(a.id, a);

        s.publish_cycle(Utc::now());
        let first = s.take_ready().unwrap();
        let second = s.take_ready().unwrap();
        assert!(first.more_notifications);
        assert!(!second.more_notifications);
        let handles: Vec<u32> = first
            .message
            .data_changes()
            .chain(second.message.data_changes())
            .map(|n| n.client_handle)
            .collect();
        assert_eq!(handles, vec![10, 10, 20]);
        assert_eq!((first.message.sequence_number, second.message.sequence_number), (1, 2));

        assert_eq!(s.available_sequence_numbers(), vec![1, 2]);
        assert_eq!(s.acknowledge(1), StatusCode::GOOD);
        assert_eq!(s.acknowledge(1), StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN);
        assert!(s.republish(2).is_some());
        assert!(s.republish(1).is_none());
    }

    #[test]
    fn test_lifetime_expiry() {
        let params = SubscriptionParams::default().with_counts(3, 1);
        let mut s = Subscription::new(SubscriptionId(1), SessionId(1), &params, &limits());
        let now = Utc::now();
        assert_eq!(s.publish_cycle(now), CycleOutcome::Continue);
        assert_eq!(s.publish_cycle(now), CycleOutcome::Continue);
        assert_eq!(s.publish_cycle(now), CycleOutcome::Expired);
        assert_eq!(s.state, SubscriptionState::Closed);
    }
}
