//! # Subscription Engine
//!
//! Sessions own subscriptions; subscriptions own monitored items. Each
//! [`SubscriptionEngine::tick`]:
//!
//! 1. samples every due item (the engine lock is released while the address
//!    space is read),
//! 2. runs the publishing cycle of every due subscription,
//! 3. closes subscriptions whose lifetime ran out, queueing a
//!    StatusChange(BadTimeout) for the session,
//! 4. pairs waiting messages with queued Publish requests and returns the
//!    responses for the runtime to send.
//!
//! Lock order is engine → address space, never the reverse.

mod filter;
mod monitored_item;
mod subscription;

pub use filter::{
    like, ContentFilter, ContentFilterElement, DataChangeFilter, DataChangeTrigger, Deadband, EventFilter,
    FilterOperand, FilterOperator, MonitoringFilter, SimpleAttributeOperand,
};
pub use monitored_item::{
    MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemId, MonitoredItemModifyRequest,
    MonitoringMode, Queued,
};
pub use subscription::{
    EventFieldList, MonitoredItemNotification, NotificationData, NotificationMessage, RevisedSubscription,
    SubscriptionId, SubscriptionParams, SubscriptionState,
};

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address_space::AddressSpace;
use crate::config::SubscriptionLimits;
use crate::event::Event;
use crate::model::{AttributeId, DataValue, NodeAttributes, NodeId, StatusCode, TimestampsToReturn, EVENT_NOTIFIER_SUBSCRIBE};
use crate::runtime::SessionId;
use crate::{Error, Result};

use monitored_item::MonitoredItem;
use subscription::{CycleOutcome, Subscription};

// ============================================================================
// Publish DTOs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionAcknowledgement {
    pub subscription_id: SubscriptionId,
    pub sequence_number: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Correlates the eventual response with the request.
    pub request_id: u32,
    pub acknowledgements: Vec<SubscriptionAcknowledgement>,
}

impl PublishRequest {
    pub fn new(request_id: u32) -> Self {
        Self { request_id, acknowledgements: Vec::new() }
    }

    pub fn acknowledge(mut self, subscription_id: SubscriptionId, sequence_number: u32) -> Self {
        self.acknowledgements.push(SubscriptionAcknowledgement { subscription_id, sequence_number });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub request_id: u32,
    pub subscription_id: SubscriptionId,
    pub available_sequence_numbers: Vec<u32>,
    pub more_notifications: bool,
    pub message: NotificationMessage,
    /// One status per acknowledgement of the request.
    pub results: Vec<StatusCode>,
}

// ============================================================================
// Engine state
// ============================================================================

struct PendingPublish {
    request_id: u32,
    results: Vec<StatusCode>,
}

#[derive(Default)]
struct SessionQueue {
    requests: VecDeque<PendingPublish>,
    /// Final messages of subscriptions that timed out.
    status_messages: VecDeque<(SubscriptionId, NotificationMessage)>,
}

struct Outgoing {
    subscription_id: SubscriptionId,
    message: NotificationMessage,
    more_notifications: bool,
    available_sequence_numbers: Vec<u32>,
}

#[derive(Default)]
struct EngineState {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    sessions: HashMap<SessionId, SessionQueue>,
    next_subscription_id: u32,
    next_item_id: u32,
    /// Publish requests left with nothing to answer them: `(session, request id)`.
    rejected: Vec<(SessionId, u32)>,
}

impl EngineState {
    fn subscription(&mut self, id: SubscriptionId) -> Result<&mut Subscription> {
        self.subscriptions.get_mut(&id).ok_or(Error::SubscriptionNotFound(id.0))
    }

    fn session_subscriptions(&self, session: SessionId) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values().filter(move |s| s.session == session)
    }

    /// Next message for `session`: timeout notices first, then the waiting
    /// subscription with the highest priority (lowest id on ties).
    fn next_message(&mut self, session: SessionId) -> Option<Outgoing> {
        if let Some((subscription_id, message)) =
            self.sessions.get_mut(&session).and_then(|q| q.status_messages.pop_front())
        {
            return Some(Outgoing {
                subscription_id,
                message,
                more_notifications: false,
                available_sequence_numbers: Vec::new(),
            });
        }
        let id = self
            .session_subscriptions(session)
            .filter(|s| !s.ready.is_empty())
            .max_by(|a, b| a.priority.cmp(&b.priority).then(b.id.cmp(&a.id)))
            .map(|s| s.id)?;
        let sub = self.subscriptions.get_mut(&id)?;
        let ready = sub.take_ready()?;
        Some(Outgoing {
            subscription_id: id,
            message: ready.message,
            more_notifications: ready.more_notifications,
            available_sequence_numbers: sub.available_sequence_numbers(),
        })
    }

    fn remove_subscription(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let sub = self.subscriptions.remove(&id)?;
        self.reject_if_orphaned(sub.session);
        Some(sub)
    }

    /// Once a session has no subscription and no pending timeout notice,
    /// its queued publish requests can never be answered with a message.
    fn reject_if_orphaned(&mut self, session: SessionId) {
        if self.subscriptions.values().any(|s| s.session == session) {
            return;
        }
        let Some(queue) = self.sessions.get(&session) else {
            return;
        };
        if !queue.status_messages.is_empty() {
            return;
        }
        if let Some(queue) = self.sessions.remove(&session) {
            self.rejected.extend(queue.requests.into_iter().map(|p| (session, p.request_id)));
        }
    }
}

fn respond(outgoing: Outgoing, pending: PendingPublish) -> PublishResponse {
    PublishResponse {
        request_id: pending.request_id,
        subscription_id: outgoing.subscription_id,
        available_sequence_numbers: outgoing.available_sequence_numbers,
        more_notifications: outgoing.more_notifications,
        message: outgoing.message,
        results: pending.results,
    }
}

/// Read one attribute for a monitored item. Failures become a status-only
/// value so the item reports them.
fn sample(space: &AddressSpace, node: &NodeId, attribute: AttributeId, now: DateTime<Utc>) -> DataValue {
    match space.read_attribute(node, attribute) {
        Ok(value) => {
            if attribute == AttributeId::Value {
                let historize = space.with_store(|s| {
                    s.node(node)
                        .and_then(|n| n.as_variable())
                        .is_some_and(|v| v.data_source && v.historizing)
                });
                if historize {
                    if let Some(history) = space.history() {
                        history.record_update(node, value.clone());
                    }
                }
            }
            value
        }
        Err(e) => DataValue::from_status(e.status_code(), now),
    }
}

/// `(low, high)` of the node's EURange property.
fn eu_range(space: &AddressSpace, node: &NodeId) -> Option<(f64, f64)> {
    space.with_store(|s| {
        let (_, property) = s
            .children(node)
            .into_iter()
            .find(|(_, child)| s.node(child).is_some_and(|n| n.browse_name.name == "EURange"))?;
        let value = &s.node(&property)?.as_variable()?.value.value;
        let values = value.as_array()?.values();
        match values {
            [low, high, ..] => Some((low.as_f64()?, high.as_f64()?)),
            _ => None,
        }
    })
}

/// Check that `node` can be monitored for `attribute` and resolve what the
/// filter needs from the address space.
fn prepare_item(space: &AddressSpace, node: &NodeId, attribute: AttributeId, filter: &MonitoringFilter) -> Result<Option<(f64, f64)>> {
    let n = space.node(node).ok_or_else(|| Error::NodeNotFound(node.clone()))?;
    match attribute {
        AttributeId::EventNotifier => {
            if n.event_notifier() & EVENT_NOTIFIER_SUBSCRIBE == 0 {
                return Err(Error::InvalidArgument(format!("{node} is not an event notifier")));
            }
        }
        AttributeId::Value => {
            if !matches!(n.attributes, NodeAttributes::Variable(_) | NodeAttributes::VariableType(_)) {
                return Err(Error::AttributeNotApplicable { node: node.clone(), attribute });
            }
        }
        other => {
            if n.attribute(other).is_none() {
                return Err(Error::AttributeNotApplicable { node: node.clone(), attribute });
            }
        }
    }
    filter.validate(attribute)?;
    if filter.needs_eu_range() {
        return eu_range(space, node)
            .map(Some)
            .ok_or_else(|| Error::InvalidFilter(format!("percent deadband on {node} without EURange")));
    }
    Ok(None)
}

// ============================================================================
// SubscriptionEngine
// ============================================================================

/// Subscription and monitored-item engine of one server.
pub struct SubscriptionEngine {
    limits: SubscriptionLimits,
    state: Mutex<EngineState>,
}

impl SubscriptionEngine {
    pub fn new(limits: SubscriptionLimits) -> Self {
        Self { limits, state: Mutex::new(EngineState::default()) }
    }

    pub fn limits(&self) -> &SubscriptionLimits {
        &self.limits
    }

    fn revise_sampling(&self, requested_ms: f64, publishing_interval_ms: f64) -> f64 {
        let ms = if requested_ms < 0.0 || !requested_ms.is_finite() { publishing_interval_ms } else { requested_ms };
        ms.clamp(self.limits.min_sampling_interval_ms, self.limits.max_sampling_interval_ms)
    }

    fn revise_queue(&self, requested: u32, event_item: bool) -> u32 {
        match requested {
            0 if event_item => self.limits.max_queue_size,
            0 => 1,
            n => n.min(self.limits.max_queue_size),
        }
    }

    // ---- Subscriptions -----------------------------------------------------

    pub fn create_subscription(&self, session: SessionId, params: &SubscriptionParams) -> Result<RevisedSubscription> {
        let mut st = self.state.lock();
        let owned = st.session_subscriptions(session).count();
        if owned >= self.limits.max_subscriptions_per_session {
            return Err(Error::SubscriptionLimitExceeded(self.limits.max_subscriptions_per_session));
        }
        st.next_subscription_id += 1;
        let id = SubscriptionId(st.next_subscription_id);
        let sub = Subscription::new(id, session, params, &self.limits);
        let revised = sub.revised();
        st.subscriptions.insert(id, sub);
        st.sessions.entry(session).or_default();
        info!(subscription = %id, session = %session, interval_ms = revised.publishing_interval_ms, "subscription created");
        Ok(revised)
    }

    /// Publishing-enabled stays as it is; use `set_publishing_mode`.
    pub fn modify_subscription(&self, id: SubscriptionId, params: &SubscriptionParams) -> Result<RevisedSubscription> {
        let mut st = self.state.lock();
        let sub = st.subscription(id)?;
        sub.modify(params, &self.limits);
        Ok(sub.revised())
    }

    pub fn set_publishing_mode(&self, enabled: bool, ids: &[SubscriptionId]) -> Vec<Result<()>> {
        let mut st = self.state.lock();
        ids.iter()
            .map(|id| {
                st.subscription(*id)?.publishing_enabled = enabled;
                Ok(())
            })
            .collect()
    }

    pub fn delete_subscriptions(&self, ids: &[SubscriptionId]) -> Vec<Result<()>> {
        let mut st = self.state.lock();
        ids.iter()
            .map(|id| {
                st.remove_subscription(*id).ok_or(Error::SubscriptionNotFound(id.0))?;
                info!(subscription = %id, "subscription deleted");
                Ok(())
            })
            .collect()
    }

    /// Drop every subscription and queued publish of `session`.
    pub fn close_session(&self, session: SessionId) -> usize {
        let mut st = self.state.lock();
        let before = st.subscriptions.len();
        st.subscriptions.retain(|_, s| s.session != session);
        st.sessions.remove(&session);
        let removed = before - st.subscriptions.len();
        if removed > 0 {
            info!(session = %session, removed, "session subscriptions deleted");
        }
        removed
    }

    pub fn owner(&self, id: SubscriptionId) -> Option<SessionId> {
        self.state.lock().subscriptions.get(&id).map(|s| s.session)
    }

    pub fn subscription_ids(&self, session: SessionId) -> Vec<SubscriptionId> {
        self.state.lock().session_subscriptions(session).map(|s| s.id).collect()
    }

    pub fn subscription_state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        self.state.lock().subscriptions.get(&id).map(|s| s.state)
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    pub fn monitored_item_count(&self, id: SubscriptionId) -> Option<usize> {
        self.state.lock().subscriptions.get(&id).map(|s| s.items.len())
    }

    /// Notifications waiting in the queues of one item.
    pub fn queued_notifications(&self, id: SubscriptionId, item: MonitoredItemId) -> Option<usize> {
        self.state.lock().subscriptions.get(&id)?.items.get(&item).map(|i| i.queue.len())
    }

    pub fn queued_publish_requests(&self, session: SessionId) -> usize {
        self.state.lock().sessions.get(&session).map_or(0, |q| q.requests.len())
    }

    // ---- Monitored items ---------------------------------------------------

    pub fn create_monitored_items(
        &self,
        space: &AddressSpace,
        id: SubscriptionId,
        timestamps: TimestampsToReturn,
        requests: Vec<MonitoredItemCreateRequest>,
    ) -> Result<Vec<Result<MonitoredItemCreateResult>>> {
        let prepared: Vec<Result<Option<(f64, f64)>>> = requests
            .iter()
            .map(|r| prepare_item(space, &r.node_id, r.attribute_id, &r.filter))
            .collect();

        let mut st = self.state.lock();
        let publishing_interval = st.subscription(id)?.publishing_interval_ms;
        let mut results = Vec::with_capacity(requests.len());
        for (request, prepared) in requests.into_iter().zip(prepared) {
            let eu_range = match prepared {
                Ok(range) => range,
                Err(e) => {
                    results.push(Err(e));
                    continue;
                }
            };
            let count = st.subscription(id)?.items.len();
            if count >= self.limits.max_monitored_items_per_subscription {
                results.push(Err(Error::MonitoredItemLimitExceeded(self.limits.max_monitored_items_per_subscription)));
                continue;
            }

            st.next_item_id += 1;
            let item_id = MonitoredItemId(st.next_item_id);
            let event_item = request.attribute_id == AttributeId::EventNotifier;
            let item = MonitoredItem {
                id: item_id,
                node_id: request.node_id,
                attribute_id: request.attribute_id,
                client_handle: request.client_handle,
                mode: request.monitoring_mode,
                sampling_interval_ms: self.revise_sampling(request.sampling_interval_ms, publishing_interval),
                filter: request.filter,
                queue_size: self.revise_queue(request.queue_size, event_item),
                discard_oldest: request.discard_oldest,
                timestamps,
                eu_range,
                queue: VecDeque::new(),
                last_value: None,
                next_sample: None,
            };
            debug!(subscription = %id, item = %item_id, node = %item.node_id, "monitored item created");
            results.push(Ok(MonitoredItemCreateResult {
                id: item_id,
                revised_sampling_interval_ms: item.sampling_interval_ms,
                revised_queue_size: item.queue_size,
            }));
            st.subscription(id)?.items.insert(item_id, item);
        }
        Ok(results)
    }

    pub fn modify_monitored_items(
        &self,
        space: &AddressSpace,
        id: SubscriptionId,
        timestamps: TimestampsToReturn,
        requests: Vec<MonitoredItemModifyRequest>,
    ) -> Result<Vec<Result<MonitoredItemCreateResult>>> {
        let targets: Vec<Option<(NodeId, AttributeId)>> = {
            let mut st = self.state.lock();
            let sub = st.subscription(id)?;
            requests
                .iter()
                .map(|r| sub.items.get(&r.id).map(|i| (i.node_id.clone(), i.attribute_id)))
                .collect()
        };
        let prepared: Vec<Result<Option<(f64, f64)>>> = requests
            .iter()
            .zip(&targets)
            .map(|(r, target)| match target {
                Some((node, attribute)) => prepare_item(space, node, *attribute, &r.filter),
                None => Err(Error::MonitoredItemNotFound(r.id.0)),
            })
            .collect();

        let mut st = self.state.lock();
        let sub = st.subscription(id)?;
        let publishing_interval = sub.publishing_interval_ms;
        Ok(requests
            .into_iter()
            .zip(prepared)
            .map(|(request, prepared)| {
                let eu_range = prepared?;
                let item = sub.items.get_mut(&request.id).ok_or(Error::MonitoredItemNotFound(request.id.0))?;
                item.client_handle = request.client_handle;
                item.sampling_interval_ms = self.revise_sampling(request.sampling_interval_ms, publishing_interval);
                item.queue_size = self.revise_queue(request.queue_size, item.is_event_item());
                item.discard_oldest = request.discard_oldest;
                item.filter = request.filter;
                item.eu_range = eu_range;
                item.timestamps = timestamps;
                while item.queue.len() > item.queue_size as usize {
                    item.queue.pop_front();
                }
                Ok(MonitoredItemCreateResult {
                    id: item.id,
                    revised_sampling_interval_ms: item.sampling_interval_ms,
                    revised_queue_size: item.queue_size,
                })
            })
            .collect())
    }

    pub fn set_monitoring_mode(&self, id: SubscriptionId, mode: MonitoringMode, items: &[MonitoredItemId]) -> Result<Vec<Result<()>>> {
        let mut st = self.state.lock();
        let sub = st.subscription(id)?;
        Ok(items
            .iter()
            .map(|item| {
                sub.items.get_mut(item).ok_or(Error::MonitoredItemNotFound(item.0))?.set_mode(mode);
                Ok(())
            })
            .collect())
    }

    pub fn delete_monitored_items(&self, id: SubscriptionId, items: &[MonitoredItemId]) -> Result<Vec<Result<()>>> {
        let mut st = self.state.lock();
        let sub = st.subscription(id)?;
        Ok(items
            .iter()
            .map(|item| {
                sub.items.remove(item).ok_or(Error::MonitoredItemNotFound(item.0))?;
                Ok(())
            })
            .collect())
    }

    // ---- Publish -----------------------------------------------------------

    /// Process acknowledgements, reset the session's lifetime counters and
    /// answer at once if a message is waiting; otherwise queue the request
    /// for a later tick (`Ok(None)`).
    pub fn publish(&self, session: SessionId, request: PublishRequest) -> Result<Option<PublishResponse>> {
        let mut st = self.state.lock();
        let results: Vec<StatusCode> = request
            .acknowledgements
            .iter()
            .map(|ack| match st.subscriptions.get_mut(&ack.subscription_id) {
                Some(s) if s.session == session => s.acknowledge(ack.sequence_number),
                _ => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            })
            .collect();
        for sub in st.subscriptions.values_mut().filter(|s| s.session == session) {
            sub.reset_lifetime();
        }

        let pending = PendingPublish { request_id: request.request_id, results };
        if let Some(outgoing) = st.next_message(session) {
            return Ok(Some(respond(outgoing, pending)));
        }
        if st.session_subscriptions(session).next().is_none() {
            return Err(Error::NoSubscription);
        }
        let queue = st.sessions.entry(session).or_default();
        if queue.requests.len() >= self.limits.max_publish_requests_per_session {
            return Err(Error::TooManyPublishRequests);
        }
        queue.requests.push_back(pending);
        Ok(None)
    }

    /// Drain the publish requests orphaned by deleted or expired
    /// subscriptions, as `(session, request id)`. Each is owed a
    /// BadNoSubscription fault.
    pub fn take_rejected_publishes(&self) -> Vec<(SessionId, u32)> {
        std::mem::take(&mut self.state.lock().rejected)
    }

    /// A sent message still in the retransmission queue.
    pub fn republish(&self, id: SubscriptionId, sequence_number: u32) -> Result<NotificationMessage> {
        let mut st = self.state.lock();
        st.subscription(id)?.republish(sequence_number).ok_or(Error::MessageNotAvailable(sequence_number))
    }

    // ---- Events ------------------------------------------------------------

    /// Offer `event` to every event item watching a node of its notifier
    /// chain. Returns the number of items that queued it.
    pub fn trigger_event(&self, space: &AddressSpace, event: &Event) -> usize {
        let chain = space.notifier_chain(&event.source);
        let is_subtype = |a: &NodeId, b: &NodeId| space.is_subtype_of(a, b);
        let mut st = self.state.lock();
        let mut matched = 0;
        for sub in st.subscriptions.values_mut() {
            for item in sub.items.values_mut() {
                if !item.is_event_item() || item.mode == MonitoringMode::Disabled || !chain.contains(&item.node_id) {
                    continue;
                }
                let fields = match &item.filter {
                    MonitoringFilter::Event(f) => f.evaluate(event, &is_subtype),
                    _ => None,
                };
                if let Some(fields) = fields {
                    item.enqueue(Queued::Event(fields));
                    matched += 1;
                }
            }
        }
        debug!(event_type = %event.event_type, source = %event.source, matched, "event triggered");
        matched
    }

    // ---- Tick --------------------------------------------------------------

    /// One engine cycle at `now`; returns responses for queued Publish
    /// requests.
    pub fn tick(&self, now: DateTime<Utc>, space: &AddressSpace) -> Vec<(SessionId, PublishResponse)> {
        let due: Vec<(SubscriptionId, MonitoredItemId, NodeId, AttributeId)> = {
            let mut st = self.state.lock();
            let mut due = Vec::new();
            for sub in st.subscriptions.values_mut() {
                for item in sub.items.values_mut().filter(|i| i.is_due(now)) {
                    item.schedule_next(now);
                    due.push((sub.id, item.id, item.node_id.clone(), item.attribute_id));
                }
            }
            due
        };

        let samples: Vec<(SubscriptionId, MonitoredItemId, DataValue)> = due
            .into_iter()
            .map(|(sub, item, node, attribute)| (sub, item, sample(space, &node, attribute, now)))
            .collect();

        let mut st = self.state.lock();
        for (sub, item, value) in samples {
            // The item may have gone while the lock was released.
            if let Some(item) = st.subscriptions.get_mut(&sub).and_then(|s| s.items.get_mut(&item)) {
                item.offer_sample(value);
            }
        }

        let mut expired = Vec::new();
        for sub in st.subscriptions.values_mut().filter(|s| s.is_due(now)) {
            if sub.publish_cycle(now) == CycleOutcome::Expired {
                expired.push(sub.id);
            }
        }
        for id in expired {
            if let Some(mut sub) = st.subscriptions.remove(&id) {
                warn!(subscription = %id, session = %sub.session, "subscription lifetime expired");
                let message = sub.timeout_message(now);
                st.sessions.entry(sub.session).or_default().status_messages.push_back((id, message));
            }
        }

        let sessions: Vec<SessionId> = st.sessions.keys().copied().collect();
        let mut out = Vec::new();
        for session in sessions {
            loop {
                let has_request = st.sessions.get(&session).is_some_and(|q| !q.requests.is_empty());
                if !has_request {
                    break;
                }
                let Some(outgoing) = st.next_message(session) else {
                    break;
                };
                let Some(pending) = st.sessions.get_mut(&session).and_then(|q| q.requests.pop_front()) else {
                    break;
                };
                out.push((session, respond(outgoing, pending)));
            }
            st.reject_if_orphaned(session);
        }
        for sub in st.subscriptions.values_mut() {
            if !sub.ready.is_empty() {
                sub.state = SubscriptionState::Late;
            }
        }
        out
    }
}

impl std::fmt::Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("SubscriptionEngine")
            .field("subscriptions", &st.subscriptions.len())
            .field("sessions", &st.sessions.len())
            .finish()
    }
}
