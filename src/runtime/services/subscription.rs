//! Subscription and monitored-item services. A session may only touch its
//! own subscriptions; someone else's id is reported as unknown.

use serde::{Deserialize, Serialize};

use crate::model::{StatusCode, TimestampsToReturn};
use crate::runtime::{ServerRuntime, SessionId};
use crate::subscription::{
    MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemId, MonitoredItemModifyRequest, MonitoringMode,
    NotificationMessage, PublishRequest, PublishResponse, RevisedSubscription, SubscriptionId, SubscriptionParams,
};
use crate::{Error, Result};

use super::status_of;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub params: SubscriptionParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifySubscriptionRequest {
    pub subscription_id: SubscriptionId,
    pub params: SubscriptionParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPublishingModeRequest {
    pub publishing_enabled: bool,
    pub subscription_ids: Vec<SubscriptionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteSubscriptionsRequest {
    pub subscription_ids: Vec<SubscriptionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepublishRequest {
    pub subscription_id: SubscriptionId,
    pub retransmit_sequence_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMonitoredItemsRequest {
    pub subscription_id: SubscriptionId,
    pub timestamps_to_return: TimestampsToReturn,
    pub items_to_create: Vec<MonitoredItemCreateRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyMonitoredItemsRequest {
    pub subscription_id: SubscriptionId,
    pub timestamps_to_return: TimestampsToReturn,
    pub items_to_modify: Vec<MonitoredItemModifyRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMonitoringModeRequest {
    pub subscription_id: SubscriptionId,
    pub monitoring_mode: MonitoringMode,
    pub monitored_item_ids: Vec<MonitoredItemId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteMonitoredItemsRequest {
    pub subscription_id: SubscriptionId,
    pub monitored_item_ids: Vec<MonitoredItemId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemResult {
    pub status: StatusCode,
    pub result: Option<MonitoredItemCreateResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMonitoredItemsResponse {
    pub results: Vec<MonitoredItemResult>,
}

/// Per-element statuses of a batch service without other output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub results: Vec<StatusCode>,
}

fn statuses(results: Vec<Result<()>>) -> StatusResponse {
    StatusResponse { results: results.iter().map(status_of).collect() }
}

fn item_results(results: Vec<Result<MonitoredItemCreateResult>>) -> CreateMonitoredItemsResponse {
    CreateMonitoredItemsResponse {
        results: results
            .into_iter()
            .map(|r| MonitoredItemResult { status: status_of(&r), result: r.ok() })
            .collect(),
    }
}

impl ServerRuntime {
    fn owned(&self, session: SessionId, id: SubscriptionId) -> Result<()> {
        match self.engine.owner(id) {
            Some(owner) if owner == session => Ok(()),
            _ => Err(Error::SubscriptionNotFound(id.0)),
        }
    }

    pub fn create_subscription(&self, session: SessionId, request: &CreateSubscriptionRequest) -> Result<RevisedSubscription> {
        self.check_session(session)?;
        self.engine.create_subscription(session, &request.params)
    }

    pub fn modify_subscription(&self, session: SessionId, request: &ModifySubscriptionRequest) -> Result<RevisedSubscription> {
        self.check_session(session)?;
        self.owned(session, request.subscription_id)?;
        self.engine.modify_subscription(request.subscription_id, &request.params)
    }

    pub fn set_publishing_mode(&self, session: SessionId, request: &SetPublishingModeRequest) -> Result<StatusResponse> {
        self.check_session(session)?;
        let results = request
            .subscription_ids
            .iter()
            .map(|id| {
                self.owned(session, *id)?;
                self.engine
                    .set_publishing_mode(request.publishing_enabled, &[*id])
                    .pop()
                    .unwrap_or(Err(Error::SubscriptionNotFound(id.0)))
            })
            .collect();
        Ok(statuses(results))
    }

    pub fn delete_subscriptions(&self, session: SessionId, request: &DeleteSubscriptionsRequest) -> Result<StatusResponse> {
        self.check_session(session)?;
        let results = request
            .subscription_ids
            .iter()
            .map(|id| {
                self.owned(session, *id)?;
                self.engine
                    .delete_subscriptions(&[*id])
                    .pop()
                    .unwrap_or(Err(Error::SubscriptionNotFound(id.0)))
            })
            .collect();
        self.reject_orphaned_publishes();
        Ok(statuses(results))
    }

    /// `Ok(None)`: queued; the response leaves through a later iteration.
    pub fn publish(&self, session: SessionId, request: PublishRequest) -> Result<Option<PublishResponse>> {
        self.check_session(session)?;
        self.engine.publish(session, request)
    }

    pub fn republish(&self, session: SessionId, request: &RepublishRequest) -> Result<NotificationMessage> {
        self.check_session(session)?;
        self.owned(session, request.subscription_id)?;
        self.engine.republish(request.subscription_id, request.retransmit_sequence_number)
    }

    pub fn create_monitored_items(&self, session: SessionId, request: CreateMonitoredItemsRequest) -> Result<CreateMonitoredItemsResponse> {
        self.check_session(session)?;
        self.owned(session, request.subscription_id)?;
        let results = self.engine.create_monitored_items(
            &self.space,
            request.subscription_id,
            request.timestamps_to_return,
            request.items_to_create,
        )?;
        Ok(item_results(results))
    }

    pub fn modify_monitored_items(&self, session: SessionId, request: ModifyMonitoredItemsRequest) -> Result<CreateMonitoredItemsResponse> {
        self.check_session(session)?;
        self.owned(session, request.subscription_id)?;
        let results = self.engine.modify_monitored_items(
            &self.space,
            request.subscription_id,
            request.timestamps_to_return,
            request.items_to_modify,
        )?;
        Ok(item_results(results))
    }

    pub fn set_monitoring_mode(&self, session: SessionId, request: &SetMonitoringModeRequest) -> Result<StatusResponse> {
        self.check_session(session)?;
        self.owned(session, request.subscription_id)?;
        let results = self.engine.set_monitoring_mode(request.subscription_id, request.monitoring_mode, &request.monitored_item_ids)?;
        Ok(statuses(results))
    }

    pub fn delete_monitored_items(&self, session: SessionId, request: &DeleteMonitoredItemsRequest) -> Result<StatusResponse> {
        self.check_session(session)?;
        self.owned(session, request.subscription_id)?;
        let results = self.engine.delete_monitored_items(request.subscription_id, &request.monitored_item_ids)?;
        Ok(statuses(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::model::NodeId;

    fn session(rt: &ServerRuntime, name: &str) -> SessionId {
        let s = rt.create_session(name, 0.0).unwrap().id;
        rt.activate_session(s, None).unwrap();
        s
    }

    #[test]
    fn test_sessions_cannot_touch_foreign_subscriptions() {
        let rt = ServerRuntime::new(ServerConfig::default()).unwrap();
        let a = session(&rt, "a");
        let b = session(&rt, "b");
        let sub = rt
            .create_subscription(a, &CreateSubscriptionRequest { params: SubscriptionParams::new(100.0) })
            .unwrap();

        let deleted = rt
            .delete_subscriptions(b, &DeleteSubscriptionsRequest { subscription_ids: vec![sub.id] })
            .unwrap();
        assert_eq!(deleted.results, vec![StatusCode::BAD_SUBSCRIPTION_ID_INVALID]);

        let items = rt.create_monitored_items(b, CreateMonitoredItemsRequest {
            subscription_id: sub.id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_create: vec![MonitoredItemCreateRequest::value(NodeId::OBJECTS, 1)],
        });
        assert!(matches!(items, Err(Error::SubscriptionNotFound(_))));

        let deleted = rt
            .delete_subscriptions(a, &DeleteSubscriptionsRequest { subscription_ids: vec![sub.id] })
            .unwrap();
        assert_eq!(deleted.results, vec![StatusCode::GOOD]);
    }

    #[test]
    fn test_publish_without_subscription_faults() {
        let rt = ServerRuntime::new(ServerConfig::default()).unwrap();
        let a = session(&rt, "a");
        assert!(matches!(rt.publish(a, PublishRequest::new(1)), Err(Error::NoSubscription)));
    }
}
