//! # Service Handlers
//!
//! One handler per request type, each a method on [`ServerRuntime`] taking
//! the calling session and a request struct and returning a response
//! struct. Handlers check that the session exists and is activated, consult
//! the [`AccessControl`](crate::AccessControl) hooks, and report batch
//! failures per element as status codes. A handler error is a service
//! fault for the whole request.
//!
//! [`ServerRuntime::handle`] dispatches a decoded [`RequestEnvelope`] to the
//! right handler, which is all a transport needs.

mod attribute;
mod history;
mod node_management;
mod subscription;
mod view;

pub use attribute::{ReadRequest, ReadResponse, ReadValueId, WriteRequest, WriteResponse, WriteValue};
pub use history::{
    HistoryReadRequest, HistoryReadResponse, HistoryReadResult, HistoryReadValueId, HistoryUpdateDetails,
    HistoryUpdateRequest, HistoryUpdateResponse, HistoryUpdateResult,
};
pub use node_management::{
    AddNodesRequest, AddNodesResponse, AddNodesResult, AddReferencesRequest, AddReferencesResponse,
    DeleteNodeItem, DeleteNodesRequest, DeleteNodesResponse, DeleteReferenceItem, DeleteReferencesRequest,
    DeleteReferencesResponse,
};
pub use subscription::{
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSubscriptionRequest, DeleteMonitoredItemsRequest,
    DeleteSubscriptionsRequest, ModifyMonitoredItemsRequest, ModifySubscriptionRequest, MonitoredItemResult,
    RepublishRequest, SetMonitoringModeRequest, SetPublishingModeRequest, StatusResponse,
};
pub use view::{
    BrowseContinuationPoint, BrowseNextRequest, BrowsePath, BrowseRequest, BrowseResponse, BrowseResult,
    NodeToBrowse, TranslateBrowsePathsRequest, TranslateBrowsePathsResponse,
};

pub(crate) use view::BrowseCursors;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::StatusCode;
use crate::subscription::{NotificationMessage, PublishRequest, PublishResponse, RevisedSubscription};
use crate::Result;

use super::{CallMethodRequest, CallMethodResult, ServerRuntime, SessionId};

// ============================================================================
// Envelopes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub session: SessionId,
    /// Echoed in the response.
    pub request_handle: u32,
    pub request: ServiceRequest,
}

impl RequestEnvelope {
    pub fn new(session: SessionId, request_handle: u32, request: ServiceRequest) -> Self {
        Self { session, request_handle, request }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub session: SessionId,
    pub request_handle: u32,
    pub response: ServiceResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub methods_to_call: Vec<CallMethodRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    pub results: Vec<CallMethodResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServiceRequest {
    Browse(BrowseRequest),
    BrowseNext(BrowseNextRequest),
    TranslateBrowsePaths(TranslateBrowsePathsRequest),
    Read(ReadRequest),
    Write(WriteRequest),
    AddNodes(AddNodesRequest),
    AddReferences(AddReferencesRequest),
    DeleteNodes(DeleteNodesRequest),
    DeleteReferences(DeleteReferencesRequest),
    Call(CallRequest),
    CreateSubscription(CreateSubscriptionRequest),
    ModifySubscription(ModifySubscriptionRequest),
    SetPublishingMode(SetPublishingModeRequest),
    DeleteSubscriptions(DeleteSubscriptionsRequest),
    /// The envelope's request handle becomes the publish request id.
    Publish(PublishRequest),
    Republish(RepublishRequest),
    CreateMonitoredItems(CreateMonitoredItemsRequest),
    ModifyMonitoredItems(ModifyMonitoredItemsRequest),
    SetMonitoringMode(SetMonitoringModeRequest),
    DeleteMonitoredItems(DeleteMonitoredItemsRequest),
    HistoryRead(HistoryReadRequest),
    HistoryUpdate(HistoryUpdateRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServiceResponse {
    Browse(BrowseResponse),
    BrowseNext(BrowseResponse),
    TranslateBrowsePaths(TranslateBrowsePathsResponse),
    Read(ReadResponse),
    Write(WriteResponse),
    AddNodes(AddNodesResponse),
    AddReferences(AddReferencesResponse),
    DeleteNodes(DeleteNodesResponse),
    DeleteReferences(DeleteReferencesResponse),
    Call(CallResponse),
    CreateSubscription(RevisedSubscription),
    ModifySubscription(RevisedSubscription),
    SetPublishingMode(StatusResponse),
    DeleteSubscriptions(StatusResponse),
    Publish(PublishResponse),
    Republish(NotificationMessage),
    CreateMonitoredItems(CreateMonitoredItemsResponse),
    ModifyMonitoredItems(CreateMonitoredItemsResponse),
    SetMonitoringMode(StatusResponse),
    DeleteMonitoredItems(StatusResponse),
    HistoryRead(HistoryReadResponse),
    HistoryUpdate(HistoryUpdateResponse),
    /// The whole request failed.
    Fault(StatusCode),
}

impl ServiceResponse {
    pub fn fault(&self) -> Option<StatusCode> {
        match self {
            ServiceResponse::Fault(status) => Some(*status),
            _ => None,
        }
    }
}

/// Per-element status of a batch result.
pub(crate) fn status_of<T>(result: &Result<T>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::GOOD,
        Err(e) => e.status_code(),
    }
}

// ============================================================================
// Dispatch
// ============================================================================

impl ServerRuntime {
    /// Fails unless `session` exists and is activated; records activity.
    pub(crate) fn check_session(&self, session: SessionId) -> Result<()> {
        self.sessions.touch(session, Utc::now())
    }

    /// Handle one request. `None` means the response comes later (a Publish
    /// waiting for a notification) through [`ServerRuntime::take_responses`].
    pub fn handle(&self, envelope: RequestEnvelope) -> Option<ResponseEnvelope> {
        let RequestEnvelope { session, request_handle, request } = envelope;
        let response = match self.dispatch(session, request_handle, request) {
            Ok(Some(response)) => response,
            Ok(None) => return None,
            Err(e) => {
                debug!(session = %session, error = %e, "service fault");
                ServiceResponse::Fault(e.status_code())
            }
        };
        self.space.apply_deferred();
        Some(ResponseEnvelope { session, request_handle, response })
    }

    fn dispatch(&self, session: SessionId, handle: u32, request: ServiceRequest) -> Result<Option<ServiceResponse>> {
        use ServiceRequest as Rq;
        use ServiceResponse as Rs;

        Ok(Some(match request {
            Rq::Browse(r) => Rs::Browse(self.browse(session, &r)?),
            Rq::BrowseNext(r) => Rs::BrowseNext(self.browse_next(session, &r)?),
            Rq::TranslateBrowsePaths(r) => Rs::TranslateBrowsePaths(self.translate_browse_paths(session, &r)?),
            Rq::Read(r) => Rs::Read(self.read(session, &r)?),
            Rq::Write(r) => Rs::Write(self.write(session, r)?),
            Rq::AddNodes(r) => Rs::AddNodes(self.add_nodes(session, r)?),
            Rq::AddReferences(r) => Rs::AddReferences(self.add_references(session, &r)?),
            Rq::DeleteNodes(r) => Rs::DeleteNodes(self.delete_nodes(session, &r)?),
            Rq::DeleteReferences(r) => Rs::DeleteReferences(self.delete_references(session, &r)?),
            Rq::Call(r) => Rs::Call(self.call_methods(session, &r)?),
            Rq::CreateSubscription(r) => Rs::CreateSubscription(self.create_subscription(session, &r)?),
            Rq::ModifySubscription(r) => Rs::ModifySubscription(self.modify_subscription(session, &r)?),
            Rq::SetPublishingMode(r) => Rs::SetPublishingMode(self.set_publishing_mode(session, &r)?),
            Rq::DeleteSubscriptions(r) => Rs::DeleteSubscriptions(self.delete_subscriptions(session, &r)?),
            Rq::Publish(r) => {
                let request = PublishRequest { request_id: handle, ..r };
                match self.publish(session, request)? {
                    Some(response) => Rs::Publish(response),
                    None => return Ok(None),
                }
            }
            Rq::Republish(r) => Rs::Republish(self.republish(session, &r)?),
            Rq::CreateMonitoredItems(r) => Rs::CreateMonitoredItems(self.create_monitored_items(session, r)?),
            Rq::ModifyMonitoredItems(r) => Rs::ModifyMonitoredItems(self.modify_monitored_items(session, r)?),
            Rq::SetMonitoringMode(r) => Rs::SetMonitoringMode(self.set_monitoring_mode(session, &r)?),
            Rq::DeleteMonitoredItems(r) => Rs::DeleteMonitoredItems(self.delete_monitored_items(session, &r)?),
            Rq::HistoryRead(r) => Rs::HistoryRead(self.history_read(session, &r)?),
            Rq::HistoryUpdate(r) => Rs::HistoryUpdate(self.history_update(session, r)?),
        }))
    }

    /// Call service: one [`ServerRuntime::call`] per element.
    pub fn call_methods(&self, session: SessionId, request: &CallRequest) -> Result<CallResponse> {
        self.check_session(session)?;
        let results = request.methods_to_call.iter().map(|m| self.call(session, m)).collect();
        Ok(CallResponse { results })
    }
}
