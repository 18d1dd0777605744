//! Historical access services: HistoryRead (raw) and HistoryUpdate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::history::{ContinuationPoint, HistoryBackend, HistoryData, ReadRawDetails, UpdateKind};
use crate::model::{access_level, DataValue, NodeId, StatusCode, TimestampsToReturn};
use crate::runtime::{ServerRuntime, SessionId};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReadValueId {
    pub node_id: NodeId,
    pub continuation_point: Option<ContinuationPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReadRequest {
    pub details: ReadRawDetails,
    pub timestamps_to_return: TimestampsToReturn,
    /// Drop the given continuation points; nothing is read.
    pub release_continuation_points: bool,
    pub nodes_to_read: Vec<HistoryReadValueId>,
}

impl HistoryReadRequest {
    pub fn raw(details: ReadRawDetails, nodes: Vec<NodeId>) -> Self {
        Self {
            details,
            timestamps_to_return: TimestampsToReturn::Both,
            release_continuation_points: false,
            nodes_to_read: nodes
                .into_iter()
                .map(|node_id| HistoryReadValueId { node_id, continuation_point: None })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReadResult {
    pub status: StatusCode,
    pub data: HistoryData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReadResponse {
    pub results: Vec<HistoryReadResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryUpdateDetails {
    UpdateData { node_id: NodeId, kind: UpdateKind, values: Vec<DataValue> },
    /// Remove values with a source timestamp in `[start, end]`.
    DeleteRawModified { node_id: NodeId, start: DateTime<Utc>, end: DateTime<Utc> },
}

impl HistoryUpdateDetails {
    pub fn node_id(&self) -> &NodeId {
        match self {
            HistoryUpdateDetails::UpdateData { node_id, .. } | HistoryUpdateDetails::DeleteRawModified { node_id, .. } => node_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryUpdateRequest {
    pub details: Vec<HistoryUpdateDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryUpdateResult {
    pub status: StatusCode,
    /// One per value of an UpdateData element.
    pub operation_results: Vec<StatusCode>,
}

impl HistoryUpdateResult {
    fn status_only(status: StatusCode) -> Self {
        Self { status, operation_results: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryUpdateResponse {
    pub results: Vec<HistoryUpdateResult>,
}

impl ServerRuntime {
    fn historian(&self) -> Result<std::sync::Arc<dyn HistoryBackend>> {
        self.space
            .history()
            .ok_or_else(|| Error::NotSupported("no history backend configured".into()))
    }

    /// Effective access level of a variable for `session`.
    fn history_access(&self, session: SessionId, node: &NodeId, bit: u8) -> Result<()> {
        let level = self
            .space
            .node(node)
            .ok_or_else(|| Error::NodeNotFound(node.clone()))?
            .as_variable()
            .map(|v| v.access_level)
            .ok_or_else(|| Error::NotSupported(format!("{node} is not a variable")))?;
        if level & self.access().user_access_level(session, node) & bit == 0 {
            return Err(Error::AccessDenied(format!("history access to {node} denied")));
        }
        Ok(())
    }

    pub fn history_read(&self, session: SessionId, request: &HistoryReadRequest) -> Result<HistoryReadResponse> {
        self.check_session(session)?;
        if request.release_continuation_points {
            let results = request
                .nodes_to_read
                .iter()
                .map(|_| HistoryReadResult { status: StatusCode::GOOD, data: HistoryData::default() })
                .collect();
            return Ok(HistoryReadResponse { results });
        }
        let historian = self.historian()?;
        let results = request
            .nodes_to_read
            .iter()
            .map(|n| {
                let read = self
                    .history_access(session, &n.node_id, access_level::HISTORY_READ)
                    .and_then(|()| historian.read_raw(&request.details, &n.node_id, n.continuation_point.as_ref()));
                match read {
                    Ok(mut data) => {
                        data.values = data.values.into_iter().map(|v| request.timestamps_to_return.apply(v)).collect();
                        HistoryReadResult { status: StatusCode::GOOD, data }
                    }
                    Err(e) => HistoryReadResult { status: e.status_code(), data: HistoryData::default() },
                }
            })
            .collect();
        Ok(HistoryReadResponse { results })
    }

    pub fn history_update(&self, session: SessionId, request: HistoryUpdateRequest) -> Result<HistoryUpdateResponse> {
        self.check_session(session)?;
        let historian = self.historian()?;
        let access = self.access();
        let results = request
            .details
            .into_iter()
            .map(|details| {
                if let Err(e) = self.history_access(session, details.node_id(), access_level::HISTORY_WRITE) {
                    return HistoryUpdateResult::status_only(e.status_code());
                }
                match details {
                    HistoryUpdateDetails::UpdateData { node_id, kind, values } => {
                        if !access.allow_history_update(session, &node_id, kind) {
                            return HistoryUpdateResult::status_only(StatusCode::BAD_USER_ACCESS_DENIED);
                        }
                        let operation_results = historian.update(&node_id, kind, values);
                        HistoryUpdateResult { status: StatusCode::GOOD, operation_results }
                    }
                    HistoryUpdateDetails::DeleteRawModified { node_id, start, end } => {
                        if !access.allow_history_delete(session, &node_id) {
                            return HistoryUpdateResult::status_only(StatusCode::BAD_USER_ACCESS_DENIED);
                        }
                        let removed = historian.delete_raw(&node_id, start, end);
                        debug!(session = %session, node = %node_id, removed, "history deleted by client");
                        HistoryUpdateResult::status_only(StatusCode::GOOD)
                    }
                }
            })
            .collect();
        Ok(HistoryUpdateResponse { results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::PermissiveAccessControl;
    use crate::config::ServerConfig;
    use crate::model::{VariableAttributes, Variant};
    use chrono::Duration;
    use std::sync::Arc;

    fn setup() -> (ServerRuntime, SessionId, NodeId) {
        let rt = ServerRuntime::new(ServerConfig::default()).unwrap();
        let s = rt.create_session("s", 0.0).unwrap().id;
        rt.activate_session(s, None).unwrap();
        let attrs = VariableAttributes::new(0i32)
            .historizing()
            .with_access_level(access_level::ALL);
        let node = rt.address_space().add_variable_with(&NodeId::OBJECTS, "Level", attrs, 1).unwrap();
        (rt, s, node)
    }

    #[test]
    fn test_history_read_pages_live_writes() {
        let (rt, s, node) = setup();
        let base = Utc::now() - Duration::seconds(100);
        for i in 0..5i32 {
            rt.address_space()
                .set_data_value(&node, DataValue::new_at(i, base + Duration::seconds(i as i64)))
                .unwrap();
        }
        let mut request = HistoryReadRequest::raw(ReadRawDetails::all().with_max_values(3), vec![node.clone()]);
        let first = rt.history_read(s, &request).unwrap().results.remove(0);
        assert_eq!(first.status, StatusCode::GOOD);
        assert_eq!(first.data.values.len(), 3);
        request.nodes_to_read[0].continuation_point = first.data.continuation_point;
        let second = rt.history_read(s, &request).unwrap().results.remove(0);
        assert_eq!(second.data.values.iter().map(|v| v.value.clone()).collect::<Vec<_>>(), vec![Variant::Int32(3), Variant::Int32(4)]);
        assert!(second.data.continuation_point.is_none());
    }

    #[test]
    fn test_history_update_needs_access_hook() {
        let (rt, s, node) = setup();
        let at = Utc::now() - Duration::seconds(10);
        let request = || HistoryUpdateRequest {
            details: vec![HistoryUpdateDetails::UpdateData {
                node_id: node.clone(),
                kind: UpdateKind::Insert,
                values: vec![DataValue::new_at(9i32, at)],
            }],
        };
        let denied = rt.history_update(s, request()).unwrap();
        assert_eq!(denied.results[0].status, StatusCode::BAD_USER_ACCESS_DENIED);

        rt.set_access_control(Arc::new(PermissiveAccessControl));
        let inserted = rt.history_update(s, request()).unwrap();
        assert_eq!(inserted.results[0].operation_results, vec![StatusCode::GOOD_ENTRY_INSERTED]);

        let deleted = rt
            .history_update(s, HistoryUpdateRequest {
                details: vec![HistoryUpdateDetails::DeleteRawModified { node_id: node.clone(), start: at, end: at }],
            })
            .unwrap();
        assert_eq!(deleted.results[0].status, StatusCode::GOOD);
    }
}
