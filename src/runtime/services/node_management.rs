//! Node management services: AddNodes, AddReferences, DeleteNodes,
//! DeleteReferences. Every element passes the session's access hook first.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address_space::AddNodeRequest;
use crate::model::{NodeId, Reference, StatusCode};
use crate::runtime::{ServerRuntime, SessionId};
use crate::{Error, Result};

use super::status_of;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddNodesRequest {
    pub nodes_to_add: Vec<AddNodeRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddNodesResult {
    pub status: StatusCode,
    pub added_node_id: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddNodesResponse {
    pub results: Vec<AddNodesResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddReferencesRequest {
    pub references_to_add: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddReferencesResponse {
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteNodeItem {
    pub node_id: NodeId,
    /// Also remove references other nodes hold to it.
    pub delete_target_references: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteNodesRequest {
    pub nodes_to_delete: Vec<DeleteNodeItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteNodesResponse {
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteReferenceItem {
    pub reference: Reference,
    pub delete_bidirectional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteReferencesRequest {
    pub references_to_delete: Vec<DeleteReferenceItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteReferencesResponse {
    pub results: Vec<StatusCode>,
}

fn denied(what: &str, session: SessionId) -> Error {
    Error::AccessDenied(format!("{what} not allowed for session {session}"))
}

impl ServerRuntime {
    pub fn add_nodes(&self, session: SessionId, request: AddNodesRequest) -> Result<AddNodesResponse> {
        self.check_session(session)?;
        let access = self.access();
        let results = request
            .nodes_to_add
            .into_iter()
            .map(|r| {
                let added = if access.allow_add_node(session, &r) {
                    self.space.add_node(r)
                } else {
                    Err(denied("AddNodes", session))
                };
                AddNodesResult { status: status_of(&added), added_node_id: added.ok() }
            })
            .collect();
        Ok(AddNodesResponse { results })
    }

    pub fn add_references(&self, session: SessionId, request: &AddReferencesRequest) -> Result<AddReferencesResponse> {
        self.check_session(session)?;
        let access = self.access();
        let results = request
            .references_to_add
            .iter()
            .map(|r| {
                let added = if access.allow_add_reference(session, r) {
                    self.space.add_reference(&r.source, &r.reference_type, &r.target, r.is_forward)
                } else {
                    Err(denied("AddReferences", session))
                };
                status_of(&added)
            })
            .collect();
        Ok(AddReferencesResponse { results })
    }

    pub fn delete_nodes(&self, session: SessionId, request: &DeleteNodesRequest) -> Result<DeleteNodesResponse> {
        self.check_session(session)?;
        let access = self.access();
        let results = request
            .nodes_to_delete
            .iter()
            .map(|d| {
                let deleted = if access.allow_delete_node(session, &d.node_id, d.delete_target_references) {
                    self.space.delete_node(&d.node_id, d.delete_target_references)
                } else {
                    Err(denied("DeleteNodes", session))
                };
                if let Ok(count) = &deleted {
                    debug!(session = %session, node = %d.node_id, count, "nodes deleted by client");
                }
                status_of(&deleted)
            })
            .collect();
        Ok(DeleteNodesResponse { results })
    }

    pub fn delete_references(&self, session: SessionId, request: &DeleteReferencesRequest) -> Result<DeleteReferencesResponse> {
        self.check_session(session)?;
        let access = self.access();
        let results = request
            .references_to_delete
            .iter()
            .map(|d| {
                let r = &d.reference;
                let deleted = if access.allow_delete_reference(session, r) {
                    self.space.delete_reference(&r.source, &r.reference_type, &r.target, r.is_forward, d.delete_bidirectional)
                } else {
                    Err(denied("DeleteReferences", session))
                };
                status_of(&deleted)
            })
            .collect();
        Ok(DeleteReferencesResponse { results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::PermissiveAccessControl;
    use crate::config::ServerConfig;
    use crate::model::{ids, NodeAttributes};
    use std::sync::Arc;

    fn setup() -> (ServerRuntime, SessionId) {
        let rt = ServerRuntime::new(ServerConfig::default()).unwrap();
        let s = rt.create_session("s", 0.0).unwrap().id;
        rt.activate_session(s, None).unwrap();
        (rt, s)
    }

    fn pump(id: u32) -> AddNodeRequest {
        AddNodeRequest::new(NodeId::OBJECTS, ids::ORGANIZES, "1:Pump", NodeAttributes::object()).with_id(NodeId::numeric(1, id))
    }

    #[test]
    fn test_default_access_denies_structure_changes() {
        let (rt, s) = setup();
        let before = rt.address_space().node_count();
        let response = rt.add_nodes(s, AddNodesRequest { nodes_to_add: vec![pump(5000)] }).unwrap();
        assert_eq!(response.results[0].status, StatusCode::BAD_USER_ACCESS_DENIED);
        assert_eq!(rt.address_space().node_count(), before);
    }

    #[test]
    fn test_duplicate_id_reported_per_element() {
        let (rt, s) = setup();
        rt.set_access_control(Arc::new(PermissiveAccessControl));
        let before = rt.address_space().node_count();
        let response = rt.add_nodes(s, AddNodesRequest { nodes_to_add: vec![pump(5000), pump(5000)] }).unwrap();
        assert_eq!(response.results[0].status, StatusCode::GOOD);
        assert_eq!(response.results[0].added_node_id, Some(NodeId::numeric(1, 5000)));
        assert_eq!(response.results[1].status, StatusCode::BAD_NODE_ID_EXISTS);
        assert_eq!(rt.address_space().node_count(), before + 1);

        let deleted = rt
            .delete_nodes(s, &DeleteNodesRequest {
                nodes_to_delete: vec![DeleteNodeItem { node_id: NodeId::numeric(1, 5000), delete_target_references: true }],
            })
            .unwrap();
        assert_eq!(deleted.results, vec![StatusCode::GOOD]);
        assert_eq!(rt.address_space().node_count(), before);
    }
}
