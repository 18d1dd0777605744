//! Access-control hooks consulted by the service handlers.
//!
//! The local API on [`AddressSpace`](crate::AddressSpace) is trusted and does
//! not go through these hooks; only requests arriving through
//! [`services`](crate::runtime::services) do.
//!
//! Defaults: structural and history mutations are denied; browse, read,
//! session activation and method execution are allowed; the user access
//! level and write mask grant every bit, so the node's own AccessLevel and
//! WriteMask remain the effective limit.

use crate::history::UpdateKind;
use crate::model::{access_level, write_mask, NodeId, Reference};
use crate::address_space::AddNodeRequest;
use crate::runtime::SessionId;

pub trait AccessControl: Send + Sync {
    fn activate_session(&self, _session: SessionId, _user: Option<&str>) -> bool {
        true
    }

    fn close_session(&self, _session: SessionId) {}

    fn allow_add_node(&self, _session: SessionId, _request: &AddNodeRequest) -> bool {
        false
    }

    fn allow_add_reference(&self, _session: SessionId, _reference: &Reference) -> bool {
        false
    }

    fn allow_delete_node(&self, _session: SessionId, _node: &NodeId, _delete_references: bool) -> bool {
        false
    }

    fn allow_delete_reference(&self, _session: SessionId, _reference: &Reference) -> bool {
        false
    }

    fn allow_browse_node(&self, _session: SessionId, _node: &NodeId) -> bool {
        true
    }

    /// Masked with the node's AccessLevel.
    fn user_access_level(&self, _session: SessionId, _node: &NodeId) -> u8 {
        access_level::ALL
    }

    /// Masked with the node's WriteMask.
    fn user_write_mask(&self, _session: SessionId, _node: &NodeId) -> u32 {
        write_mask::ALL
    }

    fn user_executable(&self, _session: SessionId, _method: &NodeId, _object: &NodeId) -> bool {
        true
    }

    fn allow_history_update(&self, _session: SessionId, _node: &NodeId, _kind: UpdateKind) -> bool {
        false
    }

    fn allow_history_delete(&self, _session: SessionId, _node: &NodeId) -> bool {
        false
    }
}

/// Uses every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAccessControl;

impl AccessControl for DefaultAccessControl {}

/// Allows everything; for tests and closed deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveAccessControl;

impl AccessControl for PermissiveAccessControl {
    fn allow_add_node(&self, _: SessionId, _: &AddNodeRequest) -> bool {
        true
    }

    fn allow_add_reference(&self, _: SessionId, _: &Reference) -> bool {
        true
    }

    fn allow_delete_node(&self, _: SessionId, _: &NodeId, _: bool) -> bool {
        true
    }

    fn allow_delete_reference(&self, _: SessionId, _: &Reference) -> bool {
        true
    }

    fn allow_history_update(&self, _: SessionId, _: &NodeId, _: UpdateKind) -> bool {
        true
    }

    fn allow_history_delete(&self, _: SessionId, _: &NodeId) -> bool {
        true
    }
}
