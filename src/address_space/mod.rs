//! # Address Space
//!
//! The directed graph of nodes and typed references a server exposes.
//! The address space owns all node storage; every other component refers to
//! nodes by [`NodeId`].
//!
//! ## Locking
//!
//! All node storage sits behind one `parking_lot::RwLock`. Browse and read
//! take it shared; add/delete, reference changes and writes take it
//! exclusive. The lock is never held while a [`NodeContext`] hook runs.
//! Mutations issued from inside a hook (write, `set_value`, reference
//! changes, `delete_node`) are queued and applied when the outermost
//! operation returns, or at the next [`AddressSpace::apply_deferred`] call.
//! `add_node` always runs immediately because its caller needs the id.

mod store;
mod ns0;
mod attributes;
mod browse;
mod types;
mod convenience;

pub use store::{NodeHandle, NodeStore, RefEntry};
pub use browse::{BrowseIter, BrowsePathResult, BrowsePathTarget};
pub use ns0::NS0_URI;
pub(crate) use attributes::check_value;

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AddressSpaceConfig;
use crate::context::{ContextRegistry, NodeContext};
use crate::history::HistoryBackend;
use crate::model::{
    ids, AttributeId, ContextHandle, DataValue, LocalizedText, Node, NodeAttributes, NodeClass,
    NodeId, QualifiedName, Reference,
};
use crate::{Error, Result};

// ============================================================================
// AddNodeRequest
// ============================================================================

/// Everything needed to add one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddNodeRequest {
    /// `NodeId::NULL` asks for a generated id.
    pub requested_id: NodeId,
    pub parent: NodeId,
    pub reference_type: NodeId,
    pub browse_name: QualifiedName,
    pub node_class: NodeClass,
    pub attributes: NodeAttributes,
    pub display_name: Option<LocalizedText>,
    pub description: Option<LocalizedText>,
    pub write_mask: u32,
    pub type_definition: Option<NodeId>,
    #[serde(skip)]
    pub context: Option<ContextHandle>,
}

impl AddNodeRequest {
    pub fn new(
        parent: NodeId,
        reference_type: NodeId,
        browse_name: impl Into<QualifiedName>,
        attributes: NodeAttributes,
    ) -> Self {
        Self {
            requested_id: NodeId::NULL,
            parent,
            reference_type,
            browse_name: browse_name.into(),
            node_class: attributes.node_class(),
            attributes,
            display_name: None,
            description: None,
            write_mask: 0,
            type_definition: None,
            context: None,
        }
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.requested_id = id;
        self
    }

    pub fn with_type_definition(mut self, type_definition: NodeId) -> Self {
        self.type_definition = Some(type_definition);
        self
    }

    pub fn with_context(mut self, context: ContextHandle) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_display_name(mut self, text: impl Into<LocalizedText>) -> Self {
        self.display_name = Some(text.into());
        self
    }

    pub fn with_description(mut self, text: impl Into<LocalizedText>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn with_write_mask(mut self, mask: u32) -> Self {
        self.write_mask = mask;
        self
    }
}

// ============================================================================
// Deferred mutations
// ============================================================================

#[derive(Debug)]
enum Deferred {
    Write { node: NodeId, attribute: AttributeId, value: DataValue, check_access: bool },
    AddReference(Reference),
    DeleteReference { reference: Reference, bidirectional: bool },
    DeleteNode { node: NodeId, delete_references: bool },
}

thread_local! {
    static HOOK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

fn in_hook() -> bool {
    HOOK_DEPTH.with(|d| d.get() > 0)
}

struct HookScope;

impl HookScope {
    fn enter() -> Self {
        HOOK_DEPTH.with(|d| d.set(d.get() + 1));
        HookScope
    }
}

impl Drop for HookScope {
    fn drop(&mut self) {
        HOOK_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

// ============================================================================
// AddressSpace
// ============================================================================

pub struct AddressSpace {
    store: RwLock<NodeStore>,
    config: AddressSpaceConfig,
    namespaces: RwLock<Vec<String>>,
    contexts: ContextRegistry,
    history: RwLock<Option<Arc<dyn HistoryBackend>>>,
    deferred: Mutex<VecDeque<Deferred>>,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new(AddressSpaceConfig::default(), "urn:opcua-engine:server")
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("nodes", &self.node_count())
            .field("namespaces", &*self.namespaces.read())
            .finish()
    }
}

impl AddressSpace {
    /// A bootstrapped address space: namespace 0 plus `application_uri` as
    /// namespace 1.
    pub fn new(config: AddressSpaceConfig, application_uri: &str) -> Self {
        let mut store = NodeStore::new(config.first_generated_id);
        if let Err(e) = ns0::bootstrap(&mut store) {
            // Only reachable through a broken bootstrap table.
            warn!(error = %e, "namespace 0 bootstrap incomplete");
        }
        debug!(nodes = store.len(), "address space bootstrapped");
        Self {
            store: RwLock::new(store),
            config,
            namespaces: RwLock::new(vec![NS0_URI.to_string(), application_uri.to_string()]),
            contexts: ContextRegistry::new(),
            history: RwLock::new(None),
            deferred: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &AddressSpaceConfig {
        &self.config
    }

    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    /// Register a context in this space's side-table.
    pub fn register_context(&self, context: Arc<dyn NodeContext>) -> ContextHandle {
        self.contexts.register(context)
    }

    pub fn set_history_backend(&self, backend: Arc<dyn HistoryBackend>) {
        *self.history.write() = Some(backend);
    }

    pub fn history(&self) -> Option<Arc<dyn HistoryBackend>> {
        self.history.read().clone()
    }

    /// Run `f` against the store under the shared lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&NodeStore) -> R) -> R {
        f(&self.store.read())
    }

    // ========================================================================
    // Namespaces
    // ========================================================================

    /// Index of `uri`, adding it if unknown.
    pub fn add_namespace(&self, uri: &str) -> u16 {
        let mut namespaces = self.namespaces.write();
        if let Some(i) = namespaces.iter().position(|n| n == uri) {
            return i as u16;
        }
        namespaces.push(uri.to_string());
        debug!(uri, index = namespaces.len() - 1, "namespace added");
        (namespaces.len() - 1) as u16
    }

    pub fn namespace_index(&self, uri: &str) -> Option<u16> {
        self.namespaces.read().iter().position(|n| n == uri).map(|i| i as u16)
    }

    pub fn namespace_uri(&self, index: u16) -> Option<String> {
        self.namespaces.read().get(index as usize).cloned()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.read().clone()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn node_count(&self) -> usize {
        self.store.read().len()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.store.read().contains(node)
    }

    /// Snapshot of a node.
    pub fn node(&self, node: &NodeId) -> Option<Node> {
        self.store.read().node(node).cloned()
    }

    pub fn node_class(&self, node: &NodeId) -> Option<NodeClass> {
        self.store.read().node(node).map(Node::node_class)
    }

    /// Reflexive subtype test over HasSubtype.
    pub fn is_subtype_of(&self, subtype: &NodeId, supertype: &NodeId) -> bool {
        self.store.read().is_subtype_of(subtype, supertype)
    }

    pub fn type_definition(&self, node: &NodeId) -> Option<NodeId> {
        self.store.read().type_definition(node).cloned()
    }

    // ========================================================================
    // Add / delete nodes
    // ========================================================================

    pub fn add_node(&self, request: AddNodeRequest) -> Result<NodeId> {
        if request.attributes.node_class() != request.node_class {
            return Err(Error::InvalidAttributes(format!(
                "attributes describe a {:?}, request says {:?}",
                request.attributes.node_class(),
                request.node_class
            )));
        }
        if request.browse_name.name.is_empty() {
            return Err(Error::InvalidAttributes("browse name must not be empty".into()));
        }

        let node_id = {
            let mut store = self.store.write();
            if !store.contains(&request.parent) {
                return Err(Error::InvalidParent(request.parent));
            }
            if !store.is_reference_type(&request.reference_type) {
                return Err(Error::InvalidAttributes(format!(
                    "{} is not a reference type",
                    request.reference_type
                )));
            }
            if let Some(td) = &request.type_definition {
                let valid = store
                    .node(td)
                    .is_some_and(|n| matches!(n.node_class(), NodeClass::ObjectType | NodeClass::VariableType));
                if !valid {
                    return Err(Error::InvalidAttributes(format!("invalid type definition {td}")));
                }
            }
            if let NodeAttributes::Variable(v) = &request.attributes {
                attributes::check_value(&store, &v.data_type, v.value_rank, &v.value.value)?;
            }

            let node_id = if request.requested_id.is_null() {
                store.generate_id(self.config.default_namespace)
            } else if store.contains(&request.requested_id) {
                return Err(Error::DuplicateId(request.requested_id));
            } else {
                request.requested_id.clone()
            };

            let mut node = Node::new(node_id.clone(), request.browse_name.clone(), request.attributes.clone());
            if let Some(display_name) = &request.display_name {
                node.display_name = display_name.clone();
            }
            if let Some(description) = &request.description {
                node.description = description.clone();
            }
            node.write_mask = request.write_mask;
            node.context = request.context;
            store.insert(node)?;

            let parent_ref = Reference::forward(request.parent.clone(), request.reference_type.clone(), node_id.clone());
            store.insert_reference(&parent_ref)?;
            if let Some(td) = &request.type_definition {
                store.insert_reference(&Reference::forward(node_id.clone(), ids::HAS_TYPE_DEFINITION, td.clone()))?;
            }
            node_id
        };
        debug!(node = %node_id, parent = %request.parent, name = %request.browse_name, "node added");

        if let Some(context) = request.context.and_then(|h| self.contexts.get(h)) {
            if let Err(e) = self.call_hook(|| context.construct(self, &node_id)) {
                warn!(node = %node_id, error = %e, "construct hook failed, removing node");
                self.remove_quietly(&node_id);
                return Err(e);
            }
        }

        if let NodeAttributes::Variable(v) = &request.attributes {
            if v.historizing {
                if let Some(history) = self.history() {
                    history.register_node(&node_id, None);
                }
            }
        }
        Ok(node_id)
    }

    /// Per-element results; one failure never aborts the batch.
    pub fn add_nodes(&self, requests: Vec<AddNodeRequest>) -> Vec<Result<NodeId>> {
        requests.into_iter().map(|r| self.add_node(r)).collect()
    }

    /// Remove a node and every entry pointing at it, without hooks.
    fn remove_quietly(&self, node: &NodeId) {
        let mut store = self.store.write();
        if let Some(entry) = store.remove(node) {
            for e in &entry.refs {
                store.remove_mirror(&e.target, &e.reference_type, node, !e.is_forward);
            }
        }
    }

    /// Delete `node` and its hierarchical descendants; returns how many
    /// nodes were removed (0 when the call was queued from a hook).
    ///
    /// A descendant with another hierarchical parent outside the deletion
    /// set survives. Hierarchical references held by surviving nodes are
    /// always cleaned; non-hierarchical ones only with `delete_references`.
    pub fn delete_node(&self, node: &NodeId, delete_references: bool) -> Result<usize> {
        if in_hook() {
            self.defer(Deferred::DeleteNode { node: node.clone(), delete_references });
            return Ok(0);
        }

        let removed = {
            let mut store = self.store.write();
            if !store.contains(node) {
                return Err(Error::NodeNotFound(node.clone()));
            }
            let doomed = self.deletion_set(&store, node);

            // Decide mirror cleanup before any slot disappears, since the
            // reference type nodes could be among the doomed.
            let mut cleanup = Vec::new();
            for id in &doomed {
                for e in store.refs(id) {
                    if doomed.contains(&e.target) {
                        continue;
                    }
                    if delete_references || store.is_hierarchical(&e.reference_type) {
                        cleanup.push((e.target.clone(), e.reference_type.clone(), id.clone(), !e.is_forward));
                    }
                }
            }
            for (owner, reference_type, target, is_forward) in cleanup {
                store.remove_mirror(&owner, &reference_type, &target, is_forward);
            }

            let mut removed = Vec::with_capacity(doomed.len());
            for id in doomed {
                if let Some(entry) = store.remove(&id) {
                    removed.push((id, entry.node.context));
                }
            }
            removed
        };
        debug!(node = %node, removed = removed.len(), delete_references, "node deleted");

        let count = removed.len();
        for (id, handle) in removed {
            if let Some(context) = handle.and_then(|h| self.contexts.get(h)) {
                self.call_hook(|| context.destruct(self, &id));
            }
        }
        Ok(count)
    }

    /// `root` plus every node reachable through the configured hierarchical
    /// reference types that has no surviving parent.
    fn deletion_set(&self, store: &NodeStore, root: &NodeId) -> Vec<NodeId> {
        let cascades = |t: &NodeId| self.config.hierarchical_delete_types.contains(t);

        let mut order = vec![root.clone()];
        let mut set: HashSet<NodeId> = HashSet::from_iter([root.clone()]);
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(current) = queue.pop_front() {
            for e in store.refs(&current) {
                if e.is_forward && cascades(&e.reference_type) && store.contains(&e.target) && set.insert(e.target.clone()) {
                    order.push(e.target.clone());
                    queue.push_back(e.target.clone());
                }
            }
        }

        // Release survivors until stable: releasing one can give its own
        // children a parent outside the set.
        loop {
            let survivor = order.iter().skip(1).position(|id| {
                store.refs(id).iter().any(|e| {
                    !e.is_forward
                        && cascades(&e.reference_type)
                        && !set.contains(&e.target)
                        && store.contains(&e.target)
                })
            });
            match survivor {
                Some(i) => {
                    let id = order.remove(i + 1);
                    set.remove(&id);
                }
                None => break,
            }
        }
        order
    }

    // ========================================================================
    // References
    // ========================================================================

    pub fn add_reference(&self, source: &NodeId, reference_type: &NodeId, target: &NodeId, is_forward: bool) -> Result<()> {
        let reference = Reference {
            source: source.clone(),
            reference_type: reference_type.clone(),
            target: target.clone(),
            is_forward,
        };
        if in_hook() {
            self.defer(Deferred::AddReference(reference));
            return Ok(());
        }
        self.insert_reference(&reference)
    }

    fn insert_reference(&self, reference: &Reference) -> Result<()> {
        let mut store = self.store.write();
        if !store.is_reference_type(&reference.reference_type) {
            return Err(Error::InvalidArgument(format!("{} is not a reference type", reference.reference_type)));
        }
        store.insert_reference(reference)
    }

    /// `delete_bidirectional = false` removes only the source-side entry.
    pub fn delete_reference(
        &self,
        source: &NodeId,
        reference_type: &NodeId,
        target: &NodeId,
        is_forward: bool,
        delete_bidirectional: bool,
    ) -> Result<()> {
        let reference = Reference {
            source: source.clone(),
            reference_type: reference_type.clone(),
            target: target.clone(),
            is_forward,
        };
        if in_hook() {
            self.defer(Deferred::DeleteReference { reference, bidirectional: delete_bidirectional });
            return Ok(());
        }
        self.store.write().remove_reference(&reference, delete_bidirectional)
    }

    // ========================================================================
    // Hooks and deferred work
    // ========================================================================

    /// Run a context hook with re-entrant mutations queued; drains the queue
    /// once the outermost hook returns.
    fn call_hook<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = {
            let _scope = HookScope::enter();
            f()
        };
        if !in_hook() {
            self.apply_deferred();
        }
        result
    }

    fn defer(&self, op: Deferred) {
        debug!(?op, "mutation deferred");
        self.deferred.lock().push_back(op);
    }

    pub fn pending_deferred(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Apply queued mutations; returns how many ran. A no-op inside a hook.
    pub fn apply_deferred(&self) -> usize {
        if in_hook() {
            return 0;
        }
        let mut applied = 0;
        loop {
            let Some(op) = self.deferred.lock().pop_front() else {
                break;
            };
            let result = match op {
                Deferred::Write { node, attribute, value, check_access } => {
                    self.write_inner(&node, attribute, value, check_access)
                }
                Deferred::AddReference(reference) => self.insert_reference(&reference),
                Deferred::DeleteReference { reference, bidirectional } => {
                    self.store.write().remove_reference(&reference, bidirectional)
                }
                Deferred::DeleteNode { node, delete_references } => {
                    self.delete_node(&node, delete_references).map(|_| ())
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "deferred mutation failed");
            }
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{VariableAttributes, Variant};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn folder(space: &AddressSpace, parent: &NodeId, id: u32, name: &str) -> NodeId {
        space
            .add_node(
                AddNodeRequest::new(parent.clone(), ids::ORGANIZES, QualifiedName::new(1, name), NodeAttributes::object())
                    .with_id(NodeId::numeric(1, id))
                    .with_type_definition(ids::FOLDER_TYPE),
            )
            .unwrap()
    }

    #[test]
    fn test_generated_ids_are_fresh() {
        let space = AddressSpace::default();
        let a = space
            .add_node(AddNodeRequest::new(NodeId::OBJECTS, ids::ORGANIZES, "1:A", NodeAttributes::object()))
            .unwrap();
        let b = space
            .add_node(AddNodeRequest::new(NodeId::OBJECTS, ids::ORGANIZES, "1:B", NodeAttributes::object()))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(a.namespace, 1);
    }

    #[test]
    fn test_add_node_validation() {
        let space = AddressSpace::default();
        let missing = AddNodeRequest::new(NodeId::numeric(1, 999_999), ids::ORGANIZES, "1:X", NodeAttributes::object());
        assert!(matches!(space.add_node(missing), Err(Error::InvalidParent(_))));

        let mut wrong_class = AddNodeRequest::new(NodeId::OBJECTS, ids::ORGANIZES, "1:X", NodeAttributes::object());
        wrong_class.node_class = NodeClass::Variable;
        assert!(matches!(space.add_node(wrong_class), Err(Error::InvalidAttributes(_))));

        let not_a_ref_type = AddNodeRequest::new(NodeId::OBJECTS, ids::SERVER, "1:X", NodeAttributes::object());
        assert!(matches!(space.add_node(not_a_ref_type), Err(Error::InvalidAttributes(_))));
    }

    #[test]
    fn test_duplicate_id_keeps_count() {
        let space = AddressSpace::default();
        folder(&space, &NodeId::OBJECTS, 10, "A");
        let before = space.node_count();
        let again = AddNodeRequest::new(NodeId::OBJECTS, ids::ORGANIZES, "1:B", NodeAttributes::object())
            .with_id(NodeId::numeric(1, 10));
        assert!(matches!(space.add_node(again), Err(Error::DuplicateId(_))));
        assert_eq!(space.node_count(), before);
    }

    #[test]
    fn test_delete_cascades_and_spares_shared_children() {
        let space = AddressSpace::default();
        let a = folder(&space, &NodeId::OBJECTS, 1, "A");
        let b = folder(&space, &a, 2, "B");
        let c = folder(&space, &b, 3, "C");
        let other = folder(&space, &NodeId::OBJECTS, 4, "Other");
        space.add_reference(&other, &ids::ORGANIZES, &b, true).unwrap();

        assert_eq!(space.delete_node(&a, true).unwrap(), 1);
        assert!(!space.contains(&a));
        assert!(space.contains(&b));
        assert!(space.contains(&c));
        // the surviving child lost its link to the deleted parent
        assert!(!space.with_store(|s| s.refs(&b).iter().any(|e| e.target == a)));
    }

    #[test]
    fn test_delete_references_flag() {
        let space = AddressSpace::default();
        let a = folder(&space, &NodeId::OBJECTS, 1, "A");
        let b = folder(&space, &NodeId::OBJECTS, 2, "B");
        space.add_reference(&a, &ids::HAS_EVENT_SOURCE, &b, true).unwrap();
        space.add_reference(&b, &ids::HAS_MODELLING_RULE, &a, true).unwrap();

        space.delete_node(&a, false).unwrap();
        // hierarchical mirror gone, non-hierarchical one dangles
        let refs = space.with_store(|s| s.refs(&b).to_vec());
        assert!(!refs.iter().any(|e| e.reference_type == ids::HAS_EVENT_SOURCE));
        assert!(refs.iter().any(|e| e.reference_type == ids::HAS_MODELLING_RULE && e.target == a));
    }

    #[test]
    fn test_namespaces() {
        let space = AddressSpace::default();
        assert_eq!(space.namespace_index(NS0_URI), Some(0));
        let idx = space.add_namespace("urn:plant");
        assert_eq!(idx, 2);
        assert_eq!(space.add_namespace("urn:plant"), 2);
        assert_eq!(space.namespace_uri(2).as_deref(), Some("urn:plant"));
    }

    struct Counting {
        constructed: AtomicUsize,
        destructed: AtomicUsize,
        fail: bool,
    }

    impl NodeContext for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn construct(&self, space: &AddressSpace, node: &NodeId) -> Result<()> {
            self.constructed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::ContextFailure("refused".into()));
            }
            // re-entrant write, applied after this hook returns
            space.set_value(node, Variant::from(7i32))?;
            Ok(())
        }

        fn destruct(&self, _space: &AddressSpace, _node: &NodeId) {
            self.destructed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_construct_hook_and_deferred_write() {
        let space = AddressSpace::default();
        let ctx = Arc::new(Counting { constructed: AtomicUsize::new(0), destructed: AtomicUsize::new(0), fail: false });
        let handle = space.register_context(ctx.clone());
        let id = space
            .add_node(
                AddNodeRequest::new(NodeId::OBJECTS, ids::HAS_COMPONENT, "1:V", NodeAttributes::Variable(VariableAttributes::new(0i32)))
                    .with_context(handle),
            )
            .unwrap();
        assert_eq!(ctx.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(space.pending_deferred(), 0);
        assert_eq!(space.read_attribute(&id, AttributeId::Value).unwrap().value, Variant::Int32(7));

        space.delete_node(&id, true).unwrap();
        assert_eq!(ctx.destructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_construct_removes_node() {
        let space = AddressSpace::default();
        let before = space.node_count();
        let handle = space.register_context(Arc::new(Counting {
            constructed: AtomicUsize::new(0),
            destructed: AtomicUsize::new(0),
            fail: true,
        }));
        let result = space.add_node(
            AddNodeRequest::new(NodeId::OBJECTS, ids::ORGANIZES, "1:F", NodeAttributes::object()).with_context(handle),
        );
        assert!(matches!(result, Err(Error::ContextFailure(_))));
        assert_eq!(space.node_count(), before);
        assert!(!space.with_store(|s| s.refs(&NodeId::OBJECTS).iter().any(|e| e.reference_type == ids::ORGANIZES && !s.contains(&e.target))));
    }
}
