//! Arena node storage.
//!
//! Nodes live in a slot vector addressed by [`NodeHandle`] (index plus
//! generation, so a handle to a deleted node never resolves to its slot's
//! next occupant). A `NodeId → handle` index serves lookups by id. Each
//! slot keeps one adjacency list holding both directions in insertion
//! order: forward entries for references the node is the source of,
//! inverse entries for references pointing at it.
//!
//! The store has no locking of its own; [`AddressSpace`](super::AddressSpace)
//! wraps it in a single `RwLock`.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::model::{ids, Node, NodeClass, NodeId, Reference};
use crate::{Error, Result};

/// Stable handle to a node slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

/// One adjacency entry, seen from the node that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub reference_type: NodeId,
    pub target: NodeId,
    pub is_forward: bool,
}

pub(crate) type Adjacency = SmallVec<[RefEntry; 4]>;

#[derive(Debug)]
pub(crate) struct Entry {
    pub node: Node,
    pub refs: Adjacency,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug)]
pub struct NodeStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<NodeId, NodeHandle>,
    next_generated: u32,
}

impl NodeStore {
    pub fn new(first_generated_id: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            next_generated: first_generated_id,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn handle(&self, id: &NodeId) -> Option<NodeHandle> {
        self.index.get(id).copied()
    }

    pub(crate) fn entry_by_handle(&self, handle: NodeHandle) -> Option<&Entry> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub(crate) fn entry(&self, id: &NodeId) -> Option<&Entry> {
        self.entry_by_handle(self.handle(id)?)
    }

    fn entry_mut(&mut self, id: &NodeId) -> Option<&mut Entry> {
        let handle = self.handle(id)?;
        let slot = self.slots.get_mut(handle.index as usize)?;
        slot.entry.as_mut()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.entry(id).map(|e| &e.node)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.entry_mut(id).map(|e| &mut e.node)
    }

    /// Adjacency list of a node; empty if the node does not exist.
    pub fn refs(&self, id: &NodeId) -> &[RefEntry] {
        self.entry(id).map(|e| e.refs.as_slice()).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Node, &[RefEntry])> {
        self.slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .map(|e| (&e.node, e.refs.as_slice()))
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn insert(&mut self, node: Node) -> Result<NodeHandle> {
        if self.index.contains_key(&node.node_id) {
            return Err(Error::DuplicateId(node.node_id));
        }
        let id = node.node_id.clone();
        let entry = Entry { node, refs: SmallVec::new() };
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.entry = Some(entry);
                NodeHandle { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, entry: Some(entry) });
                NodeHandle { index, generation: 0 }
            }
        };
        self.index.insert(id, handle);
        Ok(handle)
    }

    /// Remove a node with its own adjacency list. Entries on other nodes
    /// pointing at it are left alone.
    pub(crate) fn remove(&mut self, id: &NodeId) -> Option<Entry> {
        let handle = self.index.remove(id)?;
        let slot = self.slots.get_mut(handle.index as usize)?;
        let entry = slot.entry.take();
        self.free.push(handle.index);
        entry
    }

    pub fn has_reference(&self, reference: &Reference) -> bool {
        self.refs(&reference.source).iter().any(|e| {
            e.reference_type == reference.reference_type
                && e.target == reference.target
                && e.is_forward == reference.is_forward
        })
    }

    /// Insert the entry on the source and its mirror on the target. Both
    /// endpoints are checked before anything changes.
    pub fn insert_reference(&mut self, reference: &Reference) -> Result<()> {
        if !self.contains(&reference.source) {
            return Err(Error::NodeNotFound(reference.source.clone()));
        }
        if !self.contains(&reference.target) {
            return Err(Error::NodeNotFound(reference.target.clone()));
        }
        if self.has_reference(reference) {
            return Err(Error::DuplicateReference(describe(reference)));
        }
        if let Some(source) = self.entry_mut(&reference.source) {
            source.refs.push(RefEntry {
                reference_type: reference.reference_type.clone(),
                target: reference.target.clone(),
                is_forward: reference.is_forward,
            });
        }
        if let Some(target) = self.entry_mut(&reference.target) {
            target.refs.push(RefEntry {
                reference_type: reference.reference_type.clone(),
                target: reference.source.clone(),
                is_forward: !reference.is_forward,
            });
        }
        Ok(())
    }

    /// Remove the source-side entry and, when `bidirectional`, the mirror on
    /// the target (which may already be gone).
    pub fn remove_reference(&mut self, reference: &Reference, bidirectional: bool) -> Result<()> {
        let source = self
            .entry_mut(&reference.source)
            .ok_or_else(|| Error::NodeNotFound(reference.source.clone()))?;
        let before = source.refs.len();
        source.refs.retain(|e| {
            !(e.reference_type == reference.reference_type
                && e.target == reference.target
                && e.is_forward == reference.is_forward)
        });
        if source.refs.len() == before {
            return Err(Error::ReferenceNotFound(describe(reference)));
        }
        if bidirectional {
            self.remove_mirror(&reference.target, &reference.reference_type, &reference.source, !reference.is_forward);
        }
        Ok(())
    }

    /// Drop entries on `owner` matching the given edge; no error if absent.
    pub(crate) fn remove_mirror(&mut self, owner: &NodeId, reference_type: &NodeId, target: &NodeId, is_forward: bool) {
        if let Some(entry) = self.entry_mut(owner) {
            entry.refs.retain(|e| {
                !(e.reference_type == *reference_type && e.target == *target && e.is_forward == is_forward)
            });
        }
    }

    /// A fresh numeric id in `namespace`, skipping ids already taken.
    pub fn generate_id(&mut self, namespace: u16) -> NodeId {
        loop {
            let candidate = NodeId::numeric(namespace, self.next_generated);
            self.next_generated = self.next_generated.wrapping_add(1).max(1);
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }

    // ========================================================================
    // Type hierarchy
    // ========================================================================

    /// Direct supertype via the inverse HasSubtype entry.
    pub fn supertype(&self, id: &NodeId) -> Option<&NodeId> {
        self.refs(id)
            .iter()
            .find(|e| !e.is_forward && e.reference_type == ids::HAS_SUBTYPE)
            .map(|e| &e.target)
    }

    /// Reflexive: every type is a subtype of itself.
    pub fn is_subtype_of(&self, subtype: &NodeId, supertype: &NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut current = subtype;
        loop {
            if current == supertype {
                return true;
            }
            if !seen.insert(current) {
                return false;
            }
            match self.supertype(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub fn is_hierarchical(&self, reference_type: &NodeId) -> bool {
        self.is_subtype_of(reference_type, &ids::HIERARCHICAL_REFERENCES)
    }

    pub fn is_reference_type(&self, id: &NodeId) -> bool {
        self.node(id).is_some_and(|n| n.node_class() == NodeClass::ReferenceType)
    }

    pub fn type_definition(&self, id: &NodeId) -> Option<&NodeId> {
        self.refs(id)
            .iter()
            .find(|e| e.is_forward && e.reference_type == ids::HAS_TYPE_DEFINITION)
            .map(|e| &e.target)
    }

    /// Forward hierarchical children in adjacency order.
    pub fn children(&self, id: &NodeId) -> Vec<(NodeId, NodeId)> {
        self.refs(id)
            .iter()
            .filter(|e| e.is_forward && self.is_hierarchical(&e.reference_type))
            .map(|e| (e.reference_type.clone(), e.target.clone()))
            .collect()
    }

    pub fn modelling_rule(&self, id: &NodeId) -> Option<&NodeId> {
        self.refs(id)
            .iter()
            .find(|e| e.is_forward && e.reference_type == ids::HAS_MODELLING_RULE)
            .map(|e| &e.target)
    }
}

fn describe(r: &Reference) -> String {
    let arrow = if r.is_forward { "->" } else { "<-" };
    format!("{} {arrow}[{}] {}", r.source, r.reference_type, r.target)
}
