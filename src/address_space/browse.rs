//! Browse and browse-path translation.

use serde::{Deserialize, Serialize};

use crate::model::{BrowseDescription, NodeId, QualifiedName, ReferenceDescription, StatusCode};
use crate::{Error, Result};

use super::{AddressSpace, NodeHandle, NodeStore, RefEntry};

/// Lazy browse over one node's adjacency list.
///
/// Each `next()` takes the shared lock briefly, so the iterator can be held
/// across other address-space calls. Rows come in the node's insertion
/// order; [`BrowseIter::restart`] rewinds. If the node is deleted the
/// iterator ends.
pub struct BrowseIter<'a> {
    space: &'a AddressSpace,
    handle: NodeHandle,
    description: BrowseDescription,
    position: usize,
}

impl<'a> BrowseIter<'a> {
    pub fn restart(&mut self) {
        self.position = 0;
    }

    /// Skip the first `n` adjacency entries; used to resume paged browses.
    pub fn resume_at(&mut self, position: usize) {
        self.position = position;
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

fn matches(store: &NodeStore, description: &BrowseDescription, entry: &RefEntry) -> bool {
    if !description.direction.matches(entry.is_forward) {
        return false;
    }
    if let Some(filter) = &description.reference_type {
        let ok = if description.include_subtypes {
            store.is_subtype_of(&entry.reference_type, filter)
        } else {
            entry.reference_type == *filter
        };
        if !ok {
            return false;
        }
    }
    if description.node_class_mask != 0 {
        return store
            .node(&entry.target)
            .is_some_and(|n| n.node_class().matches_mask(description.node_class_mask));
    }
    true
}

fn describe(store: &NodeStore, entry: &RefEntry) -> ReferenceDescription {
    let target = store.node(&entry.target);
    ReferenceDescription {
        reference_type: entry.reference_type.clone(),
        is_forward: entry.is_forward,
        node_id: entry.target.clone(),
        browse_name: target.map(|n| n.browse_name.clone()),
        display_name: target.map(|n| n.display_name.clone()),
        node_class: target.map(|n| n.node_class()),
        type_definition: store.type_definition(&entry.target).cloned(),
    }
}

impl Iterator for BrowseIter<'_> {
    type Item = ReferenceDescription;

    fn next(&mut self) -> Option<ReferenceDescription> {
        let store = self.space.store.read();
        let entry = store.entry_by_handle(self.handle)?;
        while let Some(e) = entry.refs.get(self.position) {
            self.position += 1;
            if matches(&store, &self.description, e) {
                return Some(describe(&store, e));
            }
        }
        None
    }
}

/// One resolved (or partially resolved) browse-path target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowsePathTarget {
    pub node_id: NodeId,
    /// `u32::MAX` when the whole path matched, else the index of the first
    /// segment that did not.
    pub remaining_path_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowsePathResult {
    pub status: StatusCode,
    pub targets: Vec<BrowsePathTarget>,
}

impl BrowsePathResult {
    /// First target of a complete match.
    pub fn node_id(&self) -> Option<&NodeId> {
        if self.status.is_good() {
            self.targets.first().map(|t| &t.node_id)
        } else {
            None
        }
    }
}

impl AddressSpace {
    pub fn browse(&self, node: &NodeId, description: BrowseDescription) -> Result<BrowseIter<'_>> {
        let handle = self
            .store
            .read()
            .handle(node)
            .ok_or_else(|| Error::NodeNotFound(node.clone()))?;
        Ok(BrowseIter { space: self, handle, description, position: 0 })
    }

    /// Resolve `path` from `origin` along forward hierarchical references.
    pub fn translate_browse_path(&self, origin: &NodeId, path: &[QualifiedName]) -> BrowsePathResult {
        let store = self.store.read();
        if !store.contains(origin) {
            return BrowsePathResult { status: StatusCode::BAD_NODE_ID_UNKNOWN, targets: Vec::new() };
        }
        if path.is_empty() {
            return BrowsePathResult { status: StatusCode::BAD_NOTHING_TO_DO, targets: Vec::new() };
        }

        let mut current = vec![origin.clone()];
        for (k, segment) in path.iter().enumerate() {
            let mut next: Vec<NodeId> = Vec::new();
            for id in &current {
                for e in store.refs(id) {
                    if !e.is_forward || !store.is_hierarchical(&e.reference_type) || next.contains(&e.target) {
                        continue;
                    }
                    if store.node(&e.target).is_some_and(|n| n.browse_name == *segment) {
                        next.push(e.target.clone());
                    }
                }
            }
            if next.is_empty() {
                let targets = current
                    .into_iter()
                    .map(|node_id| BrowsePathTarget { node_id, remaining_path_index: k as u32 })
                    .collect();
                return BrowsePathResult { status: StatusCode::BAD_NO_MATCH, targets };
            }
            current = next;
        }

        let targets = current
            .into_iter()
            .map(|node_id| BrowsePathTarget { node_id, remaining_path_index: u32::MAX })
            .collect();
        BrowsePathResult { status: StatusCode::GOOD, targets }
    }
}
