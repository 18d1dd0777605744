//! Typed edges between nodes.

use serde::{Deserialize, Serialize};

use super::{LocalizedText, NodeClass, NodeId, QualifiedName};

/// Which side of a reference a browse follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BrowseDirection {
    #[default]
    Forward,
    Inverse,
    Both,
}

impl BrowseDirection {
    pub fn matches(self, is_forward: bool) -> bool {
        match self {
            BrowseDirection::Forward => is_forward,
            BrowseDirection::Inverse => !is_forward,
            BrowseDirection::Both => true,
        }
    }
}

/// A directed, typed edge as seen from `source`.
///
/// The store keeps one entry per endpoint: the forward entry on the source
/// and the inverse entry on the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub source: NodeId,
    pub reference_type: NodeId,
    pub target: NodeId,
    pub is_forward: bool,
}

impl Reference {
    pub fn forward(source: NodeId, reference_type: NodeId, target: NodeId) -> Self {
        Self { source, reference_type, target, is_forward: true }
    }
}

/// One browse result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDescription {
    pub reference_type: NodeId,
    pub is_forward: bool,
    pub node_id: NodeId,
    /// Target metadata; `None` when the target no longer exists.
    pub browse_name: Option<QualifiedName>,
    pub display_name: Option<LocalizedText>,
    pub node_class: Option<NodeClass>,
    pub type_definition: Option<NodeId>,
}

/// What a browse should return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseDescription {
    /// Reference type filter; `None` accepts every type.
    pub reference_type: Option<NodeId>,
    pub include_subtypes: bool,
    pub direction: BrowseDirection,
    /// Bit mask of [`NodeClass`] values; 0 accepts every class.
    pub node_class_mask: u32,
}

impl Default for BrowseDescription {
    fn default() -> Self {
        Self {
            reference_type: None,
            include_subtypes: true,
            direction: BrowseDirection::Forward,
            node_class_mask: 0,
        }
    }
}

impl BrowseDescription {
    pub fn forward(reference_type: NodeId) -> Self {
        Self { reference_type: Some(reference_type), ..Default::default() }
    }

    pub fn inverse(reference_type: NodeId) -> Self {
        Self {
            reference_type: Some(reference_type),
            direction: BrowseDirection::Inverse,
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self { direction: BrowseDirection::Both, ..Default::default() }
    }

    pub fn with_class_mask(mut self, mask: u32) -> Self {
        self.node_class_mask = mask;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_matches() {
        assert!(BrowseDirection::Forward.matches(true));
        assert!(!BrowseDirection::Forward.matches(false));
        assert!(BrowseDirection::Inverse.matches(false));
        assert!(BrowseDirection::Both.matches(false));
    }
}
