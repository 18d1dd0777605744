//! Builders for the common node shapes.

use crate::model::{
    access_level, ids, AttributeId, BuiltinType, ContextHandle, NodeAttributes, NodeId,
    QualifiedName, VariableAttributes, Variant,
};
use crate::{Error, Result};

use super::{AddNodeRequest, AddressSpace};

impl AddressSpace {
    /// Folder organized by `parent`.
    pub fn add_folder(&self, parent: &NodeId, name: &str, namespace: u16) -> Result<NodeId> {
        self.add_node(
            AddNodeRequest::new(parent.clone(), ids::ORGANIZES, QualifiedName::new(namespace, name), NodeAttributes::object())
                .with_type_definition(ids::FOLDER_TYPE),
        )
    }

    /// Read/write data variable component of `parent`.
    pub fn add_variable(&self, parent: &NodeId, name: &str, value: impl Into<Variant>, namespace: u16) -> Result<NodeId> {
        self.add_variable_with(parent, name, VariableAttributes::new(value), namespace)
    }

    /// Data variable with explicit attributes.
    pub fn add_variable_with(
        &self,
        parent: &NodeId,
        name: &str,
        attributes: VariableAttributes,
        namespace: u16,
    ) -> Result<NodeId> {
        self.add_node(
            AddNodeRequest::new(
                parent.clone(),
                ids::HAS_COMPONENT,
                QualifiedName::new(namespace, name),
                NodeAttributes::Variable(attributes),
            )
            .with_type_definition(ids::BASE_DATA_VARIABLE_TYPE),
        )
    }

    /// Variable whose live writes are recorded by the historian.
    pub fn add_historical_variable(&self, parent: &NodeId, name: &str, value: impl Into<Variant>, namespace: u16) -> Result<NodeId> {
        self.add_variable_with(parent, name, VariableAttributes::new(value).historizing(), namespace)
    }

    pub fn add_property(&self, parent: &NodeId, name: &str, value: impl Into<Variant>, namespace: u16) -> Result<NodeId> {
        self.add_node(
            AddNodeRequest::new(
                parent.clone(),
                ids::HAS_PROPERTY,
                QualifiedName::new(namespace, name),
                NodeAttributes::Variable(VariableAttributes::new(value)),
            )
            .with_type_definition(ids::PROPERTY_TYPE),
        )
    }

    /// Variable served by `context`'s `read_data`/`write_data`.
    pub fn add_data_source_variable(
        &self,
        parent: &NodeId,
        name: &str,
        data_type: BuiltinType,
        context: ContextHandle,
        namespace: u16,
    ) -> Result<NodeId> {
        let attrs = VariableAttributes::new(Variant::Empty)
            .with_data_type(data_type.data_type_id())
            .with_data_source();
        self.add_node(
            AddNodeRequest::new(
                parent.clone(),
                ids::HAS_COMPONENT,
                QualifiedName::new(namespace, name),
                NodeAttributes::Variable(attrs),
            )
            .with_type_definition(ids::BASE_DATA_VARIABLE_TYPE)
            .with_context(context),
        )
    }

    /// Walk `path` below `start`, creating missing folders; returns the last.
    pub fn create_folder_path(&self, start: &NodeId, path: &[&str], namespace: u16) -> Result<NodeId> {
        let mut current = start.clone();
        for segment in path {
            let name = QualifiedName::new(namespace, *segment);
            current = match self.get_child(&current, &name) {
                Some(existing) => existing,
                None => self.add_folder(&current, segment, namespace)?,
            };
        }
        Ok(current)
    }

    pub fn node_id_from_path(&self, start: &NodeId, path: &[QualifiedName]) -> Option<NodeId> {
        self.translate_browse_path(start, path).node_id().cloned()
    }

    /// First hierarchical child of `start` named `name`.
    pub fn get_child(&self, start: &NodeId, name: &QualifiedName) -> Option<NodeId> {
        self.with_store(|s| {
            s.children(start)
                .into_iter()
                .map(|(_, target)| target)
                .find(|t| s.node(t).is_some_and(|n| n.browse_name == *name))
        })
    }

    /// Hierarchical children of `node` in insertion order.
    pub fn children(&self, node: &NodeId) -> Result<Vec<NodeId>> {
        self.with_store(|s| {
            if !s.contains(node) {
                return Err(Error::NodeNotFound(node.clone()));
            }
            Ok(s.children(node).into_iter().map(|(_, t)| t).collect())
        })
    }

    /// Drop CurrentWrite; keep or grant HistoryRead per `history`.
    pub fn set_read_only(&self, node: &NodeId, history: bool) -> Result<()> {
        let mut level = access_level::CURRENT_READ;
        if history {
            level |= access_level::HISTORY_READ;
        }
        self.set_attribute(node, AttributeId::AccessLevel, Variant::Byte(level))
    }

    /// Attach the Mandatory modelling rule, making the node part of its
    /// type's instance declaration.
    pub fn mark_mandatory(&self, node: &NodeId) -> Result<()> {
        self.add_reference(node, &ids::HAS_MODELLING_RULE, &ids::MODELLING_RULE_MANDATORY, true)
    }
}
