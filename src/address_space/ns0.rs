//! Namespace 0 bootstrap: the standard folders, reference types, data types
//! and base types every address space starts with.

use crate::model::{
    ids, value_rank, BuiltinType, LocalizedText, Node, NodeAttributes, NodeId, ObjectAttributes,
    QualifiedName, Reference, ReferenceTypeAttributes, TypeAttributes, VariableAttributes,
    VariableTypeAttributes, Variant, EVENT_NOTIFIER_SUBSCRIBE,
};
use crate::Result;

use super::store::NodeStore;

pub const NS0_URI: &str = "http://opcfoundation.org/UA/";

struct Builder<'a> {
    store: &'a mut NodeStore,
}

impl Builder<'_> {
    fn node(&mut self, id: NodeId, name: &str, attributes: NodeAttributes) -> Result<()> {
        self.store.insert(Node::new(id, QualifiedName::new(0, name), attributes))?;
        Ok(())
    }

    fn link(&mut self, source: &NodeId, reference_type: NodeId, target: &NodeId) -> Result<()> {
        self.store.insert_reference(&Reference::forward(source.clone(), reference_type, target.clone()))
    }

    fn folder(&mut self, id: NodeId, name: &str, parent: Option<&NodeId>) -> Result<()> {
        self.node(id.clone(), name, NodeAttributes::object())?;
        self.link(&id, ids::HAS_TYPE_DEFINITION, &ids::FOLDER_TYPE)?;
        if let Some(parent) = parent {
            self.link(parent, ids::ORGANIZES, &id)?;
        }
        Ok(())
    }

    fn reference_type(&mut self, id: NodeId, name: &str, inverse: Option<&str>, is_abstract: bool, parent: &NodeId) -> Result<()> {
        let attrs = ReferenceTypeAttributes {
            is_abstract,
            symmetric: inverse.is_none(),
            inverse_name: inverse.map(LocalizedText::from),
        };
        self.node(id.clone(), name, NodeAttributes::ReferenceType(attrs))?;
        self.link(parent, ids::HAS_SUBTYPE, &id)
    }

    fn data_type(&mut self, id: NodeId, name: &str, is_abstract: bool, parent: &NodeId) -> Result<()> {
        self.node(id.clone(), name, NodeAttributes::DataType(TypeAttributes { is_abstract }))?;
        self.link(parent, ids::HAS_SUBTYPE, &id)
    }

    fn object_type(&mut self, id: NodeId, name: &str, is_abstract: bool, parent: &NodeId) -> Result<()> {
        self.node(id.clone(), name, NodeAttributes::ObjectType(TypeAttributes { is_abstract }))?;
        self.link(parent, ids::HAS_SUBTYPE, &id)
    }

    fn variable_type(&mut self, id: NodeId, name: &str, is_abstract: bool, parent: Option<&NodeId>) -> Result<()> {
        let attrs = VariableTypeAttributes { is_abstract, ..Default::default() };
        self.node(id.clone(), name, NodeAttributes::VariableType(attrs))?;
        if let Some(parent) = parent {
            self.link(parent, ids::HAS_SUBTYPE, &id)?;
        }
        Ok(())
    }

    fn mandatory_property(&mut self, parent: &NodeId, id: NodeId, name: &str, data_type: BuiltinType) -> Result<()> {
        let attrs = VariableAttributes::new(Variant::Empty)
            .with_data_type(data_type.data_type_id())
            .with_value_rank(value_rank::SCALAR);
        self.node(id.clone(), name, NodeAttributes::Variable(attrs))?;
        self.link(parent, ids::HAS_PROPERTY, &id)?;
        self.link(&id, ids::HAS_TYPE_DEFINITION, &ids::PROPERTY_TYPE)?;
        self.link(&id, ids::HAS_MODELLING_RULE, &ids::MODELLING_RULE_MANDATORY)
    }
}

/// Populate an empty store with the standard namespace 0 nodes.
pub(crate) fn bootstrap(store: &mut NodeStore) -> Result<()> {
    let mut b = Builder { store };

    // Reference types first; everything else links through them.
    b.node(
        ids::REFERENCES,
        "References",
        NodeAttributes::ReferenceType(ReferenceTypeAttributes { is_abstract: true, symmetric: true, inverse_name: None }),
    )?;
    b.reference_type(ids::HIERARCHICAL_REFERENCES, "HierarchicalReferences", Some("InverseHierarchicalReferences"), true, &ids::REFERENCES)?;
    b.reference_type(ids::NON_HIERARCHICAL_REFERENCES, "NonHierarchicalReferences", None, true, &ids::REFERENCES)?;
    b.reference_type(ids::HAS_CHILD, "HasChild", Some("ChildOf"), true, &ids::HIERARCHICAL_REFERENCES)?;
    b.reference_type(ids::ORGANIZES, "Organizes", Some("OrganizedBy"), false, &ids::HIERARCHICAL_REFERENCES)?;
    b.reference_type(ids::HAS_EVENT_SOURCE, "HasEventSource", Some("EventSourceOf"), false, &ids::HIERARCHICAL_REFERENCES)?;
    b.reference_type(ids::HAS_NOTIFIER, "HasNotifier", Some("NotifierOf"), false, &ids::HAS_EVENT_SOURCE)?;
    b.reference_type(ids::AGGREGATES, "Aggregates", Some("AggregatedBy"), true, &ids::HAS_CHILD)?;
    b.reference_type(ids::HAS_SUBTYPE, "HasSubtype", Some("SubtypeOf"), false, &ids::HAS_CHILD)?;
    b.reference_type(ids::HAS_PROPERTY, "HasProperty", Some("PropertyOf"), false, &ids::AGGREGATES)?;
    b.reference_type(ids::HAS_COMPONENT, "HasComponent", Some("ComponentOf"), false, &ids::AGGREGATES)?;
    b.reference_type(ids::HAS_ORDERED_COMPONENT, "HasOrderedComponent", Some("OrderedComponentOf"), false, &ids::HAS_COMPONENT)?;
    b.reference_type(ids::HAS_MODELLING_RULE, "HasModellingRule", Some("ModellingRuleOf"), false, &ids::NON_HIERARCHICAL_REFERENCES)?;
    b.reference_type(ids::HAS_TYPE_DEFINITION, "HasTypeDefinition", Some("TypeDefinitionOf"), false, &ids::NON_HIERARCHICAL_REFERENCES)?;

    // Base types the folders need for their type definitions.
    b.node(ids::BASE_OBJECT_TYPE, "BaseObjectType", NodeAttributes::object_type(false))?;
    b.object_type(ids::FOLDER_TYPE, "FolderType", false, &ids::BASE_OBJECT_TYPE)?;
    b.object_type(ids::MODELLING_RULE_TYPE, "ModellingRuleType", false, &ids::BASE_OBJECT_TYPE)?;
    b.object_type(ids::SERVER_TYPE, "ServerType", false, &ids::BASE_OBJECT_TYPE)?;

    b.folder(ids::ROOT_FOLDER, "Root", None)?;
    b.folder(ids::OBJECTS_FOLDER, "Objects", Some(&ids::ROOT_FOLDER))?;
    b.folder(ids::TYPES_FOLDER, "Types", Some(&ids::ROOT_FOLDER))?;
    b.folder(ids::VIEWS_FOLDER, "Views", Some(&ids::ROOT_FOLDER))?;
    b.folder(ids::OBJECT_TYPES_FOLDER, "ObjectTypes", Some(&ids::TYPES_FOLDER))?;
    b.folder(ids::VARIABLE_TYPES_FOLDER, "VariableTypes", Some(&ids::TYPES_FOLDER))?;
    b.folder(ids::DATA_TYPES_FOLDER, "DataTypes", Some(&ids::TYPES_FOLDER))?;
    b.folder(ids::REFERENCE_TYPES_FOLDER, "ReferenceTypes", Some(&ids::TYPES_FOLDER))?;

    b.link(&ids::REFERENCE_TYPES_FOLDER, ids::ORGANIZES, &ids::REFERENCES)?;
    b.link(&ids::OBJECT_TYPES_FOLDER, ids::ORGANIZES, &ids::BASE_OBJECT_TYPE)?;

    // Modelling rules.
    for (id, name) in [(ids::MODELLING_RULE_MANDATORY, "Mandatory"), (ids::MODELLING_RULE_OPTIONAL, "Optional")] {
        b.node(id.clone(), name, NodeAttributes::object())?;
        b.link(&id, ids::HAS_TYPE_DEFINITION, &ids::MODELLING_RULE_TYPE)?;
    }

    // Data types.
    b.node(ids::BASE_DATA_TYPE, "BaseDataType", NodeAttributes::DataType(TypeAttributes { is_abstract: true }))?;
    b.link(&ids::DATA_TYPES_FOLDER, ids::ORGANIZES, &ids::BASE_DATA_TYPE)?;
    b.data_type(ids::NUMBER, "Number", true, &ids::BASE_DATA_TYPE)?;
    b.data_type(ids::INTEGER, "Integer", true, &ids::NUMBER)?;
    b.data_type(ids::UINTEGER, "UInteger", true, &ids::NUMBER)?;
    for t in BuiltinType::ALL {
        b.data_type(t.data_type_id(), t.name(), false, &t.supertype())?;
    }

    // Variable types.
    b.variable_type(ids::BASE_VARIABLE_TYPE, "BaseVariableType", true, None)?;
    b.link(&ids::VARIABLE_TYPES_FOLDER, ids::ORGANIZES, &ids::BASE_VARIABLE_TYPE)?;
    b.variable_type(ids::BASE_DATA_VARIABLE_TYPE, "BaseDataVariableType", false, Some(&ids::BASE_VARIABLE_TYPE))?;
    b.variable_type(ids::PROPERTY_TYPE, "PropertyType", false, Some(&ids::BASE_VARIABLE_TYPE))?;

    // Event types.
    b.object_type(ids::BASE_EVENT_TYPE, "BaseEventType", true, &ids::BASE_OBJECT_TYPE)?;
    let event_properties = [
        (ids::EVENT_ID, "EventId", BuiltinType::ByteString),
        (ids::EVENT_TYPE, "EventType", BuiltinType::NodeId),
        (ids::SOURCE_NODE, "SourceNode", BuiltinType::NodeId),
        (ids::SOURCE_NAME, "SourceName", BuiltinType::String),
        (ids::TIME, "Time", BuiltinType::DateTime),
        (ids::RECEIVE_TIME, "ReceiveTime", BuiltinType::DateTime),
        (ids::MESSAGE, "Message", BuiltinType::LocalizedText),
        (ids::SEVERITY, "Severity", BuiltinType::UInt16),
    ];
    for (id, name, data_type) in event_properties {
        b.mandatory_property(&ids::BASE_EVENT_TYPE, id, name, data_type)?;
    }

    // Server object.
    b.node(
        ids::SERVER,
        "Server",
        NodeAttributes::Object(ObjectAttributes { event_notifier: EVENT_NOTIFIER_SUBSCRIBE }),
    )?;
    b.link(&ids::OBJECTS_FOLDER, ids::ORGANIZES, &ids::SERVER)?;
    b.link(&ids::SERVER, ids::HAS_TYPE_DEFINITION, &ids::SERVER_TYPE)?;

    Ok(())
}
