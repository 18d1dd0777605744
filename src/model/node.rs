//! Node in the address space.

use serde::{Deserialize, Serialize};

use super::{BuiltinType, DataValue, LocalizedText, NodeId, QualifiedName, Variant};

/// The eight node classes. Discriminants are the protocol's bit values so a
/// class mask can be tested with `mask & class as u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeClass {
    Object = 1,
    Variable = 2,
    Method = 4,
    ObjectType = 8,
    VariableType = 16,
    ReferenceType = 32,
    DataType = 64,
    View = 128,
}

impl NodeClass {
    pub fn matches_mask(self, mask: u32) -> bool {
        mask == 0 || mask & self as u32 != 0
    }

    pub fn is_type(self) -> bool {
        matches!(
            self,
            NodeClass::ObjectType
                | NodeClass::VariableType
                | NodeClass::ReferenceType
                | NodeClass::DataType
        )
    }
}

/// Attribute identifiers, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeId {
    NodeId = 1,
    NodeClass = 2,
    BrowseName = 3,
    DisplayName = 4,
    Description = 5,
    WriteMask = 6,
    UserWriteMask = 7,
    IsAbstract = 8,
    Symmetric = 9,
    InverseName = 10,
    ContainsNoLoops = 11,
    EventNotifier = 12,
    Value = 13,
    DataType = 14,
    ValueRank = 15,
    ArrayDimensions = 16,
    AccessLevel = 17,
    UserAccessLevel = 18,
    MinimumSamplingInterval = 19,
    Historizing = 20,
    Executable = 21,
    UserExecutable = 22,
}

impl AttributeId {
    pub fn from_u32(raw: u32) -> Option<Self> {
        use AttributeId::*;
        Some(match raw {
            1 => NodeId,
            2 => NodeClass,
            3 => BrowseName,
            4 => DisplayName,
            5 => Description,
            6 => WriteMask,
            7 => UserWriteMask,
            8 => IsAbstract,
            9 => Symmetric,
            10 => InverseName,
            11 => ContainsNoLoops,
            12 => EventNotifier,
            13 => Value,
            14 => DataType,
            15 => ValueRank,
            16 => ArrayDimensions,
            17 => AccessLevel,
            18 => UserAccessLevel,
            19 => MinimumSamplingInterval,
            20 => Historizing,
            21 => Executable,
            22 => UserExecutable,
            _ => return None,
        })
    }

    /// The WriteMask bit guarding this attribute; `None` means never writable
    /// through the mask (NodeId, NodeClass, the user-specific attributes) or,
    /// for `Value`, guarded by AccessLevel instead.
    pub fn write_mask_bit(self) -> Option<u32> {
        use AttributeId::*;
        Some(match self {
            AccessLevel => write_mask::ACCESS_LEVEL,
            ArrayDimensions => write_mask::ARRAY_DIMENSIONS,
            BrowseName => write_mask::BROWSE_NAME,
            ContainsNoLoops => write_mask::CONTAINS_NO_LOOPS,
            DataType => write_mask::DATA_TYPE,
            Description => write_mask::DESCRIPTION,
            DisplayName => write_mask::DISPLAY_NAME,
            EventNotifier => write_mask::EVENT_NOTIFIER,
            Executable => write_mask::EXECUTABLE,
            Historizing => write_mask::HISTORIZING,
            InverseName => write_mask::INVERSE_NAME,
            IsAbstract => write_mask::IS_ABSTRACT,
            MinimumSamplingInterval => write_mask::MINIMUM_SAMPLING_INTERVAL,
            Symmetric => write_mask::SYMMETRIC,
            ValueRank => write_mask::VALUE_RANK,
            WriteMask => write_mask::WRITE_MASK,
            NodeId | NodeClass | UserWriteMask | UserAccessLevel | UserExecutable | Value => {
                return None;
            }
        })
    }
}

/// AccessLevel bits of Variable nodes.
pub mod access_level {
    pub const CURRENT_READ: u8 = 0x01;
    pub const CURRENT_WRITE: u8 = 0x02;
    pub const HISTORY_READ: u8 = 0x04;
    pub const HISTORY_WRITE: u8 = 0x08;
    pub const SEMANTIC_CHANGE: u8 = 0x10;
    pub const STATUS_WRITE: u8 = 0x20;
    pub const TIMESTAMP_WRITE: u8 = 0x40;
    pub const ALL: u8 = 0x7F;
}

/// WriteMask bits.
pub mod write_mask {
    pub const ACCESS_LEVEL: u32 = 1 << 0;
    pub const ARRAY_DIMENSIONS: u32 = 1 << 1;
    pub const BROWSE_NAME: u32 = 1 << 2;
    pub const CONTAINS_NO_LOOPS: u32 = 1 << 3;
    pub const DATA_TYPE: u32 = 1 << 4;
    pub const DESCRIPTION: u32 = 1 << 5;
    pub const DISPLAY_NAME: u32 = 1 << 6;
    pub const EVENT_NOTIFIER: u32 = 1 << 7;
    pub const EXECUTABLE: u32 = 1 << 8;
    pub const HISTORIZING: u32 = 1 << 9;
    pub const INVERSE_NAME: u32 = 1 << 10;
    pub const IS_ABSTRACT: u32 = 1 << 11;
    pub const MINIMUM_SAMPLING_INTERVAL: u32 = 1 << 12;
    pub const SYMMETRIC: u32 = 1 << 15;
    pub const VALUE_RANK: u32 = 1 << 19;
    pub const WRITE_MASK: u32 = 1 << 20;
    pub const ALL: u32 = 0x003F_FFFF & !((1 << 13) | (1 << 14));
}

/// ValueRank special values.
pub mod value_rank {
    pub const SCALAR_OR_ONE_DIMENSION: i32 = -3;
    pub const ANY: i32 = -2;
    pub const SCALAR: i32 = -1;
    pub const ONE_OR_MORE_DIMENSIONS: i32 = 0;
    pub const ONE_DIMENSION: i32 = 1;
}

/// EventNotifier bit: node produces events.
pub const EVENT_NOTIFIER_SUBSCRIBE: u8 = 0x01;

/// Opaque handle into the [`ContextRegistry`](crate::context::ContextRegistry)
/// side-table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextHandle(pub u32);

// ============================================================================
// Class-specific attributes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub event_notifier: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableAttributes {
    pub value: DataValue,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub array_dimensions: Vec<u32>,
    pub access_level: u8,
    pub minimum_sampling_interval: f64,
    pub historizing: bool,
    /// Value is served by the node's context (`read_data`/`write_data`)
    /// instead of the stored `value`.
    pub data_source: bool,
}

impl VariableAttributes {
    /// Read/write variable whose DataType and rank follow the initial value.
    pub fn new(value: impl Into<Variant>) -> Self {
        let value = value.into();
        let data_type = value
            .builtin_type()
            .map(BuiltinType::data_type_id)
            .unwrap_or(super::ids::BASE_DATA_TYPE);
        let value_rank = if value.is_array() {
            value_rank::ONE_DIMENSION
        } else {
            value_rank::SCALAR
        };
        Self {
            value: DataValue::new_now(value),
            data_type,
            value_rank,
            array_dimensions: Vec::new(),
            access_level: access_level::CURRENT_READ | access_level::CURRENT_WRITE,
            minimum_sampling_interval: 0.0,
            historizing: false,
            data_source: false,
        }
    }

    pub fn with_data_type(mut self, data_type: NodeId) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_value_rank(mut self, rank: i32) -> Self {
        self.value_rank = rank;
        self
    }

    pub fn with_access_level(mut self, access_level: u8) -> Self {
        self.access_level = access_level;
        self
    }

    /// Flag the node historizing and grant history read.
    pub fn historizing(mut self) -> Self {
        self.historizing = true;
        self.access_level |= access_level::HISTORY_READ;
        self
    }

    pub fn with_data_source(mut self) -> Self {
        self.data_source = true;
        self
    }
}

impl Default for VariableAttributes {
    fn default() -> Self {
        Self::new(Variant::Empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodAttributes {
    pub executable: bool,
}

impl Default for MethodAttributes {
    fn default() -> Self {
        Self { executable: true }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeAttributes {
    pub is_abstract: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableTypeAttributes {
    pub value: Variant,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub is_abstract: bool,
}

impl Default for VariableTypeAttributes {
    fn default() -> Self {
        Self {
            value: Variant::Empty,
            data_type: super::ids::BASE_DATA_TYPE,
            value_rank: value_rank::ANY,
            is_abstract: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceTypeAttributes {
    pub is_abstract: bool,
    pub symmetric: bool,
    pub inverse_name: Option<LocalizedText>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewAttributes {
    pub contains_no_loops: bool,
    pub event_notifier: u8,
}

/// Class-specific attribute block; its variant fixes the node's class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum NodeAttributes {
    Object(ObjectAttributes),
    Variable(VariableAttributes),
    Method(MethodAttributes),
    ObjectType(TypeAttributes),
    VariableType(VariableTypeAttributes),
    ReferenceType(ReferenceTypeAttributes),
    DataType(TypeAttributes),
    View(ViewAttributes),
}

impl NodeAttributes {
    pub fn node_class(&self) -> NodeClass {
        match self {
            NodeAttributes::Object(_) => NodeClass::Object,
            NodeAttributes::Variable(_) => NodeClass::Variable,
            NodeAttributes::Method(_) => NodeClass::Method,
            NodeAttributes::ObjectType(_) => NodeClass::ObjectType,
            NodeAttributes::VariableType(_) => NodeClass::VariableType,
            NodeAttributes::ReferenceType(_) => NodeClass::ReferenceType,
            NodeAttributes::DataType(_) => NodeClass::DataType,
            NodeAttributes::View(_) => NodeClass::View,
        }
    }

    pub fn object() -> Self {
        NodeAttributes::Object(ObjectAttributes::default())
    }

    pub fn variable(value: impl Into<Variant>) -> Self {
        NodeAttributes::Variable(VariableAttributes::new(value))
    }

    pub fn object_type(is_abstract: bool) -> Self {
        NodeAttributes::ObjectType(TypeAttributes { is_abstract })
    }

    pub fn method() -> Self {
        NodeAttributes::Method(MethodAttributes::default())
    }
}

// ============================================================================
// Node
// ============================================================================

/// A node of the address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub description: LocalizedText,
    pub write_mask: u32,
    pub attributes: NodeAttributes,
    #[serde(skip)]
    pub context: Option<ContextHandle>,
}

impl Node {
    pub fn new(node_id: NodeId, browse_name: QualifiedName, attributes: NodeAttributes) -> Self {
        let display_name = LocalizedText::text(browse_name.name.clone());
        Self {
            node_id,
            browse_name,
            display_name,
            description: LocalizedText::default(),
            write_mask: 0,
            attributes,
            context: None,
        }
    }

    pub fn node_class(&self) -> NodeClass {
        self.attributes.node_class()
    }

    pub fn as_variable(&self) -> Option<&VariableAttributes> {
        match &self.attributes {
            NodeAttributes::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_variable_mut(&mut self) -> Option<&mut VariableAttributes> {
        match &mut self.attributes {
            NodeAttributes::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_historizing(&self) -> bool {
        self.as_variable().is_some_and(|v| v.historizing)
    }

    pub fn event_notifier(&self) -> u8 {
        match &self.attributes {
            NodeAttributes::Object(o) => o.event_notifier,
            NodeAttributes::View(v) => v.event_notifier,
            _ => 0,
        }
    }

    /// Stored value of a non-`Value` attribute; `None` when the attribute
    /// does not apply to this node class.
    pub fn attribute(&self, id: AttributeId) -> Option<Variant> {
        use NodeAttributes as A;
        Some(match (id, &self.attributes) {
            (AttributeId::NodeId, _) => self.node_id.clone().into(),
            (AttributeId::NodeClass, _) => Variant::Int32(self.node_class() as i32),
            (AttributeId::BrowseName, _) => self.browse_name.clone().into(),
            (AttributeId::DisplayName, _) => self.display_name.clone().into(),
            (AttributeId::Description, _) => self.description.clone().into(),
            (AttributeId::WriteMask, _) => Variant::UInt32(self.write_mask),
            (AttributeId::IsAbstract, A::ObjectType(t) | A::DataType(t)) => t.is_abstract.into(),
            (AttributeId::IsAbstract, A::VariableType(t)) => t.is_abstract.into(),
            (AttributeId::IsAbstract, A::ReferenceType(t)) => t.is_abstract.into(),
            (AttributeId::Symmetric, A::ReferenceType(t)) => t.symmetric.into(),
            (AttributeId::InverseName, A::ReferenceType(t)) => {
                t.inverse_name.clone().unwrap_or_default().into()
            }
            (AttributeId::ContainsNoLoops, A::View(v)) => v.contains_no_loops.into(),
            (AttributeId::EventNotifier, A::Object(o)) => o.event_notifier.into(),
            (AttributeId::EventNotifier, A::View(v)) => v.event_notifier.into(),
            (AttributeId::Value, A::Variable(v)) => v.value.value.clone(),
            (AttributeId::Value, A::VariableType(v)) => v.value.clone(),
            (AttributeId::DataType, A::Variable(v)) => v.data_type.clone().into(),
            (AttributeId::DataType, A::VariableType(v)) => v.data_type.clone().into(),
            (AttributeId::ValueRank, A::Variable(v)) => v.value_rank.into(),
            (AttributeId::ValueRank, A::VariableType(v)) => v.value_rank.into(),
            (AttributeId::ArrayDimensions, A::Variable(v)) => Variant::array(
                BuiltinType::UInt32,
                v.array_dimensions.iter().map(|d| Variant::UInt32(*d)).collect(),
            )
            .ok()?,
            (AttributeId::AccessLevel, A::Variable(v)) => v.access_level.into(),
            (AttributeId::MinimumSamplingInterval, A::Variable(v)) => {
                v.minimum_sampling_interval.into()
            }
            (AttributeId::Historizing, A::Variable(v)) => v.historizing.into(),
            (AttributeId::Executable, A::Method(m)) => m.executable.into(),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_attributes_follow_value() {
        let attrs = VariableAttributes::new(0.0f64);
        assert_eq!(attrs.data_type, BuiltinType::Double.data_type_id());
        assert_eq!(attrs.value_rank, value_rank::SCALAR);
        assert_eq!(attrs.access_level & access_level::CURRENT_WRITE, access_level::CURRENT_WRITE);
    }

    #[test]
    fn test_attribute_applicability() {
        let obj = Node::new(NodeId::numeric(1, 1), QualifiedName::new(1, "Obj"), NodeAttributes::object());
        assert!(obj.attribute(AttributeId::EventNotifier).is_some());
        assert!(obj.attribute(AttributeId::DataType).is_none());
        assert_eq!(obj.attribute(AttributeId::NodeId), Some(Variant::from(NodeId::numeric(1, 1))));
    }

    #[test]
    fn test_write_mask_never_covers_identity() {
        assert_eq!(AttributeId::NodeId.write_mask_bit(), None);
        assert_eq!(AttributeId::NodeClass.write_mask_bit(), None);
        assert_eq!(write_mask::ALL & (1 << 14), 0);
    }

    #[test]
    fn test_class_mask() {
        assert!(NodeClass::Variable.matches_mask(0));
        assert!(NodeClass::Variable.matches_mask(NodeClass::Variable as u32 | NodeClass::Object as u32));
        assert!(!NodeClass::Method.matches_mask(NodeClass::Object as u32));
    }
}
