//! Self-describing value container matching the OPC UA built-in types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ids, LocalizedText, NodeId, QualifiedName, StatusCode};
use crate::{Error, Result};

/// Built-in scalar types a [`Variant`] can carry.
///
/// The discriminants are the protocol's built-in type ids, which are also
/// the numeric ids of the matching DataType nodes in namespace 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinType {
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    NodeId = 17,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 19] = [
        BuiltinType::Boolean,
        BuiltinType::SByte,
        BuiltinType::Byte,
        BuiltinType::Int16,
        BuiltinType::UInt16,
        BuiltinType::Int32,
        BuiltinType::UInt32,
        BuiltinType::Int64,
        BuiltinType::UInt64,
        BuiltinType::Float,
        BuiltinType::Double,
        BuiltinType::String,
        BuiltinType::DateTime,
        BuiltinType::Guid,
        BuiltinType::ByteString,
        BuiltinType::NodeId,
        BuiltinType::StatusCode,
        BuiltinType::QualifiedName,
        BuiltinType::LocalizedText,
    ];

    /// The DataType node describing this built-in type.
    pub fn data_type_id(self) -> NodeId {
        NodeId::ns0(self as u32)
    }

    pub fn from_data_type_id(id: &NodeId) -> Option<Self> {
        if id.namespace != 0 {
            return None;
        }
        let raw = id.as_numeric()?;
        BuiltinType::ALL.iter().copied().find(|t| *t as u32 == raw)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            BuiltinType::SByte
                | BuiltinType::Byte
                | BuiltinType::Int16
                | BuiltinType::UInt16
                | BuiltinType::Int32
                | BuiltinType::UInt32
                | BuiltinType::Int64
                | BuiltinType::UInt64
                | BuiltinType::Float
                | BuiltinType::Double
        )
    }

    /// The abstract supertype in the standard DataType hierarchy.
    pub fn supertype(self) -> NodeId {
        match self {
            BuiltinType::SByte | BuiltinType::Int16 | BuiltinType::Int32 | BuiltinType::Int64 => {
                ids::INTEGER
            }
            BuiltinType::Byte
            | BuiltinType::UInt16
            | BuiltinType::UInt32
            | BuiltinType::UInt64 => ids::UINTEGER,
            BuiltinType::Float | BuiltinType::Double => ids::NUMBER,
            _ => ids::BASE_DATA_TYPE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Boolean => "Boolean",
            BuiltinType::SByte => "SByte",
            BuiltinType::Byte => "Byte",
            BuiltinType::Int16 => "Int16",
            BuiltinType::UInt16 => "UInt16",
            BuiltinType::Int32 => "Int32",
            BuiltinType::UInt32 => "UInt32",
            BuiltinType::Int64 => "Int64",
            BuiltinType::UInt64 => "UInt64",
            BuiltinType::Float => "Float",
            BuiltinType::Double => "Double",
            BuiltinType::String => "String",
            BuiltinType::DateTime => "DateTime",
            BuiltinType::Guid => "Guid",
            BuiltinType::ByteString => "ByteString",
            BuiltinType::NodeId => "NodeId",
            BuiltinType::StatusCode => "StatusCode",
            BuiltinType::QualifiedName => "QualifiedName",
            BuiltinType::LocalizedText => "LocalizedText",
        }
    }

    /// The zero value of the type, used for default-initialised variables.
    pub fn default_value(self) -> Variant {
        match self {
            BuiltinType::Boolean => Variant::Boolean(false),
            BuiltinType::SByte => Variant::SByte(0),
            BuiltinType::Byte => Variant::Byte(0),
            BuiltinType::Int16 => Variant::Int16(0),
            BuiltinType::UInt16 => Variant::UInt16(0),
            BuiltinType::Int32 => Variant::Int32(0),
            BuiltinType::UInt32 => Variant::UInt32(0),
            BuiltinType::Int64 => Variant::Int64(0),
            BuiltinType::UInt64 => Variant::UInt64(0),
            BuiltinType::Float => Variant::Float(0.0),
            BuiltinType::Double => Variant::Double(0.0),
            BuiltinType::String => Variant::String(String::new()),
            BuiltinType::DateTime => Variant::DateTime(DateTime::<Utc>::UNIX_EPOCH),
            BuiltinType::Guid => Variant::Guid(Uuid::nil()),
            BuiltinType::ByteString => Variant::ByteString(Vec::new()),
            BuiltinType::NodeId => Variant::NodeId(Box::new(NodeId::null())),
            BuiltinType::StatusCode => Variant::StatusCode(StatusCode::GOOD),
            BuiltinType::QualifiedName => Variant::QualifiedName(Box::default()),
            BuiltinType::LocalizedText => Variant::LocalizedText(Box::default()),
        }
    }
}

impl fmt::Display for BuiltinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A homogeneous one-dimensional array of built-in values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantArray {
    element_type: BuiltinType,
    values: Vec<Variant>,
}

impl VariantArray {
    pub fn element_type(&self) -> BuiltinType {
        self.element_type
    }

    pub fn values(&self) -> &[Variant] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Tagged union holding exactly one built-in value.
///
/// `Clone` is a deep copy; no two variants share storage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
    ByteString(Vec<u8>),
    NodeId(Box<NodeId>),
    StatusCode(StatusCode),
    QualifiedName(Box<QualifiedName>),
    LocalizedText(Box<LocalizedText>),
    Array(Box<VariantArray>),
}

impl Variant {
    /// Build an array, checking every element is a scalar of `element_type`.
    pub fn array(element_type: BuiltinType, values: Vec<Variant>) -> Result<Variant> {
        for v in &values {
            if v.builtin_type() != Some(element_type) || v.is_array() {
                return Err(Error::TypeMismatch {
                    expected: element_type.name().into(),
                    got: v.type_name().into(),
                });
            }
        }
        Ok(Variant::Array(Box::new(VariantArray { element_type, values })))
    }

    /// The built-in type carried (element type for arrays), `None` if empty.
    pub fn builtin_type(&self) -> Option<BuiltinType> {
        Some(match self {
            Variant::Empty => return None,
            Variant::Boolean(_) => BuiltinType::Boolean,
            Variant::SByte(_) => BuiltinType::SByte,
            Variant::Byte(_) => BuiltinType::Byte,
            Variant::Int16(_) => BuiltinType::Int16,
            Variant::UInt16(_) => BuiltinType::UInt16,
            Variant::Int32(_) => BuiltinType::Int32,
            Variant::UInt32(_) => BuiltinType::UInt32,
            Variant::Int64(_) => BuiltinType::Int64,
            Variant::UInt64(_) => BuiltinType::UInt64,
            Variant::Float(_) => BuiltinType::Float,
            Variant::Double(_) => BuiltinType::Double,
            Variant::String(_) => BuiltinType::String,
            Variant::DateTime(_) => BuiltinType::DateTime,
            Variant::Guid(_) => BuiltinType::Guid,
            Variant::ByteString(_) => BuiltinType::ByteString,
            Variant::NodeId(_) => BuiltinType::NodeId,
            Variant::StatusCode(_) => BuiltinType::StatusCode,
            Variant::QualifiedName(_) => BuiltinType::QualifiedName,
            Variant::LocalizedText(_) => BuiltinType::LocalizedText,
            Variant::Array(a) => a.element_type,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Empty => "Empty",
            Variant::Array(_) => "Array",
            other => other.builtin_type().map(BuiltinType::name).unwrap_or("Empty"),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Variant::Array(_))
    }

    pub fn as_array(&self) -> Option<&VariantArray> {
        match self {
            Variant::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Numeric scalar widened to f64; used by deadband and filter comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::SByte(v) => Some(*v as f64),
            Variant::Byte(v) => Some(*v as f64),
            Variant::Int16(v) => Some(*v as f64),
            Variant::UInt16(v) => Some(*v as f64),
            Variant::Int32(v) => Some(*v as f64),
            Variant::UInt32(v) => Some(*v as f64),
            Variant::Int64(v) => Some(*v as f64),
            Variant::UInt64(v) => Some(*v as f64),
            Variant::Float(v) => Some(*v as f64),
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node_id(&self) -> Option<&NodeId> {
        match self {
            Variant::NodeId(n) => Some(n),
            _ => None,
        }
    }

    /// Ordering used by filter operators: numbers compare numerically across
    /// widths, strings and date-times compare naturally, anything else is
    /// unordered.
    pub fn partial_cmp_loose(&self, other: &Variant) -> Option<std::cmp::Ordering> {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (Variant::String(a), Variant::String(b)) => a.partial_cmp(b),
            (Variant::DateTime(a), Variant::DateTime(b)) => a.partial_cmp(b),
            (Variant::Boolean(a), Variant::Boolean(b)) => a.partial_cmp(b),
            (Variant::StatusCode(a), Variant::StatusCode(b)) => a.0.partial_cmp(&b.0),
            (a, b) if a == b => Some(std::cmp::Ordering::Equal),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Variant { fn from(v: bool) -> Self { Variant::Boolean(v) } }
impl From<i8> for Variant { fn from(v: i8) -> Self { Variant::SByte(v) } }
impl From<u8> for Variant { fn from(v: u8) -> Self { Variant::Byte(v) } }
impl From<i16> for Variant { fn from(v: i16) -> Self { Variant::Int16(v) } }
impl From<u16> for Variant { fn from(v: u16) -> Self { Variant::UInt16(v) } }
impl From<i32> for Variant { fn from(v: i32) -> Self { Variant::Int32(v) } }
impl From<u32> for Variant { fn from(v: u32) -> Self { Variant::UInt32(v) } }
impl From<i64> for Variant { fn from(v: i64) -> Self { Variant::Int64(v) } }
impl From<u64> for Variant { fn from(v: u64) -> Self { Variant::UInt64(v) } }
impl From<f32> for Variant { fn from(v: f32) -> Self { Variant::Float(v) } }
impl From<f64> for Variant { fn from(v: f64) -> Self { Variant::Double(v) } }
impl From<String> for Variant { fn from(v: String) -> Self { Variant::String(v) } }
impl From<&str> for Variant { fn from(v: &str) -> Self { Variant::String(v.to_owned()) } }
impl From<DateTime<Utc>> for Variant { fn from(v: DateTime<Utc>) -> Self { Variant::DateTime(v) } }
impl From<Uuid> for Variant { fn from(v: Uuid) -> Self { Variant::Guid(v) } }
impl From<Vec<u8>> for Variant { fn from(v: Vec<u8>) -> Self { Variant::ByteString(v) } }
impl From<NodeId> for Variant { fn from(v: NodeId) -> Self { Variant::NodeId(Box::new(v)) } }
impl From<StatusCode> for Variant { fn from(v: StatusCode) -> Self { Variant::StatusCode(v) } }
impl From<QualifiedName> for Variant { fn from(v: QualifiedName) -> Self { Variant::QualifiedName(Box::new(v)) } }
impl From<LocalizedText> for Variant { fn from(v: LocalizedText) -> Self { Variant::LocalizedText(Box::new(v)) } }

/// Types with a fixed built-in representation; used by the typed helpers
/// (`add_object_type_variable::<f64>` and friends).
pub trait BuiltinValue: Into<Variant> + Default {
    const BUILTIN_TYPE: BuiltinType;
}

macro_rules! builtin_value {
    ($($t:ty => $b:ident),* $(,)?) => {
        $(impl BuiltinValue for $t { const BUILTIN_TYPE: BuiltinType = BuiltinType::$b; })*
    };
}

builtin_value! {
    bool => Boolean, i8 => SByte, u8 => Byte, i16 => Int16, u16 => UInt16,
    i32 => Int32, u32 => UInt32, i64 => Int64, u64 => UInt64,
    f32 => Float, f64 => Double, String => String,
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "null"),
            Variant::Boolean(v) => write!(f, "{v}"),
            Variant::SByte(v) => write!(f, "{v}"),
            Variant::Byte(v) => write!(f, "{v}"),
            Variant::Int16(v) => write!(f, "{v}"),
            Variant::UInt16(v) => write!(f, "{v}"),
            Variant::Int32(v) => write!(f, "{v}"),
            Variant::UInt32(v) => write!(f, "{v}"),
            Variant::Int64(v) => write!(f, "{v}"),
            Variant::UInt64(v) => write!(f, "{v}"),
            Variant::Float(v) => write!(f, "{v}"),
            Variant::Double(v) => write!(f, "{v}"),
            Variant::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Variant::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Variant::Guid(g) => write!(f, "{g}"),
            Variant::ByteString(b) => write!(f, "<bytes[{}]>", b.len()),
            Variant::NodeId(n) => write!(f, "{n}"),
            Variant::StatusCode(s) => write!(f, "{s}"),
            Variant::QualifiedName(q) => write!(f, "{q}"),
            Variant::LocalizedText(t) => write!(f, "{t}"),
            Variant::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.values.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}
