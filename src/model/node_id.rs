//! Node identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Uuid),
    Opaque(Vec<u8>),
}

/// Immutable node identifier: namespace index plus identifier.
///
/// Equality and hashing cover the full tuple, so `ns=1;i=5` and `ns=2;i=5`
/// are different nodes. Serializes as its text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    /// The null node id (`ns=0;i=0`), also used as "assign me an id".
    pub const NULL: NodeId = NodeId { namespace: 0, identifier: Identifier::Numeric(0) };

    /// The standard `Objects` folder (`ns=0;i=85`).
    pub const OBJECTS: NodeId = NodeId::ns0(85);

    pub const fn numeric(namespace: u16, value: u32) -> Self {
        Self { namespace, identifier: Identifier::Numeric(value) }
    }

    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self { namespace, identifier: Identifier::String(value.into()) }
    }

    pub fn guid(namespace: u16, value: Uuid) -> Self {
        Self { namespace, identifier: Identifier::Guid(value) }
    }

    pub fn opaque(namespace: u16, value: impl Into<Vec<u8>>) -> Self {
        Self { namespace, identifier: Identifier::Opaque(value.into()) }
    }

    /// A numeric id in namespace 0.
    pub const fn ns0(value: u32) -> Self {
        Self::numeric(0, value)
    }

    pub fn null() -> Self {
        Self::NULL
    }

    pub fn is_null(&self) -> bool {
        self.namespace == 0
            && match &self.identifier {
                Identifier::Numeric(v) => *v == 0,
                Identifier::String(s) => s.is_empty(),
                Identifier::Guid(g) => g.is_nil(),
                Identifier::Opaque(b) => b.is_empty(),
            }
    }

    pub fn as_numeric(&self) -> Option<u32> {
        match self.identifier {
            Identifier::Numeric(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "i={v}"),
            Identifier::String(s) => write!(f, "s={s}"),
            Identifier::Guid(g) => write!(f, "g={g}"),
            Identifier::Opaque(b) => {
                write!(f, "b=")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for NodeId {
    type Err = Error;

    /// Parses the text form produced by `Display` (`ns=2;s=Motor`, `i=85`).
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("invalid node id '{s}'"));

        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail.split_once(';').ok_or_else(invalid)?;
                (ns.parse::<u16>().map_err(|_| invalid())?, rest)
            }
            None => (0, s),
        };

        let (kind, value) = rest.split_once('=').ok_or_else(invalid)?;
        let identifier = match kind {
            "i" => Identifier::Numeric(value.parse().map_err(|_| invalid())?),
            "s" => Identifier::String(value.to_owned()),
            "g" => Identifier::Guid(Uuid::parse_str(value).map_err(|_| invalid())?),
            "b" => {
                if value.len() % 2 != 0 {
                    return Err(invalid());
                }
                let bytes = (0..value.len())
                    .step_by(2)
                    .map(|i| u8::from_str_radix(&value[i..i + 2], 16))
                    .collect::<std::result::Result<Vec<u8>, _>>()
                    .map_err(|_| invalid())?;
                Identifier::Opaque(bytes)
            }
            _ => return Err(invalid()),
        };

        Ok(NodeId { namespace, identifier })
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

impl From<u32> for NodeId {
    fn from(v: u32) -> Self {
        NodeId::ns0(v)
    }
}

impl From<(u16, u32)> for NodeId {
    fn from((ns, v): (u16, u32)) -> Self {
        NodeId::numeric(ns, v)
    }
}

impl From<(u16, &str)> for NodeId {
    fn from((ns, v): (u16, &str)) -> Self {
        NodeId::string(ns, v)
    }
}
