//! # Address Space Model
//!
//! Plain data types shared by every layer: identifiers, values, nodes and
//! references. These cross every boundary: address space ↔ subscription
//! engine ↔ historian ↔ service handlers.
//!
//! Design rule: this module is pure data. No I/O, no locks, no async.

pub mod node_id;
pub mod ids;
pub mod names;
pub mod status;
pub mod variant;
pub mod data_value;
pub mod node;
pub mod reference;

pub use node_id::{Identifier, NodeId};
pub use names::{LocalizedText, QualifiedName};
pub use status::StatusCode;
pub use variant::{BuiltinType, BuiltinValue, Variant, VariantArray};
pub use data_value::{DataValue, TimestampsToReturn};
pub use node::{
    access_level, value_rank, write_mask, AttributeId, ContextHandle, MethodAttributes, Node,
    NodeAttributes, NodeClass, ObjectAttributes, ReferenceTypeAttributes, TypeAttributes,
    VariableAttributes, VariableTypeAttributes, ViewAttributes, EVENT_NOTIFIER_SUBSCRIBE,
};
pub use reference::{BrowseDescription, BrowseDirection, Reference, ReferenceDescription};
