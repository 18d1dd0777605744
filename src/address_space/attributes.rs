//! Attribute reads and writes.

use chrono::Utc;
use tracing::trace;

use crate::model::{
    access_level, value_rank, AttributeId, BuiltinType, DataValue, Node,
    NodeAttributes, NodeId, QualifiedName, Variant,
};
use crate::{Error, Result};

use super::{in_hook, AddressSpace, Deferred, NodeStore};

/// Check a value against a declared DataType and ValueRank. Empty always
/// passes.
pub(crate) fn check_value(store: &NodeStore, data_type: &NodeId, rank: i32, value: &Variant) -> Result<()> {
    let Some(builtin) = value.builtin_type() else {
        return Ok(());
    };

    let is_array = value.is_array();
    let shape_ok = match rank {
        value_rank::SCALAR => !is_array,
        value_rank::ANY | value_rank::SCALAR_OR_ONE_DIMENSION => true,
        value_rank::ONE_OR_MORE_DIMENSIONS => is_array,
        n if n >= value_rank::ONE_DIMENSION => is_array,
        _ => true,
    };
    if !shape_ok {
        return Err(Error::TypeMismatch {
            expected: format!("value rank {rank}"),
            got: if is_array { "array".into() } else { "scalar".into() },
        });
    }

    let actual = builtin.data_type_id();
    // Declared subtypes of a built-in (enumerations, custom Doubles) take
    // the built-in's values too.
    if store.is_subtype_of(&actual, data_type) || store.is_subtype_of(data_type, &actual) {
        return Ok(());
    }
    let expected = store
        .node(data_type)
        .map(|n| n.browse_name.name.clone())
        .unwrap_or_else(|| data_type.to_string());
    Err(Error::TypeMismatch { expected, got: builtin.name().into() })
}

fn expect<T>(value: Option<T>, expected: BuiltinType, got: &Variant) -> Result<T> {
    value.ok_or_else(|| Error::TypeMismatch { expected: expected.name().into(), got: got.type_name().into() })
}

/// Store a non-Value attribute on a node.
fn apply_attribute(node: &mut Node, attribute: AttributeId, value: Variant) -> Result<()> {
    use NodeAttributes as A;

    let not_applicable = || Error::AttributeNotApplicable { node: node.node_id.clone(), attribute };
    let as_bool = |v: &Variant| expect(v.as_bool(), BuiltinType::Boolean, v);
    let as_byte = |v: &Variant| expect(if let Variant::Byte(b) = v { Some(*b) } else { None }, BuiltinType::Byte, v);
    let as_text = |v: &Variant| {
        expect(if let Variant::LocalizedText(t) = v { Some((**t).clone()) } else { None }, BuiltinType::LocalizedText, v)
    };

    match (attribute, &mut node.attributes) {
        (AttributeId::BrowseName, _) => {
            let name: Option<QualifiedName> =
                if let Variant::QualifiedName(q) = &value { Some((**q).clone()) } else { None };
            node.browse_name = expect(name, BuiltinType::QualifiedName, &value)?;
        }
        (AttributeId::DisplayName, _) => node.display_name = as_text(&value)?,
        (AttributeId::Description, _) => node.description = as_text(&value)?,
        (AttributeId::WriteMask, _) => {
            node.write_mask =
                expect(if let Variant::UInt32(m) = value { Some(m) } else { None }, BuiltinType::UInt32, &value)?;
        }
        (AttributeId::IsAbstract, A::ObjectType(t) | A::DataType(t)) => t.is_abstract = as_bool(&value)?,
        (AttributeId::IsAbstract, A::VariableType(t)) => t.is_abstract = as_bool(&value)?,
        (AttributeId::IsAbstract, A::ReferenceType(t)) => t.is_abstract = as_bool(&value)?,
        (AttributeId::Symmetric, A::ReferenceType(t)) => t.symmetric = as_bool(&value)?,
        (AttributeId::InverseName, A::ReferenceType(t)) => t.inverse_name = Some(as_text(&value)?),
        (AttributeId::ContainsNoLoops, A::View(v)) => v.contains_no_loops = as_bool(&value)?,
        (AttributeId::EventNotifier, A::Object(o)) => o.event_notifier = as_byte(&value)?,
        (AttributeId::EventNotifier, A::View(v)) => v.event_notifier = as_byte(&value)?,
        (AttributeId::DataType, A::Variable(v)) => {
            v.data_type = expect(value.as_node_id().cloned(), BuiltinType::NodeId, &value)?;
        }
        (AttributeId::DataType, A::VariableType(v)) => {
            v.data_type = expect(value.as_node_id().cloned(), BuiltinType::NodeId, &value)?;
        }
        (AttributeId::ValueRank, A::Variable(v)) => {
            v.value_rank = expect(if let Variant::Int32(r) = value { Some(r) } else { None }, BuiltinType::Int32, &value)?;
        }
        (AttributeId::ValueRank, A::VariableType(v)) => {
            v.value_rank = expect(if let Variant::Int32(r) = value { Some(r) } else { None }, BuiltinType::Int32, &value)?;
        }
        (AttributeId::ArrayDimensions, A::Variable(v)) => {
            let dims = value.as_array().filter(|a| a.element_type() == BuiltinType::UInt32).map(|a| {
                a.values()
                    .iter()
                    .filter_map(|d| if let Variant::UInt32(d) = d { Some(*d) } else { None })
                    .collect()
            });
            v.array_dimensions = expect(dims, BuiltinType::UInt32, &value)?;
        }
        (AttributeId::AccessLevel, A::Variable(v)) => v.access_level = as_byte(&value)?,
        (AttributeId::MinimumSamplingInterval, A::Variable(v)) => {
            v.minimum_sampling_interval =
                expect(if let Variant::Double(d) = value { Some(d) } else { None }, BuiltinType::Double, &value)?;
        }
        (AttributeId::Historizing, A::Variable(v)) => v.historizing = as_bool(&value)?,
        (AttributeId::Executable, A::Method(m)) => m.executable = as_bool(&value)?,
        _ => return Err(not_applicable()),
    }
    Ok(())
}

enum ValueWrite {
    Stored { historizing: bool, context: Option<crate::model::ContextHandle> },
    DataSource(Option<crate::model::ContextHandle>),
    Attribute,
}

impl AddressSpace {
    /// Read one attribute as a fresh [`DataValue`].
    pub fn read_attribute(&self, node: &NodeId, attribute: AttributeId) -> Result<DataValue> {
        if attribute == AttributeId::Value {
            return self.read_value(node);
        }
        let store = self.store.read();
        let n = store.node(node).ok_or_else(|| Error::NodeNotFound(node.clone()))?;
        let value = match attribute {
            // Without a session the user-specific attributes equal the node's own.
            AttributeId::UserAccessLevel => n.attribute(AttributeId::AccessLevel),
            AttributeId::UserWriteMask => n.attribute(AttributeId::WriteMask),
            AttributeId::UserExecutable => n.attribute(AttributeId::Executable),
            other => n.attribute(other),
        }
        .ok_or_else(|| Error::AttributeNotApplicable { node: node.clone(), attribute })?;
        Ok(DataValue { value, server_timestamp: Some(Utc::now()), ..Default::default() })
    }

    fn read_value(&self, node: &NodeId) -> Result<DataValue> {
        let (stored, data_source, context) = {
            let store = self.store.read();
            let n = store.node(node).ok_or_else(|| Error::NodeNotFound(node.clone()))?;
            match &n.attributes {
                NodeAttributes::Variable(v) => (v.value.clone(), v.data_source, n.context),
                NodeAttributes::VariableType(v) => (DataValue::from(v.value.clone()), false, n.context),
                _ => {
                    return Err(Error::AttributeNotApplicable { node: node.clone(), attribute: AttributeId::Value });
                }
            }
        };
        let context = context.and_then(|h| self.contexts.get(h));

        let mut value = match (&context, data_source) {
            (Some(ctx), true) => self.call_hook(|| ctx.read_data(self, node))?,
            (None, true) => {
                return Err(Error::ContextFailure(format!("data source variable {node} has no context")));
            }
            _ => stored,
        };
        if value.server_timestamp.is_none() {
            value.server_timestamp = Some(Utc::now());
        }
        if let Some(ctx) = context {
            self.call_hook(|| ctx.read_value(self, node, &mut value));
        }
        Ok(value)
    }

    /// Client-style write: honours WriteMask and AccessLevel.
    pub fn write_attribute(&self, node: &NodeId, attribute: AttributeId, value: Variant) -> Result<()> {
        self.write_inner(node, attribute, DataValue::new_now(value), true)
    }

    /// Client-style Value write carrying status and timestamps.
    pub fn write_data_value(&self, node: &NodeId, value: DataValue) -> Result<()> {
        self.write_inner(node, AttributeId::Value, value, true)
    }

    /// Server-internal Value write: skips AccessLevel, keeps the type check.
    pub fn set_value(&self, node: &NodeId, value: Variant) -> Result<()> {
        self.write_inner(node, AttributeId::Value, DataValue::new_now(value), false)
    }

    pub fn set_data_value(&self, node: &NodeId, value: DataValue) -> Result<()> {
        self.write_inner(node, AttributeId::Value, value, false)
    }

    /// Server-internal attribute write: skips WriteMask. NodeId and
    /// NodeClass stay immutable.
    pub fn set_attribute(&self, node: &NodeId, attribute: AttributeId, value: Variant) -> Result<()> {
        self.write_inner(node, attribute, DataValue::new_now(value), false)
    }

    pub(super) fn write_inner(&self, node: &NodeId, attribute: AttributeId, mut value: DataValue, check_access: bool) -> Result<()> {
        if in_hook() {
            self.defer(Deferred::Write { node: node.clone(), attribute, value, check_access });
            return Ok(());
        }
        let now = Utc::now();
        value.server_timestamp = Some(now);
        if value.source_timestamp.is_none() {
            value.source_timestamp = Some(now);
        }

        let outcome = {
            let mut store = self.store.write();
            let n = store.node(node).ok_or_else(|| Error::NodeNotFound(node.clone()))?;
            let context = n.context;

            if attribute == AttributeId::Value {
                match &n.attributes {
                    NodeAttributes::Variable(v) => {
                        if check_access && v.access_level & access_level::CURRENT_WRITE == 0 {
                            return Err(Error::AccessDenied(format!("{node} is not writable")));
                        }
                        check_value(&store, &v.data_type, v.value_rank, &value.value)?;
                        if v.data_source {
                            ValueWrite::DataSource(context)
                        } else {
                            let historizing = v.historizing;
                            if let Some(v) = store.node_mut(node).and_then(Node::as_variable_mut) {
                                v.value = value.clone();
                            }
                            ValueWrite::Stored { historizing, context }
                        }
                    }
                    NodeAttributes::VariableType(v) => {
                        check_value(&store, &v.data_type, v.value_rank, &value.value)?;
                        if let Some(Node { attributes: NodeAttributes::VariableType(v), .. }) = store.node_mut(node) {
                            v.value = value.value.clone();
                        }
                        ValueWrite::Attribute
                    }
                    _ => return Err(Error::AttributeNotApplicable { node: node.clone(), attribute }),
                }
            } else {
                let Some(bit) = attribute.write_mask_bit() else {
                    return Err(Error::AccessDenied(format!("{attribute:?} is not writable")));
                };
                if check_access && n.write_mask & bit == 0 {
                    return Err(Error::AccessDenied(format!("write mask of {node} forbids {attribute:?}")));
                }
                let Some(n) = store.node_mut(node) else {
                    return Err(Error::NodeNotFound(node.clone()));
                };
                apply_attribute(n, attribute, value.value.clone())?;
                ValueWrite::Attribute
            }
        };
        trace!(node = %node, ?attribute, "attribute written");

        match outcome {
            ValueWrite::Stored { historizing, context } => {
                if historizing {
                    if let Some(history) = self.history() {
                        history.record_update(node, value.clone());
                    }
                }
                if let Some(ctx) = context.and_then(|h| self.contexts.get(h)) {
                    self.call_hook(|| ctx.write_value(self, node, &value));
                }
            }
            ValueWrite::DataSource(context) => {
                let ctx = context
                    .and_then(|h| self.contexts.get(h))
                    .ok_or_else(|| Error::ContextFailure(format!("data source variable {node} has no context")))?;
                self.call_hook(|| ctx.write_data(self, node, &value))?;
            }
            ValueWrite::Attribute => {}
        }
        Ok(())
    }
}
