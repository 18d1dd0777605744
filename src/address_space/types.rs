//! Object types and instantiation.
//!
//! An object type is an ObjectType node below its supertype (HasSubtype).
//! Children of the type flagged with the Mandatory modelling rule form the
//! instance declaration: [`AddressSpace::instantiate`] deep-copies them,
//! for the type and every supertype, onto each new instance.

use tracing::debug;

use crate::model::{
    ids, BuiltinValue, ContextHandle, Node, NodeAttributes, NodeClass, NodeId, QualifiedName,
    VariableAttributes, Variant,
};
use crate::{Error, Result};

use super::{AddNodeRequest, AddressSpace};

/// A child of a type or template node that must be copied.
struct Declaration {
    reference_type: NodeId,
    template: Node,
    type_definition: Option<NodeId>,
    modelling_rule: Option<NodeId>,
}

impl AddressSpace {
    pub fn add_object_type(&self, name: impl Into<QualifiedName>, supertype: &NodeId) -> Result<NodeId> {
        self.add_object_type_with_id(NodeId::NULL, name, supertype)
    }

    pub fn add_object_type_with_id(
        &self,
        requested_id: NodeId,
        name: impl Into<QualifiedName>,
        supertype: &NodeId,
    ) -> Result<NodeId> {
        if self.node_class(supertype) != Some(NodeClass::ObjectType) {
            return Err(Error::InvalidParent(supertype.clone()));
        }
        self.add_node(
            AddNodeRequest::new(supertype.clone(), ids::HAS_SUBTYPE, name, NodeAttributes::object_type(false))
                .with_id(requested_id),
        )
    }

    /// Variable declaration on an object type; DataType follows `T`.
    pub fn add_object_type_variable<T: BuiltinValue>(
        &self,
        object_type: &NodeId,
        name: impl Into<QualifiedName>,
        default: T,
        mandatory: bool,
    ) -> Result<NodeId> {
        let attrs = VariableAttributes::new(default).with_data_type(T::BUILTIN_TYPE.data_type_id());
        let id = self.add_node(
            AddNodeRequest::new(object_type.clone(), ids::HAS_COMPONENT, name, NodeAttributes::Variable(attrs))
                .with_type_definition(ids::BASE_DATA_VARIABLE_TYPE),
        )?;
        if mandatory {
            self.mark_mandatory(&id)?;
        }
        Ok(id)
    }

    /// Object declaration on an object type.
    pub fn add_object_type_object(
        &self,
        object_type: &NodeId,
        name: impl Into<QualifiedName>,
        type_definition: &NodeId,
        mandatory: bool,
    ) -> Result<NodeId> {
        let id = self.add_node(
            AddNodeRequest::new(object_type.clone(), ids::HAS_COMPONENT, name, NodeAttributes::object())
                .with_type_definition(type_definition.clone()),
        )?;
        if mandatory {
            self.mark_mandatory(&id)?;
        }
        Ok(id)
    }

    /// Create an instance of `object_type` under `parent`, copying every
    /// Mandatory declaration of the type and its supertypes with fresh ids.
    /// Folders organize their instances; any other parent gets a component.
    pub fn instantiate(
        &self,
        object_type: &NodeId,
        parent: &NodeId,
        name: impl Into<QualifiedName>,
        requested_id: NodeId,
        context: Option<ContextHandle>,
    ) -> Result<NodeId> {
        let (is_abstract, parent_is_folder) = self.with_store(|s| {
            let abstract_flag = match s.node(object_type).map(|n| &n.attributes) {
                Some(NodeAttributes::ObjectType(t)) => Some(t.is_abstract),
                _ => None,
            };
            let folder = s.type_definition(parent) == Some(&ids::FOLDER_TYPE);
            (abstract_flag, folder)
        });
        match is_abstract {
            None => return Err(Error::InvalidAttributes(format!("{object_type} is not an object type"))),
            Some(true) => return Err(Error::InvalidAttributes(format!("{object_type} is abstract"))),
            Some(false) => {}
        }

        let reference_type = if parent_is_folder { ids::ORGANIZES } else { ids::HAS_COMPONENT };
        let mut request = AddNodeRequest::new(parent.clone(), reference_type, name, NodeAttributes::object())
            .with_id(requested_id)
            .with_type_definition(object_type.clone());
        request.context = context;
        let instance = self.add_node(request)?;

        if let Err(e) = self.copy_type_declarations(object_type, &instance) {
            // Leave no half-built instance behind.
            let _ = self.delete_node(&instance, true);
            return Err(e);
        }
        debug!(instance = %instance, object_type = %object_type, "object instantiated");
        Ok(instance)
    }

    /// Copy the mandatory declarations of `type_id` and its supertypes onto
    /// `instance`. Declarations of a subtype shadow same-named ones further up.
    fn copy_type_declarations(&self, type_id: &NodeId, instance: &NodeId) -> Result<()> {
        let chain = self.with_store(|s| {
            let mut chain = vec![type_id.clone()];
            let mut current = type_id.clone();
            while let Some(parent) = s.supertype(&current) {
                if chain.contains(parent) {
                    break;
                }
                chain.push(parent.clone());
                current = parent.clone();
            }
            chain
        });
        for t in chain {
            self.copy_declarations(&t, instance)?;
        }
        Ok(())
    }

    fn declarations(&self, source: &NodeId) -> Vec<Declaration> {
        self.with_store(|s| {
            s.children(source)
                .into_iter()
                .filter(|(reference_type, _)| *reference_type != ids::HAS_SUBTYPE)
                .filter_map(|(reference_type, target)| {
                    let template = s.node(&target)?.clone();
                    Some(Declaration {
                        reference_type,
                        type_definition: s.type_definition(&target).cloned(),
                        modelling_rule: s.modelling_rule(&target).cloned(),
                        template,
                    })
                })
                .collect()
        })
    }

    /// Copy the Mandatory children of `source` onto `dest`, recursing into
    /// each copied child.
    fn copy_declarations(&self, source: &NodeId, dest: &NodeId) -> Result<()> {
        for decl in self.declarations(source) {
            if decl.modelling_rule.as_ref() != Some(&ids::MODELLING_RULE_MANDATORY) {
                continue;
            }
            let exists = self.get_child(dest, &decl.template.browse_name).is_some();
            if exists {
                continue;
            }

            let template = decl.template;
            let mut attributes = template.attributes.clone();
            if let NodeAttributes::Variable(v) = &mut attributes {
                v.value = crate::model::DataValue::new_now(v.value.value.clone());
            }
            let mut request = AddNodeRequest::new(dest.clone(), decl.reference_type, template.browse_name.clone(), attributes)
                .with_display_name(template.display_name.clone())
                .with_description(template.description.clone())
                .with_write_mask(template.write_mask);
            if let Some(td) = &decl.type_definition {
                request = request.with_type_definition(td.clone());
            }
            let copy = self.add_node(request)?;

            // Nested declarations of the template itself, then those of its
            // own object type.
            self.copy_declarations(&template.node_id, &copy)?;
            if template.node_class() == NodeClass::Object {
                if let Some(td) = decl.type_definition.filter(|td| *td != ids::BASE_OBJECT_TYPE && *td != ids::FOLDER_TYPE) {
                    self.copy_type_declarations(&td, &copy)?;
                }
            }
        }
        Ok(())
    }

    /// Default field values for an instance of `type_id`: every Mandatory
    /// variable of the type chain keyed by browse name, most derived first.
    pub(crate) fn declared_variables(&self, type_id: &NodeId) -> Vec<(String, Variant)> {
        let mut out: Vec<(String, Variant)> = Vec::new();
        let mut current = Some(type_id.clone());
        let mut guard = 0;
        while let Some(t) = current {
            for decl in self.declarations(&t) {
                if let NodeAttributes::Variable(v) = &decl.template.attributes {
                    let name = decl.template.browse_name.name.clone();
                    if !out.iter().any(|(n, _)| *n == name) {
                        out.push((name, v.value.value.clone()));
                    }
                }
            }
            current = self.with_store(|s| s.supertype(&t).cloned());
            guard += 1;
            if guard > 64 {
                break;
            }
        }
        out
    }
}
