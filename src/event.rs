//! # Events
//!
//! Event types live in the address space as ObjectType subtypes of
//! BaseEventType; their properties (and those of every supertype) are the
//! event's fields. An [`Event`] is a detached record keyed by property
//! browse name, handed to the subscription engine for filtering.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address_space::{AddNodeRequest, AddressSpace};
use crate::model::{ids, LocalizedText, NodeAttributes, NodeId, QualifiedName, VariableAttributes, Variant};
use crate::{Error, Result};

pub const DEFAULT_SEVERITY: u16 = 100;

/// A triggered event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: NodeId,
    pub source: NodeId,
    /// Field values keyed by browse path, segments joined with `/`.
    pub fields: BTreeMap<String, Variant>,
}

impl Event {
    pub fn field(&self, path: &str) -> Option<&Variant> {
        self.fields.get(path)
    }

    pub fn set_field(&mut self, path: impl Into<String>, value: impl Into<Variant>) {
        self.fields.insert(path.into(), value.into());
    }

    pub fn with_field(mut self, path: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.set_field(path, value);
        self
    }

    pub fn with_message(self, message: impl Into<String>) -> Self {
        self.with_field("Message", LocalizedText::text(message))
    }

    pub fn with_severity(self, severity: u16) -> Self {
        self.with_field("Severity", severity)
    }

    pub fn severity(&self) -> Option<u16> {
        match self.field("Severity") {
            Some(Variant::UInt16(s)) => Some(*s),
            _ => None,
        }
    }
}

impl AddressSpace {
    /// New concrete event type below `supertype`, which must itself be an
    /// event type.
    pub fn add_event_type(&self, name: impl Into<QualifiedName>, supertype: &NodeId) -> Result<NodeId> {
        if !self.is_subtype_of(supertype, &ids::BASE_EVENT_TYPE) {
            return Err(Error::InvalidParent(supertype.clone()));
        }
        self.add_object_type(name, supertype)
    }

    /// Mandatory property of an event type; its value is the field default.
    pub fn add_event_property(
        &self,
        event_type: &NodeId,
        name: impl Into<QualifiedName>,
        default: impl Into<Variant>,
    ) -> Result<NodeId> {
        let id = self.add_node(
            AddNodeRequest::new(
                event_type.clone(),
                ids::HAS_PROPERTY,
                name,
                NodeAttributes::Variable(VariableAttributes::new(default)),
            )
            .with_type_definition(ids::PROPERTY_TYPE),
        )?;
        self.mark_mandatory(&id)?;
        Ok(id)
    }

    /// An event of `event_type` raised by `source`, every declared field set
    /// to its default and the standard fields filled in.
    pub fn create_event(&self, event_type: &NodeId, source: &NodeId) -> Result<Event> {
        if !self.is_subtype_of(event_type, &ids::BASE_EVENT_TYPE) {
            return Err(Error::InvalidArgument(format!("{event_type} is not an event type")));
        }
        let source_name = self
            .node(source)
            .map(|n| n.browse_name.name)
            .ok_or_else(|| Error::NodeNotFound(source.clone()))?;

        let mut fields: BTreeMap<String, Variant> = self.declared_variables(event_type).into_iter().collect();
        let now = Utc::now();
        fields.insert("EventId".into(), Variant::ByteString(Uuid::new_v4().as_bytes().to_vec()));
        fields.insert("EventType".into(), event_type.clone().into());
        fields.insert("SourceNode".into(), source.clone().into());
        fields.insert("SourceName".into(), source_name.into());
        fields.insert("Time".into(), now.into());
        fields.insert("ReceiveTime".into(), now.into());
        fields.insert("Severity".into(), DEFAULT_SEVERITY.into());

        Ok(Event { event_type: event_type.clone(), source: source.clone(), fields })
    }

    /// Nodes whose event monitored items see events from `source`: the
    /// source, every node reaching it through HasEventSource/HasNotifier
    /// (transitively), and the Server object.
    pub fn notifier_chain(&self, source: &NodeId) -> Vec<NodeId> {
        self.with_store(|s| {
            let mut chain = vec![source.clone()];
            let mut seen: HashSet<NodeId> = HashSet::from([source.clone()]);
            let mut i = 0;
            while i < chain.len() {
                let current = chain[i].clone();
                for e in s.refs(&current) {
                    if e.is_forward || !s.is_subtype_of(&e.reference_type, &ids::HAS_EVENT_SOURCE) {
                        continue;
                    }
                    if seen.insert(e.target.clone()) {
                        chain.push(e.target.clone());
                    }
                }
                i += 1;
            }
            if seen.insert(ids::SERVER) {
                chain.push(ids::SERVER);
            }
            chain
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_event_fills_standard_and_declared_fields() {
        let space = AddressSpace::default();
        let alarm = space.add_event_type("1:OverheatEvent", &ids::BASE_EVENT_TYPE).unwrap();
        space.add_event_property(&alarm, "1:Temperature", 0.0f64).unwrap();
        let source = space.add_folder(&NodeId::OBJECTS, "Boiler", 1).unwrap();

        let event = space.create_event(&alarm, &source).unwrap();
        assert_eq!(event.severity(), Some(DEFAULT_SEVERITY));
        assert_eq!(event.field("Temperature"), Some(&Variant::Double(0.0)));
        assert_eq!(event.field("SourceName"), Some(&Variant::from("Boiler")));
        assert_eq!(event.field("EventType"), Some(&Variant::from(alarm.clone())));
        assert!(matches!(event.field("EventId"), Some(Variant::ByteString(b)) if b.len() == 16));
        assert!(event.field("Message").is_some());

        let other = space.create_event(&alarm, &source).unwrap();
        assert_ne!(event.field("EventId"), other.field("EventId"));
    }

    #[test]
    fn test_event_type_must_derive_from_base_event() {
        let space = AddressSpace::default();
        assert!(matches!(
            space.add_event_type("1:NotAnEvent", &ids::BASE_OBJECT_TYPE),
            Err(Error::InvalidParent(_))
        ));
        assert!(matches!(
            space.create_event(&ids::FOLDER_TYPE, &ids::SERVER),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            space.create_event(&ids::BASE_EVENT_TYPE, &NodeId::numeric(1, 424242)),
            Err(Error::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_notifier_chain_follows_event_sources() {
        let space = AddressSpace::default();
        let area = space.add_folder(&NodeId::OBJECTS, "Area", 1).unwrap();
        let pump = space.add_folder(&area, "Pump", 1).unwrap();
        space.add_reference(&area, &ids::HAS_EVENT_SOURCE, &pump, true).unwrap();
        space.add_reference(&ids::SERVER, &ids::HAS_NOTIFIER, &area, true).unwrap();

        let chain = space.notifier_chain(&pump);
        assert_eq!(chain, vec![pump, area, ids::SERVER]);
    }
}
