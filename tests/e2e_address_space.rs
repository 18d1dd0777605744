//! End-to-end tests of the address space: node life cycle, type
//! instantiation, path resolution, context hooks and export.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::DateTime;
use opcua_engine::address_space::AddressSpace;
use opcua_engine::export::AddressSpaceSnapshot;
use opcua_engine::{
    ids, AddNodeRequest, AttributeId, DataValue, Error, LocalizedText, NodeAttributes, NodeContext, NodeId,
    QualifiedName, StatusCode, Variant,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use uuid::Uuid;

fn value_of(space: &AddressSpace, node: &NodeId) -> Variant {
    space.read_attribute(node, AttributeId::Value).unwrap().value
}

/// Create a variable typed by `initial`, write `next` and read it back.
fn write_read(initial: Variant, next: Variant) -> Variant {
    let space = AddressSpace::default();
    let node = space.add_variable(&NodeId::OBJECTS, "Value", initial, 1).unwrap();
    space.set_value(&node, next).unwrap();
    value_of(&space, &node)
}

fn node_id_strategy() -> impl Strategy<Value = NodeId> {
    prop_oneof![
        (any::<u16>(), any::<u32>()).prop_map(|(ns, i)| NodeId::numeric(ns, i)),
        (any::<u16>(), "[a-zA-Z0-9._]{1,24}").prop_map(|(ns, s)| NodeId::string(ns, s)),
        (any::<u16>(), any::<u128>()).prop_map(|(ns, g)| NodeId::guid(ns, Uuid::from_u128(g))),
        (any::<u16>(), prop::collection::vec(any::<u8>(), 1..16)).prop_map(|(ns, b)| NodeId::opaque(ns, b)),
    ]
}

// ============================================================================
// 1. Scalar values survive a write/read cycle
// ============================================================================

proptest! {
    #[test]
    fn test_int32_write_read(v in any::<i32>()) {
        let space = AddressSpace::default();
        let node = space.add_variable(&NodeId::OBJECTS, "Counter", 0i32, 1).unwrap();
        space.set_value(&node, Variant::Int32(v)).unwrap();
        prop_assert_eq!(value_of(&space, &node), Variant::Int32(v));
    }

    #[test]
    fn test_double_write_read(v in -1.0e12f64..1.0e12) {
        let space = AddressSpace::default();
        let node = space.add_variable(&NodeId::OBJECTS, "Level", 0.0f64, 1).unwrap();
        space.set_value(&node, Variant::Double(v)).unwrap();
        prop_assert_eq!(value_of(&space, &node), Variant::Double(v));
    }

    #[test]
    fn test_string_write_read(v in "[a-zA-Z0-9 ]{0,32}") {
        let space = AddressSpace::default();
        let node = space.add_variable(&NodeId::OBJECTS, "Label", "", 1).unwrap();
        space.set_value(&node, Variant::from(v.as_str())).unwrap();
        prop_assert_eq!(value_of(&space, &node), Variant::String(v));
    }

    #[test]
    fn test_boolean_write_read(v in any::<bool>()) {
        prop_assert_eq!(write_read(Variant::Boolean(!v), Variant::Boolean(v)), Variant::Boolean(v));
    }

    #[test]
    fn test_byte_write_read(s in any::<i8>(), u in any::<u8>()) {
        prop_assert_eq!(write_read(Variant::SByte(0), Variant::SByte(s)), Variant::SByte(s));
        prop_assert_eq!(write_read(Variant::Byte(0), Variant::Byte(u)), Variant::Byte(u));
    }

    #[test]
    fn test_int16_write_read(s in any::<i16>(), u in any::<u16>()) {
        prop_assert_eq!(write_read(Variant::Int16(0), Variant::Int16(s)), Variant::Int16(s));
        prop_assert_eq!(write_read(Variant::UInt16(0), Variant::UInt16(u)), Variant::UInt16(u));
    }

    #[test]
    fn test_uint32_write_read(v in any::<u32>()) {
        prop_assert_eq!(write_read(Variant::UInt32(0), Variant::UInt32(v)), Variant::UInt32(v));
    }

    #[test]
    fn test_int64_write_read(s in any::<i64>(), u in any::<u64>()) {
        prop_assert_eq!(write_read(Variant::Int64(0), Variant::Int64(s)), Variant::Int64(s));
        prop_assert_eq!(write_read(Variant::UInt64(0), Variant::UInt64(u)), Variant::UInt64(u));
    }

    #[test]
    fn test_float_write_read(v in -1.0e6f32..1.0e6) {
        prop_assert_eq!(write_read(Variant::Float(0.0), Variant::Float(v)), Variant::Float(v));
    }

    #[test]
    fn test_datetime_write_read(secs in 0i64..4_102_444_800, nanos in 0u32..1_000_000_000) {
        let v = DateTime::from_timestamp(secs, nanos).unwrap();
        let initial = DateTime::from_timestamp(0, 0).unwrap();
        prop_assert_eq!(write_read(Variant::DateTime(initial), Variant::DateTime(v)), Variant::DateTime(v));
    }

    #[test]
    fn test_guid_write_read(v in any::<u128>()) {
        let v = Uuid::from_u128(v);
        prop_assert_eq!(write_read(Variant::Guid(Uuid::nil()), Variant::Guid(v)), Variant::Guid(v));
    }

    #[test]
    fn test_byte_string_write_read(v in prop::collection::vec(any::<u8>(), 0..64)) {
        prop_assert_eq!(write_read(Variant::ByteString(Vec::new()), Variant::from(v.clone())), Variant::ByteString(v));
    }

    #[test]
    fn test_node_id_write_read(v in node_id_strategy()) {
        prop_assert_eq!(write_read(Variant::from(NodeId::NULL), Variant::from(v.clone())), Variant::from(v));
    }

    #[test]
    fn test_qualified_name_write_read(ns in any::<u16>(), name in "[a-zA-Z0-9_]{0,24}") {
        let v = QualifiedName::new(ns, name);
        let initial = QualifiedName::new(0, "");
        prop_assert_eq!(write_read(Variant::from(initial), Variant::from(v.clone())), Variant::from(v));
    }

    #[test]
    fn test_localized_text_write_read(locale in "([a-z]{2}(-[A-Z]{2})?)?", text in "[a-zA-Z0-9 ]{0,32}") {
        let v = LocalizedText::new(locale, text);
        prop_assert_eq!(write_read(Variant::from(LocalizedText::text("")), Variant::from(v.clone())), Variant::from(v));
    }
}

#[test]
fn test_write_with_wrong_type_is_rejected() {
    let space = AddressSpace::default();
    let node = space.add_variable(&NodeId::OBJECTS, "Speed", 1.0f64, 1).unwrap();
    let err = space.set_value(&node, Variant::from("fast")).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
    assert_eq!(value_of(&space, &node), Variant::Double(1.0));
}

// ============================================================================
// 2. Object types and instances
// ============================================================================

#[test]
fn test_motor_instances_are_independent() {
    let space = AddressSpace::default();
    let motor_type = space.add_object_type("1:MotorType", &ids::BASE_OBJECT_TYPE).unwrap();
    space.add_object_type_variable(&motor_type, "1:Speed", 0.0f64, true).unwrap();

    let motor1 = space.instantiate(&motor_type, &NodeId::OBJECTS, "1:Motor1", NodeId::NULL, None).unwrap();
    let motor2 = space.instantiate(&motor_type, &NodeId::OBJECTS, "1:Motor2", NodeId::NULL, None).unwrap();
    assert_eq!(space.type_definition(&motor1), Some(motor_type.clone()));

    let speed = QualifiedName::new(1, "Speed");
    let speed1 = space.get_child(&motor1, &speed).unwrap();
    let speed2 = space.get_child(&motor2, &speed).unwrap();
    assert_ne!(speed1, speed2);
    assert_eq!(value_of(&space, &speed1), Variant::Double(0.0));
    assert_eq!(value_of(&space, &speed2), Variant::Double(0.0));

    space.set_value(&speed1, Variant::Double(42.0)).unwrap();
    assert_eq!(value_of(&space, &speed1), Variant::Double(42.0));
    assert_eq!(value_of(&space, &speed2), Variant::Double(0.0));
}

#[test]
fn test_optional_declarations_are_not_copied() {
    let space = AddressSpace::default();
    let pump_type = space.add_object_type("1:PumpType", &ids::BASE_OBJECT_TYPE).unwrap();
    space.add_object_type_variable(&pump_type, "1:Flow", 0.0f64, true).unwrap();
    space.add_object_type_variable(&pump_type, "1:Notes", String::new(), false).unwrap();

    let pump = space.instantiate(&pump_type, &NodeId::OBJECTS, "1:Pump", NodeId::NULL, None).unwrap();
    assert!(space.get_child(&pump, &QualifiedName::new(1, "Flow")).is_some());
    assert!(space.get_child(&pump, &QualifiedName::new(1, "Notes")).is_none());
}

// ============================================================================
// 3. Node ids
// ============================================================================

#[test]
fn test_duplicate_id_leaves_space_unchanged() {
    let space = AddressSpace::default();
    let id = NodeId::numeric(1, 4242);
    let request = || {
        AddNodeRequest::new(NodeId::OBJECTS, ids::ORGANIZES, "1:Tank", NodeAttributes::object()).with_id(id.clone())
    };
    assert_eq!(space.add_node(request()).unwrap(), id);
    let before = space.node_count();

    let err = space.add_node(request()).unwrap_err();
    assert!(matches!(err, Error::DuplicateId(ref dup) if *dup == id));
    assert_eq!(err.status_code(), StatusCode::BAD_NODE_ID_EXISTS);
    assert_eq!(space.node_count(), before);
}

#[test]
fn test_null_id_generates_fresh_ids() {
    let space = AddressSpace::default();
    let a = space.add_folder(&NodeId::OBJECTS, "A", 1).unwrap();
    let b = space.add_folder(&NodeId::OBJECTS, "B", 1).unwrap();
    assert_ne!(a, b);
    assert_eq!(a.namespace, 1);
    assert!(space.contains(&a) && space.contains(&b));
}

#[test]
fn test_unknown_parent_is_rejected() {
    let space = AddressSpace::default();
    let before = space.node_count();
    let err = space.add_folder(&NodeId::numeric(1, 999_999), "Orphan", 1).unwrap_err();
    assert!(matches!(err, Error::InvalidParent(_)));
    assert_eq!(space.node_count(), before);
}

// ============================================================================
// 4. Browse paths
// ============================================================================

#[test]
fn test_translate_reports_partial_match() {
    let space = AddressSpace::default();
    let plant = space.add_folder(&NodeId::OBJECTS, "Plant", 1).unwrap();
    let line = space.add_folder(&plant, "Line1", 1).unwrap();

    let full = space.translate_browse_path(&NodeId::OBJECTS, &[QualifiedName::new(1, "Plant"), QualifiedName::new(1, "Line1")]);
    assert_eq!(full.status, StatusCode::GOOD);
    assert_eq!(full.node_id(), Some(&line));

    let partial = space.translate_browse_path(
        &NodeId::OBJECTS,
        &[QualifiedName::new(1, "Plant"), QualifiedName::new(1, "Line9"), QualifiedName::new(1, "Motor")],
    );
    assert_eq!(partial.status, StatusCode::BAD_NO_MATCH);
    assert_eq!(partial.targets.len(), 1);
    assert_eq!(partial.targets[0].node_id, plant);
    assert_eq!(partial.targets[0].remaining_path_index, 1);
    assert_eq!(partial.node_id(), None);
}

// ============================================================================
// 5. Context hooks and deferred mutations
// ============================================================================

struct Mirror {
    target: NodeId,
    queued_inside: AtomicUsize,
}

impl NodeContext for Mirror {
    fn name(&self) -> &str {
        "mirror"
    }

    fn write_value(&self, space: &AddressSpace, _node: &NodeId, value: &DataValue) {
        let _ = space.set_value(&self.target, value.value.clone());
        self.queued_inside.store(space.pending_deferred(), Ordering::SeqCst);
    }
}

#[test]
fn test_hook_mutations_apply_after_outer_write() {
    let space = AddressSpace::default();
    let copy = space.add_variable(&NodeId::OBJECTS, "Copy", 0i32, 1).unwrap();
    let mirror = Arc::new(Mirror { target: copy.clone(), queued_inside: AtomicUsize::new(0) });
    let handle = space.register_context(mirror.clone());
    let source = space
        .add_node(
            AddNodeRequest::new(NodeId::OBJECTS, ids::HAS_COMPONENT, "1:Source", NodeAttributes::variable(0i32))
                .with_type_definition(ids::BASE_DATA_VARIABLE_TYPE)
                .with_context(handle),
        )
        .unwrap();

    space.set_value(&source, Variant::Int32(7)).unwrap();
    assert_eq!(mirror.queued_inside.load(Ordering::SeqCst), 1, "queued while the hook ran");
    assert_eq!(space.pending_deferred(), 0);
    assert_eq!(value_of(&space, &copy), Variant::Int32(7));
}

#[test]
fn test_delete_node_cascades_to_components() {
    let space = AddressSpace::default();
    let before = space.node_count();
    let plant = space.add_folder(&NodeId::OBJECTS, "Plant", 1).unwrap();
    let speed = space.add_variable(&plant, "Speed", 0.0f64, 1).unwrap();

    assert_eq!(space.delete_node(&plant, true).unwrap(), 2);
    assert!(!space.contains(&plant));
    assert!(!space.contains(&speed));
    assert_eq!(space.node_count(), before);
    assert!(space.get_child(&NodeId::OBJECTS, &QualifiedName::new(1, "Plant")).is_none());
    assert!(matches!(space.delete_node(&plant, true), Err(Error::NodeNotFound(_))));
}

// ============================================================================
// 6. Export
// ============================================================================

#[test]
fn test_export_snapshot_parses_back() {
    let space = AddressSpace::default();
    let motor_type = space.add_object_type("1:MotorType", &ids::BASE_OBJECT_TYPE).unwrap();
    space.add_object_type_variable(&motor_type, "1:Speed", 0.0f64, true).unwrap();
    let motor = space.instantiate(&motor_type, &NodeId::OBJECTS, "1:Motor1", NodeId::NULL, None).unwrap();

    let mut out = Vec::new();
    space.export_json(&mut out).unwrap();
    let snapshot: AddressSpaceSnapshot = serde_json::from_slice(&out).unwrap();

    assert_eq!(snapshot.nodes.len(), 4, "type, declaration, instance, instance variable");
    let exported = snapshot.nodes.iter().find(|n| n.node.node_id == motor).unwrap();
    assert!(exported
        .references
        .iter()
        .any(|r| r.reference_type == ids::HAS_TYPE_DEFINITION && r.target == motor_type));
    assert_eq!(snapshot, space.snapshot());
}
