//! Well-known namespace 0 node identifiers.
//!
//! Only the subset the engine bootstraps and relies on is listed here.

use super::NodeId;

pub const ROOT_FOLDER: NodeId = NodeId::ns0(84);
pub const OBJECTS_FOLDER: NodeId = NodeId::ns0(85);
pub const TYPES_FOLDER: NodeId = NodeId::ns0(86);
pub const VIEWS_FOLDER: NodeId = NodeId::ns0(87);
pub const OBJECT_TYPES_FOLDER: NodeId = NodeId::ns0(88);
pub const VARIABLE_TYPES_FOLDER: NodeId = NodeId::ns0(89);
pub const DATA_TYPES_FOLDER: NodeId = NodeId::ns0(90);
pub const REFERENCE_TYPES_FOLDER: NodeId = NodeId::ns0(91);
pub const SERVER: NodeId = NodeId::ns0(2253);

// Reference types
pub const REFERENCES: NodeId = NodeId::ns0(31);
pub const NON_HIERARCHICAL_REFERENCES: NodeId = NodeId::ns0(32);
pub const HIERARCHICAL_REFERENCES: NodeId = NodeId::ns0(33);
pub const HAS_CHILD: NodeId = NodeId::ns0(34);
pub const ORGANIZES: NodeId = NodeId::ns0(35);
pub const HAS_EVENT_SOURCE: NodeId = NodeId::ns0(36);
pub const HAS_MODELLING_RULE: NodeId = NodeId::ns0(37);
pub const HAS_TYPE_DEFINITION: NodeId = NodeId::ns0(40);
pub const AGGREGATES: NodeId = NodeId::ns0(44);
pub const HAS_SUBTYPE: NodeId = NodeId::ns0(45);
pub const HAS_PROPERTY: NodeId = NodeId::ns0(46);
pub const HAS_COMPONENT: NodeId = NodeId::ns0(47);
pub const HAS_NOTIFIER: NodeId = NodeId::ns0(48);
pub const HAS_ORDERED_COMPONENT: NodeId = NodeId::ns0(49);

// Modelling rules
pub const MODELLING_RULE_MANDATORY: NodeId = NodeId::ns0(78);
pub const MODELLING_RULE_OPTIONAL: NodeId = NodeId::ns0(80);

// Object and variable types
pub const BASE_OBJECT_TYPE: NodeId = NodeId::ns0(58);
pub const FOLDER_TYPE: NodeId = NodeId::ns0(61);
pub const BASE_VARIABLE_TYPE: NodeId = NodeId::ns0(62);
pub const BASE_DATA_VARIABLE_TYPE: NodeId = NodeId::ns0(63);
pub const PROPERTY_TYPE: NodeId = NodeId::ns0(68);
pub const MODELLING_RULE_TYPE: NodeId = NodeId::ns0(77);
pub const SERVER_TYPE: NodeId = NodeId::ns0(2004);

// Events
pub const BASE_EVENT_TYPE: NodeId = NodeId::ns0(2041);
pub const EVENT_ID: NodeId = NodeId::ns0(2042);
pub const EVENT_TYPE: NodeId = NodeId::ns0(2043);
pub const SOURCE_NODE: NodeId = NodeId::ns0(2044);
pub const SOURCE_NAME: NodeId = NodeId::ns0(2045);
pub const TIME: NodeId = NodeId::ns0(2046);
pub const RECEIVE_TIME: NodeId = NodeId::ns0(2047);
pub const MESSAGE: NodeId = NodeId::ns0(2050);
pub const SEVERITY: NodeId = NodeId::ns0(2051);

// Data types
pub const BOOLEAN: NodeId = NodeId::ns0(1);
pub const SBYTE: NodeId = NodeId::ns0(2);
pub const BYTE: NodeId = NodeId::ns0(3);
pub const INT16: NodeId = NodeId::ns0(4);
pub const UINT16: NodeId = NodeId::ns0(5);
pub const INT32: NodeId = NodeId::ns0(6);
pub const UINT32: NodeId = NodeId::ns0(7);
pub const INT64: NodeId = NodeId::ns0(8);
pub const UINT64: NodeId = NodeId::ns0(9);
pub const FLOAT: NodeId = NodeId::ns0(10);
pub const DOUBLE: NodeId = NodeId::ns0(11);
pub const STRING: NodeId = NodeId::ns0(12);
pub const DATE_TIME: NodeId = NodeId::ns0(13);
pub const GUID: NodeId = NodeId::ns0(14);
pub const BYTE_STRING: NodeId = NodeId::ns0(15);
pub const NODE_ID: NodeId = NodeId::ns0(17);
pub const STATUS_CODE: NodeId = NodeId::ns0(19);
pub const QUALIFIED_NAME: NodeId = NodeId::ns0(20);
pub const LOCALIZED_TEXT: NodeId = NodeId::ns0(21);
pub const BASE_DATA_TYPE: NodeId = NodeId::ns0(24);
pub const NUMBER: NodeId = NodeId::ns0(26);
pub const INTEGER: NodeId = NodeId::ns0(27);
pub const UINTEGER: NodeId = NodeId::ns0(28);
