//! Attribute services: Read and Write.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::{access_level, AttributeId, DataValue, NodeAttributes, NodeId, StatusCode, TimestampsToReturn, Variant};
use crate::runtime::{ServerRuntime, SessionId};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadValueId {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub timestamps_to_return: TimestampsToReturn,
    pub nodes_to_read: Vec<ReadValueId>,
}

impl ReadRequest {
    /// Value attribute of every node, both timestamps.
    pub fn values(nodes: Vec<NodeId>) -> Self {
        Self {
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: nodes
                .into_iter()
                .map(|node_id| ReadValueId { node_id, attribute_id: AttributeId::Value })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    /// One per node to read; failures carry a bad status.
    pub results: Vec<DataValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteValue {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
    pub value: DataValue,
}

impl WriteValue {
    pub fn value(node_id: NodeId, value: impl Into<Variant>) -> Self {
        Self { node_id, attribute_id: AttributeId::Value, value: DataValue::new_now(value) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub nodes_to_write: Vec<WriteValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub results: Vec<StatusCode>,
}

impl ServerRuntime {
    pub fn read(&self, session: SessionId, request: &ReadRequest) -> Result<ReadResponse> {
        self.check_session(session)?;
        let results = request
            .nodes_to_read
            .iter()
            .map(|r| match self.read_one(session, r) {
                Ok(value) => request.timestamps_to_return.apply(value),
                Err(e) => DataValue::from_status(e.status_code(), Utc::now()),
            })
            .collect();
        Ok(ReadResponse { results })
    }

    fn read_one(&self, session: SessionId, r: &ReadValueId) -> Result<DataValue> {
        let access = self.access();
        let node = self.space.node(&r.node_id).ok_or_else(|| Error::NodeNotFound(r.node_id.clone()))?;
        match r.attribute_id {
            AttributeId::Value => {
                if let NodeAttributes::Variable(v) = &node.attributes {
                    if v.access_level & access_level::CURRENT_READ == 0 {
                        return Err(Error::AccessDenied(format!("{} is not readable", r.node_id)));
                    }
                    if access.user_access_level(session, &r.node_id) & access_level::CURRENT_READ == 0 {
                        return Err(Error::AccessDenied(format!("{} is not readable by session {session}", r.node_id)));
                    }
                }
                self.space.read_attribute(&r.node_id, AttributeId::Value)
            }
            AttributeId::UserAccessLevel => {
                let level = node
                    .attribute(AttributeId::AccessLevel)
                    .and_then(|v| if let Variant::Byte(b) = v { Some(b) } else { None })
                    .ok_or_else(|| Error::AttributeNotApplicable { node: r.node_id.clone(), attribute: r.attribute_id })?;
                Ok(DataValue::new_now(level & access.user_access_level(session, &r.node_id)))
            }
            AttributeId::UserWriteMask => {
                Ok(DataValue::new_now(node.write_mask & access.user_write_mask(session, &r.node_id)))
            }
            AttributeId::UserExecutable => {
                let executable = node
                    .attribute(AttributeId::Executable)
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| Error::AttributeNotApplicable { node: r.node_id.clone(), attribute: r.attribute_id })?;
                Ok(DataValue::new_now(executable && access.user_executable(session, &r.node_id, &NodeId::NULL)))
            }
            other => self.space.read_attribute(&r.node_id, other),
        }
    }

    pub fn write(&self, session: SessionId, request: WriteRequest) -> Result<WriteResponse> {
        self.check_session(session)?;
        let results = request
            .nodes_to_write
            .into_iter()
            .map(|w| match self.write_one(session, w) {
                Ok(()) => StatusCode::GOOD,
                Err(e) => e.status_code(),
            })
            .collect();
        Ok(WriteResponse { results })
    }

    fn write_one(&self, session: SessionId, w: WriteValue) -> Result<()> {
        let access = self.access();
        let node = self.space.node(&w.node_id).ok_or_else(|| Error::NodeNotFound(w.node_id.clone()))?;
        if w.attribute_id == AttributeId::Value {
            if let NodeAttributes::Variable(v) = &node.attributes {
                if v.access_level & access_level::CURRENT_WRITE == 0 {
                    return Err(Error::AccessDenied(format!("{} is not writable", w.node_id)));
                }
            }
            if access.user_access_level(session, &w.node_id) & access_level::CURRENT_WRITE == 0 {
                return Err(Error::AccessDenied(format!("{} is not writable by session {session}", w.node_id)));
            }
            return self.space.write_data_value(&w.node_id, w.value);
        }
        if let Some(bit) = w.attribute_id.write_mask_bit() {
            if access.user_write_mask(session, &w.node_id) & bit == 0 {
                return Err(Error::AccessDenied(format!("write mask of session {session} forbids {:?}", w.attribute_id)));
            }
        }
        self.space.write_attribute(&w.node_id, w.attribute_id, w.value.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessControl;
    use crate::config::ServerConfig;
    use crate::model::VariableAttributes;
    use std::sync::Arc;

    struct ReadOnlyUsers;

    impl AccessControl for ReadOnlyUsers {
        fn user_access_level(&self, _: SessionId, _: &NodeId) -> u8 {
            access_level::CURRENT_READ
        }
    }

    fn setup() -> (ServerRuntime, SessionId, NodeId) {
        let rt = ServerRuntime::new(ServerConfig::default()).unwrap();
        let s = rt.create_session("s", 0.0).unwrap().id;
        rt.activate_session(s, None).unwrap();
        let node = rt.address_space().add_variable(&NodeId::OBJECTS, "Speed", 1.5f64, 1).unwrap();
        (rt, s, node)
    }

    #[test]
    fn test_read_write_value() {
        let (rt, s, node) = setup();
        let written = rt.write(s, WriteRequest { nodes_to_write: vec![WriteValue::value(node.clone(), 3.0f64)] }).unwrap();
        assert_eq!(written.results, vec![StatusCode::GOOD]);

        let mut request = ReadRequest::values(vec![node.clone(), NodeId::numeric(1, 999_999)]);
        request.timestamps_to_return = TimestampsToReturn::Neither;
        let read = rt.read(s, &request).unwrap();
        assert_eq!(read.results[0].value, Variant::Double(3.0));
        assert_eq!(read.results[0].source_timestamp, None);
        assert_eq!(read.results[1].status, StatusCode::BAD_NODE_ID_UNKNOWN);

        let mismatch = rt.write(s, WriteRequest { nodes_to_write: vec![WriteValue::value(node, "fast")] }).unwrap();
        assert_eq!(mismatch.results, vec![StatusCode::BAD_TYPE_MISMATCH]);
    }

    #[test]
    fn test_access_levels_are_enforced() {
        let (rt, s, _) = setup();
        let hidden = rt
            .address_space()
            .add_variable_with(&NodeId::OBJECTS, "Hidden", VariableAttributes::new(1i32).with_access_level(0), 1)
            .unwrap();
        let read = rt.read(s, &ReadRequest::values(vec![hidden.clone()])).unwrap();
        assert_eq!(read.results[0].status, StatusCode::BAD_USER_ACCESS_DENIED);

        let (rt, s, node) = setup();
        rt.set_access_control(Arc::new(ReadOnlyUsers));
        let written = rt.write(s, WriteRequest { nodes_to_write: vec![WriteValue::value(node.clone(), 2.0f64)] }).unwrap();
        assert_eq!(written.results, vec![StatusCode::BAD_USER_ACCESS_DENIED]);

        let level = rt
            .read(s, &ReadRequest {
                timestamps_to_return: TimestampsToReturn::Both,
                nodes_to_read: vec![ReadValueId { node_id: node, attribute_id: AttributeId::UserAccessLevel }],
            })
            .unwrap();
        assert_eq!(level.results[0].value, Variant::Byte(access_level::CURRENT_READ));
    }
}
