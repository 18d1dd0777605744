//! Methods: Method nodes backed by registered handlers.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address_space::{check_value, AddNodeRequest};
use crate::model::{ids, value_rank, BuiltinType, NodeAttributes, NodeId, QualifiedName, StatusCode, Variant};
use crate::{Error, Result};

use super::{ServerRuntime, SessionId};

/// Declared input or output argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub data_type: NodeId,
    pub value_rank: i32,
}

impl Argument {
    pub fn new(name: impl Into<String>, data_type: BuiltinType) -> Self {
        Self { name: name.into(), data_type: data_type.data_type_id(), value_rank: value_rank::SCALAR }
    }

    pub fn array(name: impl Into<String>, data_type: BuiltinType) -> Self {
        Self { value_rank: value_rank::ONE_DIMENSION, ..Self::new(name, data_type) }
    }
}

/// `handler(runtime, object, inputs)`; inputs are already checked against
/// the declared arguments.
pub type MethodHandler = Arc<dyn Fn(&ServerRuntime, &NodeId, &[Variant]) -> Result<Vec<Variant>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMethodRequest {
    pub object_id: NodeId,
    pub method_id: NodeId,
    pub input_arguments: Vec<Variant>,
}

impl CallMethodRequest {
    pub fn new(object_id: NodeId, method_id: NodeId, input_arguments: Vec<Variant>) -> Self {
        Self { object_id, method_id, input_arguments }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMethodResult {
    pub status: StatusCode,
    /// One status per input when argument checking failed, else empty.
    pub input_argument_results: Vec<StatusCode>,
    pub output_arguments: Vec<Variant>,
}

impl CallMethodResult {
    fn failed(status: StatusCode) -> Self {
        Self { status, input_argument_results: Vec::new(), output_arguments: Vec::new() }
    }
}

struct MethodEntry {
    inputs: Vec<Argument>,
    outputs: Vec<Argument>,
    handler: MethodHandler,
}

#[derive(Default)]
pub(crate) struct MethodRegistry {
    methods: RwLock<HashMap<NodeId, MethodEntry>>,
}

fn argument_names(args: &[Argument]) -> Result<Variant> {
    Variant::array(BuiltinType::String, args.iter().map(|a| Variant::from(a.name.as_str())).collect())
}

impl ServerRuntime {
    /// Add a Method node below `parent` (HasComponent) with InputArguments
    /// and OutputArguments properties, and bind `handler` to it.
    pub fn add_method<F>(
        &self,
        parent: &NodeId,
        name: impl Into<QualifiedName>,
        inputs: Vec<Argument>,
        outputs: Vec<Argument>,
        handler: F,
    ) -> Result<NodeId>
    where
        F: Fn(&ServerRuntime, &NodeId, &[Variant]) -> Result<Vec<Variant>> + Send + Sync + 'static,
    {
        let space = self.address_space();
        let name = name.into();
        let namespace = name.namespace;
        let method = space.add_node(AddNodeRequest::new(parent.clone(), ids::HAS_COMPONENT, name, NodeAttributes::method()))?;
        if !inputs.is_empty() {
            space.add_property(&method, "InputArguments", argument_names(&inputs)?, namespace)?;
        }
        if !outputs.is_empty() {
            space.add_property(&method, "OutputArguments", argument_names(&outputs)?, namespace)?;
        }
        debug!(method = %method, inputs = inputs.len(), "method added");
        self.methods.methods.write().insert(method.clone(), MethodEntry { inputs, outputs, handler: Arc::new(handler) });
        Ok(method)
    }

    /// Declared (inputs, outputs) of a registered method.
    pub fn method_arguments(&self, method: &NodeId) -> Option<(Vec<Argument>, Vec<Argument>)> {
        self.methods.methods.read().get(method).map(|e| (e.inputs.clone(), e.outputs.clone()))
    }

    /// Invoke a method on `object` for `session`.
    pub fn call(&self, session: SessionId, request: &CallMethodRequest) -> CallMethodResult {
        let space = self.address_space();
        let (inputs, handler) = match self.methods.methods.read().get(&request.method_id) {
            Some(e) => (e.inputs.clone(), e.handler.clone()),
            None => return CallMethodResult::failed(Error::MethodNotFound(request.method_id.clone()).status_code()),
        };
        if !space.contains(&request.object_id) {
            return CallMethodResult::failed(StatusCode::BAD_NODE_ID_UNKNOWN);
        }

        let bound = space.with_store(|s| {
            s.refs(&request.object_id)
                .iter()
                .any(|r| r.is_forward && r.target == request.method_id)
        });
        if !bound {
            return CallMethodResult::failed(StatusCode::BAD_METHOD_INVALID);
        }

        let executable = space
            .node(&request.method_id)
            .and_then(|n| n.attribute(crate::model::AttributeId::Executable))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !executable || !self.access().user_executable(session, &request.method_id, &request.object_id) {
            return CallMethodResult::failed(StatusCode::BAD_USER_ACCESS_DENIED);
        }

        if request.input_arguments.len() < inputs.len() {
            return CallMethodResult::failed(StatusCode::BAD_ARGUMENTS_MISSING);
        }
        if request.input_arguments.len() > inputs.len() {
            return CallMethodResult::failed(StatusCode::BAD_TOO_MANY_ARGUMENTS);
        }
        let checks: Vec<StatusCode> = space.with_store(|s| {
            inputs
                .iter()
                .zip(&request.input_arguments)
                .map(|(arg, value)| match check_value(s, &arg.data_type, arg.value_rank, value) {
                    Ok(()) => StatusCode::GOOD,
                    Err(e) => e.status_code(),
                })
                .collect()
        });
        if checks.iter().any(|c| c.is_bad()) {
            return CallMethodResult {
                status: StatusCode::BAD_INVALID_ARGUMENT,
                input_argument_results: checks,
                output_arguments: Vec::new(),
            };
        }

        match handler(self, &request.object_id, &request.input_arguments) {
            Ok(output_arguments) => {
                space.apply_deferred();
                CallMethodResult { status: StatusCode::GOOD, input_argument_results: Vec::new(), output_arguments }
            }
            Err(e) => {
                debug!(method = %request.method_id, error = %e, "method failed");
                CallMethodResult::failed(e.status_code())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn setup() -> (ServerRuntime, SessionId, NodeId, NodeId) {
        let rt = ServerRuntime::new(ServerConfig::default()).unwrap();
        let s = rt.create_session("s", 0.0).unwrap().id;
        rt.activate_session(s, None).unwrap();
        let pump = rt.address_space().add_folder(&NodeId::OBJECTS, "Pump", 1).unwrap();
        let add = rt
            .add_method(
                &pump,
                "1:Add",
                vec![Argument::new("a", BuiltinType::Int32), Argument::new("b", BuiltinType::Int32)],
                vec![Argument::new("sum", BuiltinType::Int32)],
                |_, _, args| match args {
                    [Variant::Int32(a), Variant::Int32(b)] => Ok(vec![Variant::Int32(a + b)]),
                    _ => Err(Error::InvalidArgument("expected two Int32".into())),
                },
            )
            .unwrap();
        (rt, s, pump, add)
    }

    #[test]
    fn test_call_runs_handler() {
        let (rt, s, pump, add) = setup();
        let result = rt.call(s, &CallMethodRequest::new(pump, add.clone(), vec![2i32.into(), 3i32.into()]));
        assert_eq!(result.status, StatusCode::GOOD);
        assert_eq!(result.output_arguments, vec![Variant::Int32(5)]);

        let (inputs, outputs) = rt.method_arguments(&add).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(outputs[0].name, "sum");
        assert_eq!(rt.methods.methods.read().len(), 1);
    }

    #[test]
    fn test_call_validates_binding_and_arguments() {
        let (rt, s, pump, add) = setup();
        let call = |object: &NodeId, args: Vec<Variant>| rt.call(s, &CallMethodRequest::new(object.clone(), add.clone(), args));

        assert_eq!(call(&pump, vec![1i32.into()]).status, StatusCode::BAD_ARGUMENTS_MISSING);
        assert_eq!(
            call(&pump, vec![1i32.into(), 2i32.into(), 3i32.into()]).status,
            StatusCode::BAD_TOO_MANY_ARGUMENTS
        );
        let mismatch = call(&pump, vec![1i32.into(), "two".into()]);
        assert_eq!(mismatch.status, StatusCode::BAD_INVALID_ARGUMENT);
        assert_eq!(mismatch.input_argument_results[0], StatusCode::GOOD);
        assert!(mismatch.input_argument_results[1].is_bad());

        assert_eq!(call(&NodeId::OBJECTS, vec![1i32.into(), 2i32.into()]).status, StatusCode::BAD_METHOD_INVALID);
        assert_eq!(
            call(&NodeId::numeric(1, 999_999), vec![1i32.into(), 2i32.into()]).status,
            StatusCode::BAD_NODE_ID_UNKNOWN
        );
        let unknown = rt.call(s, &CallMethodRequest::new(pump, NodeId::numeric(1, 999_998), vec![]));
        assert_eq!(unknown.status, StatusCode::BAD_METHOD_INVALID);
    }
}
