//! # Node Contexts
//!
//! A node may carry a [`ContextHandle`] pointing into the
//! [`ContextRegistry`] side-table. The context supplies life-cycle hooks
//! (construct/destruct) and value callbacks that the address space invokes
//! at the matching points:
//!
//! | Hook | When |
//! |------|------|
//! | `construct` | after the node and its parent reference are inserted |
//! | `destruct` | after the node has been removed by `delete_node` |
//! | `read_data` / `write_data` | instead of stored storage, for data-source variables |
//! | `read_value` | before a Value read returns |
//! | `write_value` | after a Value write is stored |
//!
//! No address-space lock is held while a hook runs. Mutations the hook makes
//! through the address space are queued and applied once the outer
//! operation finishes.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::address_space::AddressSpace;
use crate::model::{ContextHandle, DataValue, NodeId};
use crate::{Error, Result};

/// Capability set attached to nodes. Every hook has a safe default.
pub trait NodeContext: Send + Sync {
    /// Name used for lookup through [`ContextRegistry::find`].
    fn name(&self) -> &str;

    /// A failure removes the freshly added node again.
    fn construct(&self, _space: &AddressSpace, _node: &NodeId) -> Result<()> {
        Ok(())
    }

    fn destruct(&self, _space: &AddressSpace, _node: &NodeId) {}

    fn read_data(&self, _space: &AddressSpace, node: &NodeId) -> Result<DataValue> {
        Err(Error::NotSupported(format!("context '{}' has no data source for {node}", self.name())))
    }

    fn write_data(&self, _space: &AddressSpace, node: &NodeId, _value: &DataValue) -> Result<()> {
        Err(Error::NotSupported(format!("context '{}' cannot write {node}", self.name())))
    }

    /// May adjust the value about to be returned.
    fn read_value(&self, _space: &AddressSpace, _node: &NodeId, _value: &mut DataValue) {}

    fn write_value(&self, _space: &AddressSpace, _node: &NodeId, _value: &DataValue) {}
}

type ReadFn = dyn Fn(&AddressSpace, &NodeId) -> Result<DataValue> + Send + Sync;
type WriteFn = dyn Fn(&AddressSpace, &NodeId, &DataValue) -> Result<()> + Send + Sync;

/// Closure-backed data source, the common case for data-source variables.
pub struct DataSourceContext {
    name: String,
    read: Box<ReadFn>,
    write: Option<Box<WriteFn>>,
}

impl DataSourceContext {
    pub fn new(
        name: impl Into<String>,
        read: impl Fn(&AddressSpace, &NodeId) -> Result<DataValue> + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), read: Box::new(read), write: None }
    }

    pub fn with_write(
        mut self,
        write: impl Fn(&AddressSpace, &NodeId, &DataValue) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.write = Some(Box::new(write));
        self
    }
}

impl NodeContext for DataSourceContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_data(&self, space: &AddressSpace, node: &NodeId) -> Result<DataValue> {
        (self.read)(space, node)
    }

    fn write_data(&self, space: &AddressSpace, node: &NodeId, value: &DataValue) -> Result<()> {
        match &self.write {
            Some(write) => write(space, node, value),
            None => Err(Error::AccessDenied(format!("data source '{}' is read-only", self.name))),
        }
    }
}

// ============================================================================
// ContextRegistry
// ============================================================================

/// Side-table of contexts addressed by handle.
#[derive(Default)]
pub struct ContextRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    contexts: HashMap<u32, Arc<dyn NodeContext>>,
    next: u32,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, context: Arc<dyn NodeContext>) -> ContextHandle {
        let mut inner = self.inner.write();
        inner.next += 1;
        let handle = inner.next;
        tracing::debug!(name = context.name(), handle, "node context registered");
        inner.contexts.insert(handle, context);
        ContextHandle(handle)
    }

    /// First registered context with the given name.
    pub fn find(&self, name: &str) -> Option<ContextHandle> {
        let inner = self.inner.read();
        inner
            .contexts
            .iter()
            .filter(|(_, c)| c.name() == name)
            .map(|(h, _)| *h)
            .min()
            .map(ContextHandle)
    }

    pub fn get(&self, handle: ContextHandle) -> Option<Arc<dyn NodeContext>> {
        self.inner.read().contexts.get(&handle.0).cloned()
    }

    /// Nodes still holding the handle fall back to default behaviour.
    pub fn unregister(&self, handle: ContextHandle) -> Option<Arc<dyn NodeContext>> {
        self.inner.write().contexts.remove(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.inner.read().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry").field("len", &self.len()).finish()
    }
}
