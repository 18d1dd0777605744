//! JSON snapshot export of the address space.
//!
//! Writes the namespace table and every node outside namespace 0 with its
//! forward references, as one JSON document:
//!
//! ```text
//! AddressSpace → export_json() → { "namespaces": [...], "nodes": [...] }
//!   → diffing, fixtures, offline inspection
//! ```
//!
//! Namespace 0 is left out; it is rebuilt identically by every runtime.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::address_space::AddressSpace;
use crate::model::{Node, NodeId};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedReference {
    pub reference_type: NodeId,
    pub target: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedNode {
    pub node: Node,
    pub references: Vec<ExportedReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressSpaceSnapshot {
    pub namespaces: Vec<String>,
    pub nodes: Vec<ExportedNode>,
}

impl AddressSpace {
    /// Snapshot of all application nodes, ordered by NodeId text.
    pub fn snapshot(&self) -> AddressSpaceSnapshot {
        let mut nodes: Vec<ExportedNode> = self.with_store(|store| {
            store
                .iter()
                .filter(|(node, _)| node.node_id.namespace != 0)
                .map(|(node, refs)| ExportedNode {
                    node: node.clone(),
                    references: refs
                        .iter()
                        .filter(|r| r.is_forward)
                        .map(|r| ExportedReference { reference_type: r.reference_type.clone(), target: r.target.clone() })
                        .collect(),
                })
                .collect()
        });
        nodes.sort_by_key(|n| n.node.node_id.to_string());
        AddressSpaceSnapshot { namespaces: self.namespaces(), nodes }
    }

    pub fn export_json(&self, writer: &mut dyn Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut *writer, &self.snapshot())?;
        writeln!(writer)?;
        Ok(())
    }
}
