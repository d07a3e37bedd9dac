//! Graph descriptions and the adjacency model over them
//!
//! A `GraphDescription` is the serialized form of a graph fragment: the
//! unit that is partitioned, segmented, shipped between peers and
//! materialized into runtime tensors. `GraphNode` is the transient
//! adjacency view used only while partitioning.

pub mod partition;
pub mod segment;
pub mod serial;
pub mod topology;

use crate::tensor::Dtype;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared value input of a graph (a named placeholder)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInput {
    pub id: String,
    pub dtype: Dtype,
    pub shape: Vec<usize>,
}

/// Constant initializer carried by value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializerDef {
    pub id: String,
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

/// One operation node; `inputs` reference other ids in dependency order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDef {
    pub id: String,
    pub op: String,
    pub inputs: Vec<String>,
}

/// Serialized graph fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    pub inputs: Vec<ValueInput>,
    pub initializers: Vec<InitializerDef>,
    /// Operation nodes, children before parents
    pub nodes: Vec<OperationDef>,
    /// Root ids of this fragment
    pub outputs: Vec<String>,
}

impl GraphDescription {
    pub fn contains(&self, id: &str) -> bool {
        self.inputs.iter().any(|i| i.id == id)
            || self.initializers.iter().any(|i| i.id == id)
            || self.nodes.iter().any(|n| n.id == id)
    }

    /// Total number of declared nodes of any kind
    pub fn len(&self) -> usize {
        self.inputs.len() + self.initializers.len() + self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Kind of a graph node as seen by the partitioner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Input,
    Initializer,
    Operation(String),
}

/// Transient adjacency node extracted from a description
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    /// Dependency ids, in declaration order
    pub deps: Vec<String>,
}

/// Id-keyed adjacency model over one description
pub type GraphMap = HashMap<String, GraphNode>;

/// Build the adjacency model for partitioning.
pub fn extract_nodes(desc: &GraphDescription) -> GraphMap {
    let mut out = GraphMap::new();
    for input in &desc.inputs {
        out.insert(
            input.id.clone(),
            GraphNode {
                id: input.id.clone(),
                kind: NodeKind::Input,
                deps: vec![],
            },
        );
    }
    for init in &desc.initializers {
        out.insert(
            init.id.clone(),
            GraphNode {
                id: init.id.clone(),
                kind: NodeKind::Initializer,
                deps: vec![],
            },
        );
    }
    for node in &desc.nodes {
        out.insert(
            node.id.clone(),
            GraphNode {
                id: node.id.clone(),
                kind: NodeKind::Operation(node.op.clone()),
                deps: node.inputs.clone(),
            },
        );
    }
    out
}

/// Reverse adjacency: node id -> ids depending on it.
pub fn dependents(nodes: &GraphMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for node in nodes.values() {
        for dep in &node.deps {
            if nodes.contains_key(dep) {
                out.entry(dep.clone()).or_default().push(node.id.clone());
            }
        }
    }
    out
}

/// Merge `src` into `dst`, skipping entries `dst` already declares.
///
/// Outputs are unioned; used when stitching per-peer sub-descriptions back
/// into one graph.
pub fn merge_graph(dst: &mut GraphDescription, src: &GraphDescription) {
    for input in &src.inputs {
        if !dst.contains(&input.id) {
            dst.inputs.push(input.clone());
        }
    }
    for init in &src.initializers {
        if !dst.contains(&init.id) {
            dst.initializers.push(init.clone());
        }
    }
    for node in &src.nodes {
        if !dst.contains(&node.id) {
            dst.nodes.push(node.clone());
        }
    }
    for output in &src.outputs {
        if !dst.outputs.contains(output) {
            dst.outputs.push(output.clone());
        }
    }
}
