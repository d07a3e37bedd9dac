//! Structural patterns over tensor graphs
//!
//! A pattern is a tree mirroring the shape of the subgraphs it should
//! match. Symbols are wildcard leaves bound consistently within one match;
//! operator nodes can carry a capture name so callers get a handle on
//! interior nodes, not just the root.

use crate::tensor::Dtype;
use serde::{Deserialize, Serialize};

/// Filter for leaf tensors (variables and remote references)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeafPattern {
    /// Variable label; `None` matches any leaf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<Dtype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
}

/// Operator node with argument sub-patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpPattern {
    pub op: String,
    pub args: Vec<PatternNode>,
    /// Bind the matched node under this name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,
}

/// One node of a structural pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternNode {
    /// Wildcard bound consistently: two uses of the same symbol must match
    /// the same tensor handle
    Symbol(String),
    /// Scalar constant with this exact value
    Constant(f64),
    Leaf(LeafPattern),
    Operator(OpPattern),
}

impl PatternNode {
    pub fn symbol(name: impl Into<String>) -> Self {
        PatternNode::Symbol(name.into())
    }

    pub fn scalar(value: f64) -> Self {
        PatternNode::Constant(value)
    }

    pub fn any_leaf() -> Self {
        PatternNode::Leaf(LeafPattern::default())
    }

    pub fn leaf_labeled(label: impl Into<String>) -> Self {
        PatternNode::Leaf(LeafPattern {
            label: Some(label.into()),
            ..Default::default()
        })
    }

    pub fn operator(op: impl Into<String>, args: Vec<PatternNode>) -> Self {
        PatternNode::Operator(OpPattern {
            op: op.into(),
            args,
            capture: None,
        })
    }

    pub fn captured(op: impl Into<String>, args: Vec<PatternNode>, name: impl Into<String>) -> Self {
        PatternNode::Operator(OpPattern {
            op: op.into(),
            args,
            capture: Some(name.into()),
        })
    }
}
