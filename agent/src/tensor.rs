//! Runtime tensor handles
//!
//! A tensor is an immutable node in the locally visible computation graph.
//! Handles are `Arc`-shared; identity (for query captures and cache keys)
//! is pointer identity. Nodes owned by another peer appear as the
//! `Remote` variant rather than as a downcastable subtype.

use crate::reference::RemoteReference;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    F32,
    F64,
    I32,
}

impl Dtype {
    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F64 => 8,
            Dtype::I32 => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dtype::F32 => "f32",
            Dtype::F64 => "f64",
            Dtype::I32 => "i32",
        }
    }
}

/// Number of elements a shape spans (empty shape is a scalar)
pub fn n_elems(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Shared tensor handle
pub type Tensor = Arc<TensorNode>;

/// One node of the locally visible graph
#[derive(Debug)]
pub struct TensorNode {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub kind: TensorKind,
}

#[derive(Debug)]
pub enum TensorKind {
    /// Named input placeholder
    Variable { label: String },
    /// Constant initializer with inline values
    Constant { values: Vec<f64> },
    /// Operation applied to argument tensors
    Operation { op: String, args: Vec<Tensor> },
    /// Placeholder for a node owned by another peer
    Remote(RemoteReference),
}

impl TensorNode {
    pub fn variable(label: impl Into<String>, dtype: Dtype, shape: Vec<usize>) -> Tensor {
        Arc::new(TensorNode {
            dtype,
            shape,
            kind: TensorKind::Variable { label: label.into() },
        })
    }

    pub fn constant(values: Vec<f64>, dtype: Dtype, shape: Vec<usize>) -> Tensor {
        Arc::new(TensorNode {
            dtype,
            shape,
            kind: TensorKind::Constant { values },
        })
    }

    /// Operation node; shape and dtype follow the first argument
    pub fn operation(op: impl Into<String>, args: Vec<Tensor>) -> Tensor {
        let (dtype, shape) = args
            .first()
            .map(|a| (a.dtype, a.shape.clone()))
            .unwrap_or((Dtype::F64, vec![]));
        Arc::new(TensorNode {
            dtype,
            shape,
            kind: TensorKind::Operation { op: op.into(), args },
        })
    }

    pub fn remote(reference: RemoteReference) -> Tensor {
        Arc::new(TensorNode {
            dtype: reference.dtype(),
            shape: reference.shape().to_vec(),
            kind: TensorKind::Remote(reference),
        })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, TensorKind::Remote(_))
    }

    pub fn as_remote(&self) -> Option<&RemoteReference> {
        match &self.kind {
            TensorKind::Remote(r) => Some(r),
            _ => None,
        }
    }

    /// Direct dependencies; leaves and remote references have none
    pub fn args(&self) -> &[Tensor] {
        match &self.kind {
            TensorKind::Operation { args, .. } => args,
            _ => &[],
        }
    }

    /// Display label used by the printer and the query matcher
    pub fn label(&self) -> String {
        match &self.kind {
            TensorKind::Variable { label } => format!("variable:{}", label),
            TensorKind::Constant { values } => {
                if values.len() == 1 {
                    format_scalar(values[0])
                } else {
                    format!("constant:{}elems", values.len())
                }
            }
            TensorKind::Operation { op, .. } => op.clone(),
            TensorKind::Remote(r) => r.remote_string(),
        }
    }
}

/// Stable key for pointer identity of a handle
pub fn ptr_key(t: &Tensor) -> usize {
    Arc::as_ptr(t) as *const () as usize
}

fn format_scalar(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Operators whose argument order carries no meaning
const COMMUTATIVE_OPS: &[&str] = &["ADD", "MUL", "MIN", "MAX", "EQ", "NEQ"];

pub fn is_commutative(op: &str) -> bool {
    COMMUTATIVE_OPS.contains(&op)
}
