//! Materializing descriptions into tensors and back
//!
//! `materialize` turns a segment description into runtime handles, wiring
//! already-resolved tensors (remote references, previously identified
//! nodes) in by id. `save_graph` is the inverse: it serializes the local
//! portion of a tensor tree, stopping at any node the caller marks as a
//! boundary.

use super::{GraphDescription, InitializerDef, OperationDef, ValueInput};
use crate::errors::{MeshError, Result};
use crate::tensor::{ptr_key, Tensor, TensorKind, TensorNode};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Build tensors for a description.
///
/// `resolved` supplies handles for ids declared elsewhere (references and
/// pre-identified tensors); every other id is built here. Returns the full
/// id map and the output handles.
pub fn materialize(
    desc: &GraphDescription,
    resolved: &HashMap<String, Tensor>,
) -> Result<(HashMap<String, Tensor>, Vec<Tensor>)> {
    let mut map = resolved.clone();

    for input in &desc.inputs {
        map.entry(input.id.clone()).or_insert_with(|| {
            TensorNode::variable(input.id.clone(), input.dtype, input.shape.clone())
        });
    }
    for init in &desc.initializers {
        map.entry(init.id.clone()).or_insert_with(|| {
            TensorNode::constant(init.values.clone(), init.dtype, init.shape.clone())
        });
    }

    // nodes are normally dependency-ordered; iterate to a fixpoint so
    // hand-written descriptions work too
    let mut pending: Vec<&OperationDef> = desc.nodes.iter().collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut still_pending = Vec::new();
        for node in pending {
            if node.inputs.iter().all(|i| map.contains_key(i)) {
                let args: Vec<Tensor> = node.inputs.iter().map(|i| map[i].clone()).collect();
                map.insert(node.id.clone(), TensorNode::operation(node.op.clone(), args));
            } else {
                still_pending.push(node);
            }
        }
        if still_pending.len() == before {
            let missing: Vec<&str> = still_pending
                .iter()
                .flat_map(|n| n.inputs.iter())
                .filter(|i| !map.contains_key(*i))
                .map(|s| s.as_str())
                .collect();
            return Err(MeshError::NotFound(format!(
                "unresolvable graph inputs: {}",
                missing.join(", ")
            )));
        }
        pending = still_pending;
    }

    let mut outputs = Vec::with_capacity(desc.outputs.len());
    for id in &desc.outputs {
        let t = map
            .get(id)
            .ok_or_else(|| MeshError::NotFound(format!("output {} not materialized", id)))?;
        outputs.push(t.clone());
    }
    Ok((map, outputs))
}

/// Serialize the trees under `roots` into `desc`, children before parents.
///
/// `identified` maps tensor pointer keys to published ids and is extended
/// with every id assigned here; tensors in `stops` (and remote references)
/// are referenced by id but never emitted. Returns the output ids.
pub fn save_graph(
    desc: &mut GraphDescription,
    roots: &[Tensor],
    identified: &mut HashMap<usize, String>,
    stops: &HashSet<usize>,
) -> Result<Vec<String>> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut used_ids: HashSet<String> = desc
        .inputs
        .iter()
        .map(|i| i.id.clone())
        .chain(desc.initializers.iter().map(|i| i.id.clone()))
        .chain(desc.nodes.iter().map(|n| n.id.clone()))
        .collect();
    used_ids.extend(identified.values().cloned());

    let mut output_ids = Vec::with_capacity(roots.len());
    for root in roots {
        let id = emit(root, desc, identified, stops, &mut visited, &mut used_ids)?;
        if !desc.outputs.contains(&id) {
            desc.outputs.push(id.clone());
        }
        output_ids.push(id);
    }
    Ok(output_ids)
}

fn assign_id(
    t: &Tensor,
    identified: &mut HashMap<usize, String>,
    used_ids: &mut HashSet<String>,
) -> String {
    let key = ptr_key(t);
    if let Some(id) = identified.get(&key) {
        return id.clone();
    }
    // variables keep their label as id when it is free, so names survive
    // a save/load cycle
    let id = match &t.kind {
        TensorKind::Variable { label } if !used_ids.contains(label) => label.clone(),
        _ => Uuid::new_v4().to_string(),
    };
    used_ids.insert(id.clone());
    identified.insert(key, id.clone());
    id
}

fn emit(
    t: &Tensor,
    desc: &mut GraphDescription,
    identified: &mut HashMap<usize, String>,
    stops: &HashSet<usize>,
    visited: &mut HashSet<usize>,
    used_ids: &mut HashSet<String>,
) -> Result<String> {
    if let TensorKind::Remote(r) = &t.kind {
        // references are never serialized; consumers name them by id
        identified.insert(ptr_key(t), r.node_id().to_string());
        return Ok(r.node_id().to_string());
    }
    if stops.contains(&ptr_key(t)) {
        return identified.get(&ptr_key(t)).cloned().ok_or_else(|| {
            MeshError::InternalInconsistency("boundary tensor has no assigned id".into())
        });
    }

    let id = assign_id(t, identified, used_ids);
    if !visited.insert(ptr_key(t)) {
        return Ok(id);
    }

    match &t.kind {
        TensorKind::Variable { .. } => {
            desc.inputs.push(ValueInput {
                id: id.clone(),
                dtype: t.dtype,
                shape: t.shape.clone(),
            });
        }
        TensorKind::Constant { values } => {
            desc.initializers.push(InitializerDef {
                id: id.clone(),
                dtype: t.dtype,
                shape: t.shape.clone(),
                values: values.clone(),
            });
        }
        TensorKind::Operation { op, args } => {
            let mut input_ids = Vec::with_capacity(args.len());
            for arg in args {
                input_ids.push(emit(arg, desc, identified, stops, visited, used_ids)?);
            }
            desc.nodes.push(OperationDef {
                id: id.clone(),
                op: op.clone(),
                inputs: input_ids,
            });
        }
        TensorKind::Remote(_) => unreachable!("handled above"),
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Dtype;

    #[test]
    fn test_materialize_and_save_round_trip() {
        let x = TensorNode::variable("x", Dtype::F64, vec![2]);
        let c = TensorNode::constant(vec![3.0], Dtype::F64, vec![]);
        let mul = TensorNode::operation("MUL", vec![x.clone(), c]);
        let root = TensorNode::operation("ADD", vec![mul.clone(), x.clone()]);

        let mut desc = GraphDescription::default();
        let mut identified = HashMap::new();
        let outputs = save_graph(
            &mut desc,
            &[root.clone()],
            &mut identified,
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(desc.inputs.len(), 1);
        assert_eq!(desc.inputs[0].id, "x");
        assert_eq!(desc.initializers.len(), 1);
        assert_eq!(desc.nodes.len(), 2);
        // children before parents
        assert_eq!(desc.nodes[1].id, outputs[0]);

        let (map, roots) = materialize(&desc, &HashMap::new()).unwrap();
        assert_eq!(roots.len(), 1);
        let rebuilt = &roots[0];
        match &rebuilt.kind {
            TensorKind::Operation { op, args } => {
                assert_eq!(op, "ADD");
                assert_eq!(args.len(), 2);
                // the shared variable is one handle, not two
                assert!(std::sync::Arc::ptr_eq(&args[1], &map["x"]));
            }
            other => panic!("expected operation, got {:?}", other),
        }
    }

    #[test]
    fn test_materialize_uses_resolved_handles() {
        let desc = GraphDescription {
            inputs: vec![],
            initializers: vec![],
            nodes: vec![OperationDef {
                id: "r".into(),
                op: "NEG".into(),
                inputs: vec!["ext".into()],
            }],
            outputs: vec!["r".into()],
        };

        let ext = TensorNode::variable("ext", Dtype::F32, vec![4]);
        let resolved: HashMap<String, Tensor> = [("ext".to_string(), ext.clone())].into();
        let (_, roots) = materialize(&desc, &resolved).unwrap();
        assert!(std::sync::Arc::ptr_eq(&roots[0].args()[0], &ext));
    }

    #[test]
    fn test_materialize_reports_dangling_input() {
        let desc = GraphDescription {
            inputs: vec![],
            initializers: vec![],
            nodes: vec![OperationDef {
                id: "r".into(),
                op: "NEG".into(),
                inputs: vec!["nowhere".into()],
            }],
            outputs: vec!["r".into()],
        };
        let err = materialize(&desc, &HashMap::new()).unwrap_err();
        assert!(matches!(err, MeshError::NotFound(_)));
    }

    #[test]
    fn test_save_stops_at_references() {
        use crate::reference::RemoteReference;

        let far = TensorNode::remote(RemoteReference::new("mgr2", "far-id", Dtype::F64, vec![1]));
        let root = TensorNode::operation("SIN", vec![far]);

        let mut desc = GraphDescription::default();
        let mut identified = HashMap::new();
        save_graph(&mut desc, &[root], &mut identified, &HashSet::new()).unwrap();

        assert_eq!(desc.nodes.len(), 1);
        assert_eq!(desc.nodes[0].inputs, vec!["far-id".to_string()]);
        assert!(!desc.contains("far-id"));
    }
}
