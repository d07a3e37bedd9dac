//! Splitting one description into per-peer segments
//!
//! A segment holds everything one peer materializes locally: its colored
//! nodes in dependency order plus any uncolored nodes it absorbs. Edges
//! crossing into another color stop the traversal; the foreign node
//! becomes an output of a nested sub-segment, which the loader turns into
//! a remote reference.

use super::partition::Topography;
use super::{GraphDescription, InitializerDef, OperationDef, ValueInput};
use crate::errors::{MeshError, Result};
use std::collections::{HashMap, HashSet};

/// One peer's share of a split description
#[derive(Debug, Clone)]
pub struct TopographicSegment {
    /// Owning peer id
    pub color: String,
    pub graph: GraphDescription,
    /// Nested segments, one per distinct foreign peer this segment touches
    pub subgraphs: HashMap<String, TopographicSegment>,
}

enum Entry<'a> {
    Input(&'a ValueInput),
    Initializer(&'a InitializerDef),
    Operation(&'a OperationDef),
}

/// Split a description along a topography.
///
/// Returns one top-level segment per distinct color among the outputs;
/// every output must be colored (the loader defaults unmapped outputs to
/// the local peer before calling this).
pub fn split_topography(
    desc: &GraphDescription,
    topography: &Topography,
) -> Result<Vec<TopographicSegment>> {
    split_with_ignore(desc, topography, &HashSet::new())
}

/// As [`split_topography`], but leaves named in `ignore` are not copied
/// into any segment (the caller already holds them by value).
pub fn split_with_ignore(
    desc: &GraphDescription,
    topography: &Topography,
    ignore: &HashSet<String>,
) -> Result<Vec<TopographicSegment>> {
    let mut index: HashMap<&str, Entry> = HashMap::new();
    for input in &desc.inputs {
        index.insert(&input.id, Entry::Input(input));
    }
    for init in &desc.initializers {
        index.insert(&init.id, Entry::Initializer(init));
    }
    for node in &desc.nodes {
        index.insert(&node.id, Entry::Operation(node));
    }

    // group outputs by color, preserving first-appearance order
    let mut order: Vec<&String> = Vec::new();
    let mut grouped: HashMap<&String, Vec<String>> = HashMap::new();
    for output in &desc.outputs {
        let color = topography.get(output).ok_or_else(|| {
            MeshError::InternalInconsistency(format!("output {} has no assigned peer", output))
        })?;
        if !grouped.contains_key(color) {
            order.push(color);
        }
        grouped.entry(color).or_default().push(output.clone());
    }

    order
        .into_iter()
        .map(|color| build_segment(&index, topography, ignore, color, grouped[color].clone()))
        .collect()
}

fn build_segment(
    index: &HashMap<&str, Entry>,
    topography: &Topography,
    ignore: &HashSet<String>,
    color: &str,
    roots: Vec<String>,
) -> Result<TopographicSegment> {
    let mut graph = GraphDescription {
        outputs: roots.clone(),
        ..Default::default()
    };

    // foreign nodes grouped by color, in encounter order
    let mut foreign_order: Vec<String> = Vec::new();
    let mut foreign: HashMap<String, Vec<String>> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();

    for root in &roots {
        emit(
            index,
            topography,
            ignore,
            color,
            root,
            &mut graph,
            &mut visited,
            &mut foreign_order,
            &mut foreign,
        )?;
    }

    let mut subgraphs = HashMap::new();
    for fcolor in foreign_order {
        let roots = foreign.remove(&fcolor).unwrap_or_default();
        let sub = build_segment(index, topography, ignore, &fcolor, roots)?;
        subgraphs.insert(fcolor, sub);
    }

    Ok(TopographicSegment {
        color: color.to_string(),
        graph,
        subgraphs,
    })
}

/// Bottom-up emission: children land in the segment before their parents.
#[allow(clippy::too_many_arguments)]
fn emit(
    index: &HashMap<&str, Entry>,
    topography: &Topography,
    ignore: &HashSet<String>,
    color: &str,
    id: &str,
    graph: &mut GraphDescription,
    visited: &mut HashSet<String>,
    foreign_order: &mut Vec<String>,
    foreign: &mut HashMap<String, Vec<String>>,
) -> Result<()> {
    if !visited.insert(id.to_string()) {
        return Ok(());
    }

    let entry = index.get(id).ok_or_else(|| {
        MeshError::InternalInconsistency(format!("dangling reference to unknown node {}", id))
    })?;

    // a node colored for another peer is a boundary: record, do not descend
    if let Some(owner) = topography.get(id) {
        if owner != color {
            if !foreign.contains_key(owner) {
                foreign_order.push(owner.clone());
            }
            foreign.entry(owner.clone()).or_default().push(id.to_string());
            return Ok(());
        }
    }

    match entry {
        Entry::Input(input) => {
            if !ignore.contains(id) {
                graph.inputs.push((*input).clone());
            }
        }
        Entry::Initializer(init) => {
            if !ignore.contains(id) {
                graph.initializers.push((*init).clone());
            }
        }
        Entry::Operation(node) => {
            for dep in &node.inputs {
                emit(
                    index,
                    topography,
                    ignore,
                    color,
                    dep,
                    graph,
                    visited,
                    foreign_order,
                    foreign,
                )?;
            }
            graph.nodes.push((*node).clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::merge_graph;
    use crate::tensor::Dtype;

    fn input(id: &str) -> ValueInput {
        ValueInput {
            id: id.into(),
            dtype: Dtype::F64,
            shape: vec![3],
        }
    }

    fn op(id: &str, op: &str, inputs: &[&str]) -> OperationDef {
        OperationDef {
            id: id.into(),
            op: op.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// root1 = SUB(src2, POW(DIV(NEG(osrc), ADD(SIN(src), src)), osrc2))
    fn scenario_desc() -> GraphDescription {
        GraphDescription {
            inputs: vec![input("src"), input("src2"), input("osrc"), input("osrc2")],
            initializers: vec![],
            nodes: vec![
                op("neg", "NEG", &["osrc"]),
                op("sin", "SIN", &["src"]),
                op("add", "ADD", &["sin", "src"]),
                op("div", "DIV", &["neg", "add"]),
                op("pow", "POW", &["div", "osrc2"]),
                op("root1", "SUB", &["src2", "pow"]),
            ],
            outputs: vec!["root1".into()],
        }
    }

    fn scenario_topography() -> Topography {
        let mut topo = Topography::new();
        topo.insert("root1".into(), "mgr".into());
        topo.insert("neg".into(), "mgr2".into());
        topo
    }

    #[test]
    fn test_split_separates_foreign_subtree() {
        let segments = split_topography(&scenario_desc(), &scenario_topography()).unwrap();
        assert_eq!(segments.len(), 1);

        let root = &segments[0];
        assert_eq!(root.color, "mgr");
        assert_eq!(root.graph.outputs, vec!["root1".to_string()]);

        // local portion holds everything but the NEG subtree
        let local_ops: Vec<&str> = root.graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(local_ops.contains(&"root1"));
        assert!(local_ops.contains(&"pow"));
        assert!(local_ops.contains(&"div"));
        assert!(local_ops.contains(&"add"));
        assert!(local_ops.contains(&"sin"));
        assert!(!local_ops.contains(&"neg"));
        assert!(!root.graph.contains("osrc"));

        // children precede parents
        let pos = |id: &str| local_ops.iter().position(|n| *n == id).unwrap();
        assert!(pos("sin") < pos("add"));
        assert!(pos("add") < pos("div"));
        assert!(pos("div") < pos("pow"));
        assert!(pos("pow") < pos("root1"));

        // the foreign subtree becomes a nested segment rooted at neg
        assert_eq!(root.subgraphs.len(), 1);
        let sub = &root.subgraphs["mgr2"];
        assert_eq!(sub.color, "mgr2");
        assert_eq!(sub.graph.outputs, vec!["neg".to_string()]);
        assert!(sub.graph.contains("neg"));
        assert!(sub.graph.contains("osrc"));
        assert!(!sub.graph.contains("src"));
        assert!(sub.subgraphs.is_empty());
    }

    #[test]
    fn test_uncolored_nodes_inherit_consumer() {
        // nothing colored mgr2: the whole graph lands in one segment
        let mut topo = Topography::new();
        topo.insert("root1".into(), "mgr".into());
        let segments = split_topography(&scenario_desc(), &topo).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].graph.nodes.len(), 6);
        assert!(segments[0].subgraphs.is_empty());
    }

    #[test]
    fn test_uncolored_output_is_rejected() {
        let topo = Topography::new();
        assert!(split_topography(&scenario_desc(), &topo).is_err());
    }

    #[test]
    fn test_ignore_set_skips_leaves() {
        let ignore: HashSet<String> = ["src".to_string()].into_iter().collect();
        let segments =
            split_with_ignore(&scenario_desc(), &scenario_topography(), &ignore).unwrap();
        assert!(!segments[0].graph.contains("src"));
        assert!(segments[0].graph.contains("src2"));
    }

    #[test]
    fn test_round_trip_reconstruction() {
        let original = scenario_desc();
        let segments = split_topography(&original, &scenario_topography()).unwrap();

        fn collect(seg: &TopographicSegment, merged: &mut GraphDescription) {
            merge_graph(merged, &seg.graph);
            for sub in seg.subgraphs.values() {
                collect(sub, merged);
            }
        }

        let mut merged = GraphDescription::default();
        for seg in &segments {
            collect(seg, &mut merged);
        }

        // substituting every reference with its owner's contribution
        // reproduces the original graph
        assert_eq!(merged.len(), original.len());
        for node in &original.nodes {
            assert!(merged.nodes.iter().any(|n| n == node), "missing {}", node.id);
        }
        for input in &original.inputs {
            assert!(merged.inputs.contains(input), "missing {}", input.id);
        }
        assert!(merged.outputs.contains(&"root1".to_string()));
    }
}
