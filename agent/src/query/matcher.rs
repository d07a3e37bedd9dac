//! Pattern evaluation over an indexed tensor graph
//!
//! The index walks every node reachable from the registered roots once and
//! buckets operations by name, so operator patterns only probe their own
//! bucket. Commutative operators match arguments in any order (each
//! pattern argument consumes a distinct position); everything else is
//! strictly positional.

use super::pattern::{LeafPattern, OpPattern, PatternNode};
use crate::tensor::{is_commutative, ptr_key, Tensor, TensorKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Symbol and capture bindings of one successful match
pub type Bindings = BTreeMap<String, Tensor>;

/// One matched subgraph
#[derive(Debug, Clone)]
pub struct QueryMatch {
    /// Node the pattern root matched
    pub root: Tensor,
    pub symbols: Bindings,
}

/// Node index over a set of graph roots
pub struct QueryIndex {
    nodes: Vec<Tensor>,
    /// Operation name -> nodes carrying it
    sindex: HashMap<String, Vec<Tensor>>,
}

impl QueryIndex {
    pub fn new(roots: &[Tensor]) -> Self {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut nodes = Vec::new();
        let mut sindex: HashMap<String, Vec<Tensor>> = HashMap::new();

        let mut stack: Vec<Tensor> = roots.to_vec();
        while let Some(t) = stack.pop() {
            if !seen.insert(ptr_key(&t)) {
                continue;
            }
            if let TensorKind::Operation { op, args } = &t.kind {
                sindex.entry(op.clone()).or_default().push(t.clone());
                for arg in args {
                    stack.push(arg.clone());
                }
            }
            nodes.push(t);
        }
        Self { nodes, sindex }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Evaluate a pattern against every indexed node.
    pub fn match_pattern(&self, pattern: &PatternNode) -> Vec<QueryMatch> {
        let candidates: &[Tensor] = match pattern {
            PatternNode::Operator(op) => self
                .sindex
                .get(&op.op)
                .map(|v| v.as_slice())
                .unwrap_or(&[]),
            _ => &self.nodes,
        };

        let mut seen_results: HashSet<Vec<usize>> = HashSet::new();
        let mut matches = Vec::new();
        for candidate in candidates {
            for bindings in match_node(candidate, pattern, Bindings::new()) {
                // fingerprint by root and binding identities so symmetric
                // argument orders collapse into one result
                let mut fp: Vec<usize> = vec![ptr_key(candidate)];
                fp.extend(bindings.values().map(ptr_key));
                if seen_results.insert(fp) {
                    matches.push(QueryMatch {
                        root: candidate.clone(),
                        symbols: bindings,
                    });
                }
            }
        }
        matches
    }
}

fn match_node(t: &Tensor, pattern: &PatternNode, bindings: Bindings) -> Vec<Bindings> {
    match pattern {
        PatternNode::Symbol(name) => bind(name, t, bindings),
        PatternNode::Constant(value) => match &t.kind {
            TensorKind::Constant { values } if values.len() == 1 && values[0] == *value => {
                vec![bindings]
            }
            _ => vec![],
        },
        PatternNode::Leaf(leaf) => {
            if leaf_matches(t, leaf) {
                vec![bindings]
            } else {
                vec![]
            }
        }
        PatternNode::Operator(op) => match_operator(t, op, bindings),
    }
}

fn leaf_matches(t: &Tensor, leaf: &LeafPattern) -> bool {
    let label = match &t.kind {
        TensorKind::Variable { label } => Some(label.as_str()),
        // references are opaque leaves: they match unlabeled leaf patterns
        TensorKind::Remote(_) => None,
        _ => return false,
    };
    if let Some(want) = &leaf.label {
        if label != Some(want.as_str()) {
            return false;
        }
    }
    if let Some(dtype) = leaf.dtype {
        if t.dtype != dtype {
            return false;
        }
    }
    if let Some(shape) = &leaf.shape {
        if &t.shape != shape {
            return false;
        }
    }
    true
}

fn match_operator(t: &Tensor, pattern: &OpPattern, bindings: Bindings) -> Vec<Bindings> {
    let (op, args) = match &t.kind {
        TensorKind::Operation { op, args } => (op, args),
        _ => return vec![],
    };
    if *op != pattern.op || args.len() != pattern.args.len() {
        return vec![];
    }

    let results = if is_commutative(op) {
        match_args_any_order(&pattern.args, args, bindings)
    } else {
        match_args_positional(&pattern.args, args, bindings)
    };

    match &pattern.capture {
        None => results,
        Some(name) => results
            .into_iter()
            .flat_map(|b| bind(name, t, b))
            .collect(),
    }
}

fn match_args_positional(pats: &[PatternNode], args: &[Tensor], bindings: Bindings) -> Vec<Bindings> {
    let mut acc = vec![bindings];
    for (pat, arg) in pats.iter().zip(args) {
        acc = acc
            .into_iter()
            .flat_map(|b| match_node(arg, pat, b))
            .collect();
        if acc.is_empty() {
            break;
        }
    }
    acc
}

/// Backtracking assignment of pattern arguments to distinct positions.
fn match_args_any_order(pats: &[PatternNode], args: &[Tensor], bindings: Bindings) -> Vec<Bindings> {
    fn recurse(
        pats: &[PatternNode],
        args: &[Tensor],
        used: &mut Vec<bool>,
        bindings: Bindings,
        out: &mut Vec<Bindings>,
    ) {
        let Some((pat, rest)) = pats.split_first() else {
            out.push(bindings);
            return;
        };
        for (i, arg) in args.iter().enumerate() {
            if used[i] {
                continue;
            }
            used[i] = true;
            for b in match_node(arg, pat, bindings.clone()) {
                recurse(rest, args, used, b, out);
            }
            used[i] = false;
        }
    }

    let mut out = Vec::new();
    let mut used = vec![false; args.len()];
    recurse(pats, args, &mut used, bindings, &mut out);
    out
}

fn bind(name: &str, t: &Tensor, mut bindings: Bindings) -> Vec<Bindings> {
    match bindings.get(name) {
        Some(existing) if Arc::ptr_eq(existing, t) => vec![bindings],
        Some(_) => vec![],
        None => {
            bindings.insert(name.to_string(), t.clone());
            vec![bindings]
        }
    }
}
