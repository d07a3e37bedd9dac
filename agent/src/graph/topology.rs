//! All-pairs distance and connected components over a graph description
//!
//! Partitioning treats the graph as undirected: a node is adjacent to each
//! of its direct dependencies. Distances come from Floyd-Warshall with the
//! node count as the "unreached" sentinel. O(n³) is fine here; this runs
//! once per deployment decision, not per update.

use super::GraphMap;
use std::collections::HashMap;

/// Square all-pairs distance view over a flat vector.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    n: usize,
    dist: Vec<usize>,
}

impl DistanceMatrix {
    pub fn at(&self, i: usize, j: usize) -> usize {
        self.dist[i * self.n + j]
    }

    /// Number of vertices
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Sentinel distance meaning "no path"
    pub fn unreached(&self) -> usize {
        self.n
    }

    pub fn connected(&self, i: usize, j: usize) -> bool {
        self.at(i, j) < self.n
    }
}

/// Compute all-pairs shortest distances and the vertex index.
///
/// Vertices are indexed in sorted id order so downstream tie-breaks are
/// deterministic.
pub fn floyd_warshall(nodes: &GraphMap) -> (DistanceMatrix, HashMap<String, usize>) {
    let mut ids: Vec<&String> = nodes.keys().collect();
    ids.sort();
    let n = ids.len();

    let vertices: HashMap<String, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| ((*id).clone(), i))
        .collect();

    // n doubles as the unreached sentinel
    let mut dist = vec![n; n * n];
    for i in 0..n {
        dist[i * n + i] = 0;
    }
    for node in nodes.values() {
        let i = vertices[&node.id];
        for dep in &node.deps {
            if let Some(&j) = vertices.get(dep) {
                dist[i * n + j] = 1;
                dist[j * n + i] = 1;
            }
        }
    }

    for k in 0..n {
        for i in 0..n {
            let dik = dist[i * n + k];
            if dik >= n {
                continue;
            }
            for j in 0..n {
                let through = dik + dist[k * n + j];
                if through < dist[i * n + j] {
                    dist[i * n + j] = through;
                }
            }
        }
    }

    // cap relaxed sums back at the sentinel
    for d in dist.iter_mut() {
        if *d > n {
            *d = n;
        }
    }

    (DistanceMatrix { n, dist }, vertices)
}

/// Split nodes into maximal connected components.
///
/// Two nodes share a component exactly when their distance is below the
/// sentinel. Clustering is meaningless across components that share no
/// edges, so the partitioner runs per component.
pub fn disjoint_graphs(nodes: &GraphMap) -> Vec<GraphMap> {
    let (dist, vertices) = floyd_warshall(nodes);
    let n = dist.len();
    let mut component = vec![usize::MAX; n];
    let mut ncomponents = 0;
    for i in 0..n {
        if component[i] != usize::MAX {
            continue;
        }
        let c = ncomponents;
        ncomponents += 1;
        for j in 0..n {
            if dist.connected(i, j) {
                component[j] = c;
            }
        }
    }

    let mut graphs: Vec<GraphMap> = vec![GraphMap::new(); ncomponents];
    for (id, &v) in &vertices {
        graphs[component[v]].insert(id.clone(), nodes[id].clone());
    }
    graphs
}
