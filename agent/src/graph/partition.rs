//! K-medoid partitioning of a connected graph across candidate peers
//!
//! Classic k-means does not apply directly: graph nodes have no continuous
//! coordinate, so the update step picks a discrete medoid (the member
//! minimizing its maximum distance to the rest of the cluster). Initial
//! mean selection is injectable so tests stay deterministic; the default
//! samples without replacement.

use super::topology::floyd_warshall;
use super::{dependents, GraphMap};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};

/// Map node-id -> owning peer-id. Partial: unmapped nodes belong to
/// whichever peer loads them.
pub type Topography = HashMap<String, String>;

/// Bound on assignment/update rounds before giving up on convergence
const MAX_ROUNDS: usize = 10;

/// Initial-mean selection: given k and the vertex index, return k distinct
/// vertex indices.
pub trait MeanSelector {
    fn select(&mut self, k: usize, vertices: &HashMap<String, usize>) -> Vec<usize>;
}

impl<F> MeanSelector for F
where
    F: FnMut(usize, &HashMap<String, usize>) -> Vec<usize>,
{
    fn select(&mut self, k: usize, vertices: &HashMap<String, usize>) -> Vec<usize> {
        self(k, vertices)
    }
}

/// Default selector: k distinct vertices chosen uniformly at random.
pub fn random_selector() -> impl MeanSelector {
    |k: usize, vertices: &HashMap<String, usize>| {
        let mut indices: Vec<usize> = (0..vertices.len()).collect();
        indices.shuffle(&mut rand::thread_rng());
        indices.truncate(k);
        indices
    }
}

/// Partition one connected component across `peers`.
///
/// Output records only boundary-relevant nodes: component roots and nodes
/// whose peer differs from at least one dependent's peer. Everything else
/// implicitly inherits its consumer's peer.
pub fn kmeans<S: MeanSelector>(peers: &[String], nodes: &GraphMap, selector: &mut S) -> Topography {
    let n = nodes.len();
    let k = n.min(peers.len());
    if k == 0 {
        return Topography::new();
    }

    let (dist, vertices) = floyd_warshall(nodes);
    let mut ids_by_index = vec![String::new(); n];
    for (id, &v) in &vertices {
        ids_by_index[v] = id.clone();
    }

    let mut means = selector.select(k, &vertices);
    let mut distinct = HashSet::new();
    means.retain(|&m| m < n && distinct.insert(m));
    if means.len() != k {
        tracing::warn!(
            requested = k,
            got = means.len(),
            "mean selector returned an invalid set; clamping k"
        );
    }
    let k = means.len().min(k);
    means.truncate(k);
    if k == 0 {
        return Topography::new();
    }

    let mut assignment = vec![0usize; n];
    for round in 0..MAX_ROUNDS {
        // assignment step: nearest mean, ties to the lowest mean index
        for v in 0..n {
            let mut best = 0;
            let mut best_dist = usize::MAX;
            for (m, &mean) in means.iter().enumerate() {
                let d = dist.at(v, mean);
                if d < best_dist {
                    best = m;
                    best_dist = d;
                }
            }
            assignment[v] = best;
        }

        // update step: discrete medoid per cluster; the incumbent mean is
        // kept unless a member is strictly better, candidates scanned in
        // ascending vertex index
        let mut next_means = means.clone();
        for (m, next) in next_means.iter_mut().enumerate() {
            let members: Vec<usize> = (0..n).filter(|&v| assignment[v] == m).collect();
            let eccentricity = |candidate: usize| {
                members
                    .iter()
                    .map(|&other| dist.at(candidate, other))
                    .max()
                    .unwrap_or(0)
            };
            let mut best = *next;
            let mut best_ecc = eccentricity(best);
            for &candidate in &members {
                let ecc = eccentricity(candidate);
                if ecc < best_ecc {
                    best = candidate;
                    best_ecc = ecc;
                }
            }
            *next = best;
        }

        if next_means == means {
            tracing::debug!(round, "partitioning converged");
            break;
        }
        means = next_means;
    }

    // color every vertex, then publish only boundary-relevant entries
    let colors: Vec<&String> = assignment.iter().map(|&c| &peers[c]).collect();
    let consumers = dependents(nodes);

    let mut topography = Topography::new();
    for v in 0..n {
        let id = &ids_by_index[v];
        let color = colors[v];
        let boundary = match consumers.get(id) {
            // component root
            None => true,
            Some(users) => users.iter().any(|u| colors[vertices[u]] != color),
        };
        if boundary {
            topography.insert(id.clone(), color.clone());
        }
    }
    topography
}
