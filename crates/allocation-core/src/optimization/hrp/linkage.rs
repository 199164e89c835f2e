use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::AllocationResult;

/// One agglomeration step. Node ids `0..n` are leaves; the k-th merge
/// creates node `n + k`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    /// Lower child id.
    pub left: usize,
    /// Higher child id.
    pub right: usize,
    pub distance: f64,
    /// Number of leaves under this node.
    pub size: usize,
}

/// Binary cluster hierarchy stored as a flat arena of merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTree {
    n_leaves: usize,
    merges: Vec<Merge>,
}

impl ClusterTree {
    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Id of the root node, `None` for an empty tree.
    pub fn root(&self) -> Option<usize> {
        match self.n_leaves {
            0 => None,
            n => Some(n + self.merges.len() - 1),
        }
    }

    /// Leaf ids read left to right (the quasi-diagonal order).
    pub fn leaves_in_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.n_leaves);
        let Some(root) = self.root() else {
            return order;
        };
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node < self.n_leaves {
                order.push(node);
            } else {
                let merge = &self.merges[node - self.n_leaves];
                stack.push(merge.right);
                stack.push(merge.left);
            }
        }
        order
    }
}

/// Single-linkage agglomerative clustering of a symmetric distance matrix.
///
/// Built from Prim's minimum spanning tree: sorting the tree edges by
/// length and joining components in that order gives exactly the
/// single-linkage merge sequence, so merge distances never decrease.
/// Equal distances are broken on the lower leaf index.
pub fn single_linkage(distance: &DMatrix<f64>) -> AllocationResult<ClusterTree> {
    let n = distance.nrows();
    if distance.ncols() != n {
        return Err(AllocationError::InvalidInput {
            field: "distance".into(),
            reason: format!("Matrix must be square, got {}x{}", n, distance.ncols()),
        });
    }
    if let Some(d) = distance.iter().find(|d| !d.is_finite()) {
        return Err(AllocationError::NumericalInstability(format!(
            "Distance matrix contains {d}"
        )));
    }

    let mut edges = minimum_spanning_edges(distance);
    edges.sort_by(|a, b| {
        a.2.total_cmp(&b.2)
            .then(a.0.min(a.1).cmp(&b.0.min(b.1)))
            .then(a.0.max(a.1).cmp(&b.0.max(b.1)))
    });

    let mut parent: Vec<usize> = (0..n).collect();
    let mut node_of: Vec<usize> = (0..n).collect();
    let mut size_of: Vec<usize> = vec![1; n];
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    for (a, b, d) in edges {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let (na, nb) = (node_of[ra], node_of[rb]);
        let size = size_of[ra] + size_of[rb];
        merges.push(Merge {
            left: na.min(nb),
            right: na.max(nb),
            distance: d,
            size,
        });
        parent[rb] = ra;
        node_of[ra] = n + merges.len() - 1;
        size_of[ra] = size;
    }

    Ok(ClusterTree { n_leaves: n, merges })
}

fn minimum_spanning_edges(distance: &DMatrix<f64>) -> Vec<(usize, usize, f64)> {
    let n = distance.nrows();
    let mut edges = Vec::with_capacity(n.saturating_sub(1));
    if n < 2 {
        return edges;
    }

    let mut in_tree = vec![false; n];
    let mut best: Vec<f64> = (0..n).map(|j| distance[(0, j)]).collect();
    let mut from = vec![0usize; n];
    in_tree[0] = true;

    for _ in 1..n {
        let mut next = None;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            match next {
                Some(k) if best[j] >= best[k] => {}
                _ => next = Some(j),
            }
        }
        let Some(j) = next else { break };
        in_tree[j] = true;
        edges.push((from[j], j, best[j]));
        for k in 0..n {
            if !in_tree[k] && distance[(j, k)] < best[k] {
                best[k] = distance[(j, k)];
                from[k] = j;
            }
        }
    }
    edges
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}
