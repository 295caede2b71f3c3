//! Weighted directed graph input and the adapter trait the engines read through.

use crate::{Error, Result};
use std::collections::HashMap;

/// A weighted graph view that can return **borrowed** neighbor + weight slices.
///
/// This is the “CSR-style” representation: a node has a contiguous neighbor list and a
/// contiguous weight list, with matching indices.
pub trait WeightedGraphRef {
    fn node_count(&self) -> usize;

    /// Return `(neighbors, weights)` for a node's outgoing edges.
    ///
    /// Requirements:
    /// - `neighbors.len() == weights.len()`
    /// - Weights should be finite and non-negative; the cascade engine rejects anything else.
    fn neighbors_and_weights_ref(&self, node: usize) -> (&[usize], &[f64]);

    fn out_degree(&self, node: usize) -> usize {
        self.neighbors_and_weights_ref(node).0.len()
    }
}

/// Validated weighted digraph over dense node ids `0..n`.
///
/// Invariants (checked at construction):
/// - every stored weight is finite and strictly positive (zeros are dropped)
/// - neighbor lists are sorted and free of duplicates
/// - external node ids, when present, are `n` distinct values
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightedDigraph {
    n: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    weights: Vec<f64>,
    node_ids: Option<Vec<u64>>,
}

impl WeightedDigraph {
    /// Build from a dense `n x n` adjacency matrix (`adj[u][v]` is the weight of `u -> v`).
    pub fn from_dense(adj: &[Vec<f64>]) -> Result<Self> {
        let n = adj.len();
        let mut indptr = Vec::with_capacity(n + 1);
        let mut indices = Vec::new();
        let mut weights = Vec::new();
        indptr.push(0);

        for (u, row) in adj.iter().enumerate() {
            if row.len() != n {
                return Err(Error::InvalidGraph(format!(
                    "adjacency is not square: row {u} has {} columns, expected {n}",
                    row.len()
                )));
            }
            for (v, &w) in row.iter().enumerate() {
                check_weight(u, v, w)?;
                if w > 0.0 {
                    indices.push(v);
                    weights.push(w);
                }
            }
            indptr.push(indices.len());
        }

        Ok(Self { n, indptr, indices, weights, node_ids: None })
    }

    /// Build from `(source, target, weight)` triples. Repeated pairs are summed; a sum that
    /// overflows to infinity is rejected like any other non-finite weight.
    pub fn from_edges<I>(n: usize, edges: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for (u, v, w) in edges {
            if u >= n || v >= n {
                return Err(Error::InvalidGraph(format!(
                    "edge {u} -> {v} is outside the node range 0..{n}"
                )));
            }
            check_weight(u, v, w)?;
            if w > 0.0 {
                rows[u].push((v, w));
            }
        }

        let mut indptr = Vec::with_capacity(n + 1);
        let mut indices = Vec::new();
        let mut weights = Vec::new();
        indptr.push(0);
        for (u, row) in rows.iter_mut().enumerate() {
            row.sort_by_key(|&(v, _)| v);
            for &(v, w) in row.iter() {
                if indices.len() > *indptr.last().unwrap_or(&0) && indices.last() == Some(&v) {
                    if let Some(last) = weights.last_mut() {
                        *last += w;
                        check_weight(u, v, *last)?;
                    }
                } else {
                    indices.push(v);
                    weights.push(w);
                }
            }
            indptr.push(indices.len());
        }

        Ok(Self { n, indptr, indices, weights, node_ids: None })
    }

    /// Attach the caller's external identifiers (e.g. skeleton ids), one per dense id.
    pub fn with_node_ids(mut self, ids: Vec<u64>) -> Result<Self> {
        if ids.len() != self.n {
            return Err(Error::InvalidGraph(format!(
                "expected {} node ids, got {}",
                self.n,
                ids.len()
            )));
        }
        let mut seen: HashMap<u64, usize> = HashMap::with_capacity(ids.len());
        for (i, &id) in ids.iter().enumerate() {
            if let Some(prev) = seen.insert(id, i) {
                return Err(Error::InvalidGraph(format!(
                    "node id {id} is used by both {prev} and {i}"
                )));
            }
        }
        self.node_ids = Some(ids);
        Ok(self)
    }

    pub fn node_count(&self) -> usize {
        self.n
    }

    pub fn edge_count(&self) -> usize {
        self.indices.len()
    }

    pub fn node_ids(&self) -> Option<&[u64]> {
        self.node_ids.as_deref()
    }

    /// Dense index of an external id, if ids are attached and the id is known.
    pub fn index_of(&self, external: u64) -> Option<usize> {
        self.node_ids.as_ref()?.iter().position(|&id| id == external)
    }

    pub fn contains_node(&self, node: usize) -> bool {
        node < self.n
    }

    /// Outgoing `(neighbors, weights)` of `node`; empty for out-of-range nodes.
    pub fn neighbors_and_weights(&self, node: usize) -> (&[usize], &[f64]) {
        if node >= self.n {
            return (&[], &[]);
        }
        let (start, end) = (self.indptr[node], self.indptr[node + 1]);
        (&self.indices[start..end], &self.weights[start..end])
    }

    /// Weight of `source -> target`, `0.0` when the edge is absent.
    pub fn weight(&self, source: usize, target: usize) -> f64 {
        let (nbrs, wts) = self.neighbors_and_weights(source);
        match nbrs.binary_search(&target) {
            Ok(i) => wts[i],
            Err(_) => 0.0,
        }
    }

    pub fn out_weight(&self, node: usize) -> f64 {
        self.neighbors_and_weights(node).1.iter().sum()
    }

    /// Iterate all edges as `(source, target, weight)` in row-major order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.n).flat_map(move |u| {
            let (nbrs, wts) = self.neighbors_and_weights(u);
            nbrs.iter().copied().zip(wts.iter().copied()).map(move |(v, w)| (u, v, w))
        })
    }

    /// The same graph with every edge reversed (`v -> u` for each `u -> v`).
    pub fn transpose(&self) -> Self {
        let n = self.n;
        let mut counts = vec![0usize; n + 1];
        for &v in &self.indices {
            counts[v + 1] += 1;
        }
        for i in 0..n {
            counts[i + 1] += counts[i];
        }
        let indptr = counts.clone();
        let mut cursor = counts;
        let mut indices = vec![0usize; self.indices.len()];
        let mut weights = vec![0.0f64; self.weights.len()];
        // Row-major traversal keeps each transposed row sorted by source.
        for (u, v, w) in self.edges() {
            let slot = cursor[v];
            indices[slot] = u;
            weights[slot] = w;
            cursor[v] += 1;
        }
        Self { n, indptr, indices, weights, node_ids: self.node_ids.clone() }
    }

    /// A copy with all `u -> u` edges removed.
    pub fn without_self_loops(&self) -> Self {
        let mut indptr = Vec::with_capacity(self.n + 1);
        let mut indices = Vec::with_capacity(self.indices.len());
        let mut weights = Vec::with_capacity(self.weights.len());
        indptr.push(0);
        for u in 0..self.n {
            let (nbrs, wts) = self.neighbors_and_weights(u);
            for (&v, &w) in nbrs.iter().zip(wts) {
                if v != u {
                    indices.push(v);
                    weights.push(w);
                }
            }
            indptr.push(indices.len());
        }
        Self { n: self.n, indptr, indices, weights, node_ids: self.node_ids.clone() }
    }

    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut out = vec![vec![0.0; self.n]; self.n];
        for (u, v, w) in self.edges() {
            out[u][v] = w;
        }
        out
    }

    /// Build from a `petgraph` digraph with `f64` edge weights (parallel edges are summed).
    #[cfg(feature = "petgraph")]
    pub fn from_petgraph<N, Ix>(
        graph: &petgraph::Graph<N, f64, petgraph::Directed, Ix>,
    ) -> Result<Self>
    where
        Ix: petgraph::graph::IndexType,
    {
        use petgraph::visit::EdgeRef;
        Self::from_edges(
            graph.node_count(),
            graph
                .edge_references()
                .map(|e| (e.source().index(), e.target().index(), *e.weight())),
        )
    }
}

impl WeightedGraphRef for WeightedDigraph {
    fn node_count(&self) -> usize {
        self.n
    }

    fn neighbors_and_weights_ref(&self, node: usize) -> (&[usize], &[f64]) {
        self.neighbors_and_weights(node)
    }
}

fn check_weight(u: usize, v: usize, w: f64) -> Result<()> {
    if !w.is_finite() {
        return Err(Error::InvalidGraph(format!("edge {u} -> {v} has non-finite weight {w}")));
    }
    if w < 0.0 {
        return Err(Error::InvalidGraph(format!("edge {u} -> {v} has negative weight {w}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_roundtrip_drops_zeros() {
        let adj = vec![
            vec![0.0, 2.0, 1.0],
            vec![0.0, 0.0, 1.0],
            vec![0.0, 0.0, 0.0],
        ];
        let g = WeightedDigraph::from_dense(&adj).unwrap();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.weight(0, 1), 2.0);
        assert_eq!(g.weight(2, 0), 0.0);
        assert_eq!(g.out_weight(0), 3.0);
        assert_eq!(g.to_dense(), adj);
    }

    #[test]
    fn non_square_and_negative_are_rejected() {
        let ragged = vec![vec![0.0, 1.0], vec![0.0]];
        assert!(matches!(WeightedDigraph::from_dense(&ragged), Err(Error::InvalidGraph(_))));

        let negative = vec![vec![0.0, -1.0], vec![0.0, 0.0]];
        assert!(matches!(WeightedDigraph::from_dense(&negative), Err(Error::InvalidGraph(_))));

        let nan = vec![vec![0.0, f64::NAN], vec![0.0, 0.0]];
        assert!(matches!(WeightedDigraph::from_dense(&nan), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn from_edges_sums_duplicates_and_sorts() {
        let g = WeightedDigraph::from_edges(3, [(0, 2, 1.0), (0, 1, 1.0), (0, 2, 0.5)]).unwrap();
        let (nbrs, wts) = g.neighbors_and_weights(0);
        assert_eq!(nbrs, &[1, 2]);
        assert_eq!(wts, &[1.0, 1.5]);

        let out_of_range = WeightedDigraph::from_edges(2, [(0, 5, 1.0)]);
        assert!(matches!(out_of_range, Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn summed_duplicates_must_stay_finite() {
        let err = WeightedDigraph::from_edges(2, [(0, 1, f64::MAX), (0, 1, f64::MAX), (0, 0, 1.0)]);
        assert!(matches!(err, Err(Error::InvalidGraph(_))));

        let g = WeightedDigraph::from_edges(2, [(0, 1, f64::MAX), (0, 1, 0.0)]).unwrap();
        assert_eq!(g.weight(0, 1), f64::MAX);
    }

    #[test]
    fn transpose_reverses_edges() {
        let g = WeightedDigraph::from_edges(3, [(0, 1, 1.0), (2, 1, 3.0), (1, 0, 2.0)]).unwrap();
        let t = g.transpose();
        assert_eq!(t.weight(1, 0), 1.0);
        assert_eq!(t.weight(1, 2), 3.0);
        assert_eq!(t.weight(0, 1), 2.0);
        assert_eq!(t.edge_count(), g.edge_count());
        let (nbrs, _) = t.neighbors_and_weights(1);
        assert_eq!(nbrs, &[0, 2]);
    }

    #[test]
    fn self_loops_can_be_removed() {
        let g = WeightedDigraph::from_edges(2, [(0, 0, 1.0), (0, 1, 1.0), (1, 1, 4.0)]).unwrap();
        let h = g.without_self_loops();
        assert_eq!(h.edge_count(), 1);
        assert_eq!(h.weight(0, 1), 1.0);
        assert_eq!(h.weight(1, 1), 0.0);
    }

    #[test]
    fn node_ids_must_be_distinct_and_complete() {
        let g = WeightedDigraph::from_edges(2, [(0, 1, 1.0)]).unwrap();
        assert!(g.clone().with_node_ids(vec![7]).is_err());
        assert!(g.clone().with_node_ids(vec![7, 7]).is_err());
        let g = g.with_node_ids(vec![100, 200]).unwrap();
        assert_eq!(g.index_of(200), Some(1));
        assert_eq!(g.index_of(300), None);
    }
}
