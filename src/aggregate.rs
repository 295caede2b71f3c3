//! Reduce sampled paths (walks, flattened cascades) into visit-frequency graphs.
//!
//! Public invariants:
//! - Σ edge counts = Σ over paths of `(len - 1)`
//! - Σ node counts = Σ over paths of `len`
//!
//! A node is counted once per position it occupies in a path; a self-loop step adds one edge
//! count and one node count (for the new position), never more.

use crate::cascade::CascadeTrace;
use crate::graph::WeightedDigraph;
use crate::topk::top_k;
use crate::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregateConfig {
    /// Report weights as rates (count / number of paths) instead of raw counts.
    pub normalize: bool,
}

/// Counters accumulated by the aggregation fold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PathCounts {
    pub paths: u64,
    pub nodes: BTreeMap<usize, u64>,
    pub edges: BTreeMap<(usize, usize), u64>,
}

impl PathCounts {
    /// Fold step: account for one path.
    pub fn absorb(mut self, path: &[usize]) -> Self {
        self.paths += 1;
        for &v in path {
            *self.nodes.entry(v).or_insert(0) += 1;
        }
        for pair in path.windows(2) {
            *self.edges.entry((pair[0], pair[1])).or_insert(0) += 1;
        }
        self
    }
}

/// Visit-frequency graph over the input node id space. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PathGraph {
    counts: PathCounts,
    normalized: bool,
    /// `1` for raw counts, `1 / paths` for rates, `0` when normalising zero paths.
    scale: f64,
}

/// Aggregate any collection of paths.
///
/// Mixed inputs (walks and cascade paths) can be chained into one iterator; see
/// [`cascade_paths`]. Empty paths are rejected.
pub fn aggregate<I, P>(paths: I, config: AggregateConfig) -> Result<PathGraph>
where
    I: IntoIterator<Item = P>,
    P: AsRef<[usize]>,
{
    let counts = paths.into_iter().enumerate().try_fold(
        PathCounts::default(),
        |acc, (i, path)| {
            let path = path.as_ref();
            if path.is_empty() {
                return Err(Error::InvalidConfig(format!("path {i} is empty")));
            }
            Ok(acc.absorb(path))
        },
    )?;
    Ok(PathGraph::from_counts(counts, config))
}

/// Aggregate cascade traces, each flattened into its root-to-leaf paths.
pub fn aggregate_traces(traces: &[CascadeTrace], config: AggregateConfig) -> Result<PathGraph> {
    aggregate(cascade_paths(traces), config)
}

/// Root-to-leaf paths of every trace, in trace order.
pub fn cascade_paths(traces: &[CascadeTrace]) -> impl Iterator<Item = Vec<usize>> + '_ {
    traces.iter().flat_map(CascadeTrace::paths)
}

impl PathGraph {
    pub fn from_counts(counts: PathCounts, config: AggregateConfig) -> Self {
        let scale = match (config.normalize, counts.paths) {
            (false, _) => 1.0,
            (true, 0) => 0.0,
            (true, p) => 1.0 / p as f64,
        };
        debug!(
            paths = counts.paths,
            nodes = counts.nodes.len(),
            edges = counts.edges.len(),
            normalize = config.normalize,
            "aggregated paths"
        );
        Self { counts, normalized: config.normalize, scale }
    }

    pub fn counts(&self) -> &PathCounts {
        &self.counts
    }

    pub fn path_count(&self) -> u64 {
        self.counts.paths
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Distinct nodes that appear in at least one path.
    pub fn distinct_nodes(&self) -> usize {
        self.counts.nodes.len()
    }

    pub fn node_visits(&self, node: usize) -> u64 {
        self.counts.nodes.get(&node).copied().unwrap_or(0)
    }

    pub fn edge_visits(&self, source: usize, target: usize) -> u64 {
        self.counts.edges.get(&(source, target)).copied().unwrap_or(0)
    }

    pub fn node_weight(&self, node: usize) -> f64 {
        self.node_visits(node) as f64 * self.scale
    }

    pub fn edge_weight(&self, source: usize, target: usize) -> f64 {
        self.edge_visits(source, target) as f64 * self.scale
    }

    /// `(node, weight)` in ascending node order.
    pub fn nodes(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.counts.nodes.iter().map(move |(&v, &c)| (v, c as f64 * self.scale))
    }

    /// `(source, target, weight)` in ascending `(source, target)` order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.counts.edges.iter().map(move |(&(u, v), &c)| (u, v, c as f64 * self.scale))
    }

    pub fn total_node_visits(&self) -> u64 {
        self.counts.nodes.values().sum()
    }

    pub fn total_edge_visits(&self) -> u64 {
        self.counts.edges.values().sum()
    }

    pub fn total_node_weight(&self) -> f64 {
        self.total_node_visits() as f64 * self.scale
    }

    pub fn total_edge_weight(&self) -> f64 {
        self.total_edge_visits() as f64 * self.scale
    }

    /// The `k` most visited nodes, heaviest first.
    pub fn top_nodes(&self, k: usize) -> Vec<(usize, f64)> {
        let ids: Vec<usize> = self.counts.nodes.keys().copied().collect();
        let weights: Vec<f64> = self.counts.nodes.values().map(|&c| c as f64).collect();
        top_k(&weights, k)
            .into_iter()
            .map(|(i, c)| (ids[i], c * self.scale))
            .collect()
    }

    /// The `k` most traversed edges, heaviest first.
    pub fn top_edges(&self, k: usize) -> Vec<((usize, usize), f64)> {
        let ids: Vec<(usize, usize)> = self.counts.edges.keys().copied().collect();
        let weights: Vec<f64> = self.counts.edges.values().map(|&c| c as f64).collect();
        top_k(&weights, k)
            .into_iter()
            .map(|(i, c)| (ids[i], c * self.scale))
            .collect()
    }

    /// Re-enter the core: the path graph as a weighted digraph over `0..node_count`.
    pub fn to_weighted_digraph(&self, node_count: usize) -> Result<WeightedDigraph> {
        if let Some((&max, _)) = self.counts.nodes.last_key_value() {
            if max >= node_count {
                return Err(Error::UnknownNode { node: max, node_count });
            }
        }
        WeightedDigraph::from_edges(node_count, self.edges())
    }

    /// Export for visualisation: node weights become node payloads `(id, weight)`.
    #[cfg(feature = "petgraph")]
    pub fn to_petgraph(&self) -> petgraph::Graph<(usize, f64), f64> {
        let mut graph = petgraph::Graph::with_capacity(self.counts.nodes.len(), self.counts.edges.len());
        let mut index = BTreeMap::new();
        for (v, w) in self.nodes() {
            index.insert(v, graph.add_node((v, w)));
        }
        for (u, v, w) in self.edges() {
            if let (Some(&a), Some(&b)) = (index.get(&u), index.get(&v)) {
                graph.add_edge(a, b, w);
            }
        }
        graph
    }
}

/// Node × position visit counts (`counts[node][position]`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisitHistogram {
    node_count: usize,
    bins: usize,
    counts: Vec<u64>,
}

impl VisitHistogram {
    fn new(node_count: usize, bins: usize) -> Self {
        Self { node_count, bins, counts: vec![0; node_count * bins] }
    }

    fn bump(&mut self, node: usize, position: usize) -> Result<()> {
        if node >= self.node_count {
            return Err(Error::UnknownNode { node, node_count: self.node_count });
        }
        self.counts[node * self.bins + position] += 1;
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Number of position bins (longest path length, or deepest trace + 1).
    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn count(&self, node: usize, position: usize) -> u64 {
        if node >= self.node_count || position >= self.bins {
            return 0;
        }
        self.counts[node * self.bins + position]
    }

    pub fn node_row(&self, node: usize) -> &[u64] {
        if node >= self.node_count {
            return &[];
        }
        &self.counts[node * self.bins..(node + 1) * self.bins]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Mean position at which `node` was visited, `None` if never visited.
    pub fn mean_position(&self, node: usize) -> Option<f64> {
        let row = self.node_row(node);
        let total: u64 = row.iter().sum();
        if total == 0 {
            return None;
        }
        let weighted: f64 = row.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();
        Some(weighted / total as f64)
    }
}

/// How often each node is visited at each hop position across `paths`.
pub fn visit_histogram<P: AsRef<[usize]>>(paths: &[P], node_count: usize) -> Result<VisitHistogram> {
    let bins = paths.iter().map(|p| p.as_ref().len()).max().unwrap_or(0);
    let mut hist = VisitHistogram::new(node_count, bins);
    for path in paths {
        for (position, &node) in path.as_ref().iter().enumerate() {
            hist.bump(node, position)?;
        }
    }
    Ok(hist)
}

/// How often each node is activated at each depth across `traces` (once per trace).
pub fn depth_histogram(traces: &[CascadeTrace], node_count: usize) -> Result<VisitHistogram> {
    let bins = traces.iter().map(|t| t.max_depth() + 1).max().unwrap_or(0);
    let mut hist = VisitHistogram::new(node_count, bins);
    for trace in traces {
        for event in &trace.events {
            hist.bump(event.node, event.depth)?;
        }
    }
    Ok(hist)
}
