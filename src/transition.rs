//! Stochastic transition matrices derived from a weighted digraph.
//!
//! Rows are stochastic in the direction a walk moves:
//! - [`Direction::Outgoing`]: row `u` is \(P(u \to v) = w(u,v) / \sum_x w(u,x)\)
//! - [`Direction::Incoming`]: row `v` is \(P(v \to u) = w(u,v) / \sum_x w(x,v)\), i.e. the
//!   column-normalised adjacency read as a backward walk.
//!
//! Nodes whose selected-direction weight sums to zero are handled by an explicit
//! [`SinkPolicy`]; nothing ever divides by zero.

use crate::graph::WeightedDigraph;
use crate::{Error, Result};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
}

/// What a zero-weight row becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SinkPolicy {
    /// The node transitions to itself with probability 1.
    #[default]
    SelfAbsorb,
    /// The node transitions uniformly to every node (itself included).
    Uniform,
    /// The node is non-traversable: walks that start at or step into it stop there.
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransitionConfig {
    pub direction: Direction,
    pub sink_policy: SinkPolicy,
}

/// How a single row is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RowKind {
    /// Explicit `(targets, probs)` slices (includes self-absorbing sinks).
    Weighted,
    /// Uniform over `0..n`, stored implicitly.
    Uniform,
    /// No transitions; the walk terminates.
    Excluded,
}

/// A borrowed view of one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Row<'a> {
    Weighted { targets: &'a [usize], probs: &'a [f64] },
    Uniform { n: usize },
    Excluded,
}

/// Normalisation summary returned alongside the matrix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransitionStats {
    pub node_count: usize,
    pub edge_count: usize,
    /// Rows whose selected-direction weight summed to zero.
    pub sink_count: usize,
    /// Per-node selected-direction weight sum. Can be `inf` when finite weights overflow
    /// on addition; probabilities are computed from max-scaled weights and stay exact.
    pub row_sums: Vec<f64>,
}

/// Row-stochastic transition matrix in CSR form. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransitionMatrix {
    n: usize,
    config: TransitionConfig,
    indptr: Vec<usize>,
    targets: Vec<usize>,
    probs: Vec<f64>,
    kinds: Vec<RowKind>,
    sinks: Vec<bool>,
    stats: TransitionStats,
}

/// Normalise `graph` into a transition matrix.
pub fn to_transition_matrix(
    graph: &WeightedDigraph,
    config: TransitionConfig,
) -> Result<TransitionMatrix> {
    let oriented;
    let source = match config.direction {
        Direction::Outgoing => graph,
        Direction::Incoming => {
            oriented = graph.transpose();
            &oriented
        }
    };

    let n = source.node_count();
    let mut indptr = Vec::with_capacity(n + 1);
    let mut targets = Vec::with_capacity(source.edge_count());
    let mut probs = Vec::with_capacity(source.edge_count());
    let mut kinds = Vec::with_capacity(n);
    let mut sinks = vec![false; n];
    let mut row_sums = Vec::with_capacity(n);
    indptr.push(0);

    for u in 0..n {
        let (nbrs, wts) = source.neighbors_and_weights(u);
        // Dividing by the row maximum first keeps the sum finite for any finite weights.
        let max = wts.iter().copied().fold(0.0f64, f64::max);
        let scaled_sum: f64 = if max > 0.0 { wts.iter().map(|&w| w / max).sum() } else { 0.0 };
        row_sums.push(max * scaled_sum);

        if scaled_sum > 0.0 {
            let start = probs.len();
            targets.extend_from_slice(nbrs);
            probs.extend(wts.iter().map(|&w| (w / max) / scaled_sum));
            if let Some(p) = probs[start..].iter().find(|p| !p.is_finite()) {
                return Err(Error::InvalidGraph(format!(
                    "row {u} normalised to a non-finite probability {p}"
                )));
            }
            kinds.push(RowKind::Weighted);
        } else {
            sinks[u] = true;
            match config.sink_policy {
                SinkPolicy::SelfAbsorb => {
                    targets.push(u);
                    probs.push(1.0);
                    kinds.push(RowKind::Weighted);
                }
                SinkPolicy::Uniform => kinds.push(RowKind::Uniform),
                SinkPolicy::Exclude => kinds.push(RowKind::Excluded),
            }
        }
        indptr.push(targets.len());
    }

    let sink_count = sinks.iter().filter(|&&s| s).count();
    debug!(
        nodes = n,
        edges = source.edge_count(),
        sinks = sink_count,
        direction = ?config.direction,
        sink_policy = ?config.sink_policy,
        "built transition matrix"
    );

    Ok(TransitionMatrix {
        n,
        config,
        indptr,
        targets,
        probs,
        kinds,
        sinks,
        stats: TransitionStats {
            node_count: n,
            edge_count: source.edge_count(),
            sink_count,
            row_sums,
        },
    })
}

impl TransitionMatrix {
    /// Validate a dense adjacency matrix and normalise it in one step.
    pub fn from_dense(adj: &[Vec<f64>], config: TransitionConfig) -> Result<Self> {
        let graph = WeightedDigraph::from_dense(adj)?;
        to_transition_matrix(&graph, config)
    }

    pub fn node_count(&self) -> usize {
        self.n
    }

    pub fn config(&self) -> TransitionConfig {
        self.config
    }

    pub fn stats(&self) -> &TransitionStats {
        &self.stats
    }

    /// `None` for out-of-range nodes.
    pub fn row_kind(&self, node: usize) -> Option<RowKind> {
        self.kinds.get(node).copied()
    }

    /// Out-of-range nodes have no transitions and read as [`Row::Excluded`].
    pub fn row(&self, node: usize) -> Row<'_> {
        let Some(&kind) = self.kinds.get(node) else {
            return Row::Excluded;
        };
        match kind {
            RowKind::Weighted => {
                let (start, end) = (self.indptr[node], self.indptr[node + 1]);
                Row::Weighted {
                    targets: &self.targets[start..end],
                    probs: &self.probs[start..end],
                }
            }
            RowKind::Uniform => Row::Uniform { n: self.n },
            RowKind::Excluded => Row::Excluded,
        }
    }

    /// `true` when the node had no selected-direction weight, whatever the policy.
    pub fn is_sink(&self, node: usize) -> bool {
        self.sinks.get(node).copied().unwrap_or(false)
    }

    /// `true` for sinks removed by [`SinkPolicy::Exclude`]; `false` for out-of-range nodes.
    pub fn is_excluded(&self, node: usize) -> bool {
        self.row_kind(node) == Some(RowKind::Excluded)
    }

    pub fn probability(&self, source: usize, target: usize) -> f64 {
        match self.row(source) {
            Row::Weighted { targets, probs } => match targets.binary_search(&target) {
                Ok(i) => probs[i],
                Err(_) => 0.0,
            },
            Row::Uniform { n } if target < n => 1.0 / n as f64,
            Row::Uniform { .. } | Row::Excluded => 0.0,
        }
    }

    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        (0..self.n)
            .map(|u| (0..self.n).map(|v| self.probability(u, v)).collect())
            .collect()
    }
}
