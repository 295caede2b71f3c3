//! Collapse parallel typed edge layers (e.g. axon-dendrite, axon-axon, ...) into one simple
//! weighted digraph.

use crate::graph::WeightedDigraph;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt::Display;
use tracing::debug;

/// How weights on the same `(u, v)` pair combine across layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CombinePolicy {
    #[default]
    Sum,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CollapsedGraph {
    graph: WeightedDigraph,
    labels: Vec<String>,
    policy: CombinePolicy,
}

impl CollapsedGraph {
    pub fn weight(&self, source: usize, target: usize) -> f64 {
        self.graph.weight(source, target)
    }

    pub fn graph(&self) -> &WeightedDigraph {
        &self.graph
    }

    pub fn into_graph(self) -> WeightedDigraph {
        self.graph
    }

    /// Layer labels in input order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn policy(&self) -> CombinePolicy {
        self.policy
    }
}

/// Merge `(label, layer)` pairs that share one node id space.
pub fn collapse<'a, I, L>(layers: I, policy: CombinePolicy) -> Result<CollapsedGraph>
where
    I: IntoIterator<Item = (L, &'a WeightedDigraph)>,
    L: Display,
{
    let mut labels = Vec::new();
    let mut node_count: Option<usize> = None;
    let mut node_ids: Option<&[u64]> = None;
    let mut combined: BTreeMap<(usize, usize), f64> = BTreeMap::new();

    for (label, layer) in layers {
        let label = label.to_string();
        match node_count {
            Some(n) if n != layer.node_count() => {
                return Err(Error::IncompatibleLayers(format!(
                    "layer {label:?} has {} nodes, expected {n}",
                    layer.node_count()
                )));
            }
            _ => node_count = Some(layer.node_count()),
        }
        if let Some(ids) = layer.node_ids() {
            match node_ids {
                Some(seen) if seen != ids => {
                    return Err(Error::IncompatibleLayers(format!(
                        "layer {label:?} uses a different node id mapping"
                    )));
                }
                _ => node_ids = Some(ids),
            }
        }

        for (u, v, w) in layer.edges() {
            combined
                .entry((u, v))
                .and_modify(|acc| match policy {
                    CombinePolicy::Sum => *acc += w,
                    CombinePolicy::Max => *acc = acc.max(w),
                })
                .or_insert(w);
        }
        labels.push(label);
    }

    let Some(n) = node_count else {
        return Err(Error::InvalidConfig("no layers to collapse".into()));
    };

    let mut graph =
        WeightedDigraph::from_edges(n, combined.into_iter().map(|((u, v), w)| (u, v, w)))?;
    if let Some(ids) = node_ids {
        graph = graph.with_node_ids(ids.to_vec())?;
    }

    debug!(layers = labels.len(), nodes = n, edges = graph.edge_count(), ?policy, "collapsed layers");
    Ok(CollapsedGraph { graph, labels, policy })
}
