//! `traverse`: random walks, independent cascades and path aggregation over weighted digraphs.
//!
//! Pipeline:
//! - typed edge layers → [`collapse`] → [`WeightedDigraph`]
//! - [`WeightedDigraph`] → [`to_transition_matrix`] → [`generate_walks`] / [`generate_walks_fast`]
//! - [`WeightedDigraph`] → [`simulate_cascade`] / [`simulate_many`]
//! - walks / cascade paths → [`aggregate`] → [`PathGraph`]
//!
//! Public invariants (must not drift):
//! - **Node order**: node ids are dense `0..n-1`; external ids are carried, never reordered.
//! - **Determinism**: every stochastic operator is reproducible for a fixed `seed`, and the
//!   parallel variants are independent of thread count.
//! - **No silent normalization**: sink handling ([`SinkPolicy`]), walk direction
//!   ([`Direction`]), layer combination ([`CombinePolicy`]) and rate reporting
//!   ([`AggregateConfig::normalize`]) are explicit options.
//! - **No partial results**: a failing call returns an [`Error`], never truncated output.
//!
//! Swappable (allowed to change without breaking the contract):
//! - the exact node sequence drawn by [`BatchSampler`] for a seed (only its statistics are fixed)
//! - iteration strategy (serial vs parallel)

pub mod aggregate;
pub mod cancel;
pub mod cascade;
pub mod collapse;
pub mod graph;
pub mod random_walk;
pub mod topk;
pub mod transition;

pub use aggregate::{
    aggregate, aggregate_traces, cascade_paths, depth_histogram, visit_histogram,
    AggregateConfig, PathCounts, PathGraph, VisitHistogram,
};
pub use cancel::CancelToken;
pub use cascade::{
    simulate_cascade, simulate_many, ActivationEvent, CascadeConfig, CascadeRun, CascadeStats,
    CascadeTrace,
};
pub use collapse::{collapse, CollapsedGraph, CombinePolicy};
pub use graph::{WeightedDigraph, WeightedGraphRef};
pub use random_walk::{
    generate_walks, generate_walks_fast, BatchSampler, ReferenceSampler, Termination, Walk,
    WalkConfig, WalkRun, WalkSampler, WalkStats,
};
pub use topk::top_k;
pub use transition::{
    to_transition_matrix, Direction, Row, RowKind, SinkPolicy, TransitionConfig,
    TransitionMatrix, TransitionStats,
};

#[cfg(feature = "parallel")]
pub use cascade::simulate_many_parallel;
#[cfg(feature = "parallel")]
pub use random_walk::{generate_walks_fast_parallel, generate_walks_parallel};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("unknown node {node} (graph has {node_count} nodes)")]
    UnknownNode { node: usize, node_count: usize },
    #[error("incompatible layers: {0}")]
    IncompatibleLayers(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cancelled after {completed} of {requested} runs")]
    Cancelled { completed: usize, requested: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
