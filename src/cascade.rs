//! Independent-activation cascades.
//!
//! Starting from a seed, every active node at depth `d < max_depth` gets one Bernoulli trial
//! per outgoing neighbour that has not been activated yet, with success probability
//! `min(1, w * activation_scale)`. A node is activated at most once per trace.
//!
//! Nodes in the stop set activate normally but do not propagate further.
//!
//! Visited bookkeeping uses a "visited stamp" (`Vec<u32>`) so Monte Carlo runs do not
//! re-allocate a `seen` buffer for every trial.

use crate::cancel::CancelToken;
use crate::graph::WeightedGraphRef;
use crate::random_walk::stream_seed;
use crate::{Error, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CascadeConfig {
    /// Activations never go deeper than this (the seed is depth 0).
    pub max_depth: usize,
    /// Multiplier turning raw weights into activation probabilities (clamped to 1).
    pub activation_scale: f64,
    /// Independent trials per seed in [`simulate_many`].
    pub trials_per_seed: usize,
    /// Activated, but never propagate.
    pub stop_set: Vec<usize>,
    /// Seed for deterministic RNG.
    pub seed: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self { max_depth: 10, activation_scale: 1.0, trials_per_seed: 1, stop_set: Vec::new(), seed: 42 }
    }
}

impl CascadeConfig {
    /// Checks that do not depend on the graph.
    pub fn validate(&self) -> Result<()> {
        if !self.activation_scale.is_finite() || self.activation_scale < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "activation_scale must be finite and non-negative, got {}",
                self.activation_scale
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActivationEvent {
    pub node: usize,
    /// Node whose trial activated this one; `None` for the seed.
    pub parent: Option<usize>,
    pub depth: usize,
}

/// Activation tree rooted at `seed`, events in activation order (the seed first).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CascadeTrace {
    pub seed: usize,
    pub events: Vec<ActivationEvent>,
}

impl CascadeTrace {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.events.iter().map(|e| e.node)
    }

    pub fn contains(&self, node: usize) -> bool {
        self.events.iter().any(|e| e.node == node)
    }

    pub fn depth_of(&self, node: usize) -> Option<usize> {
        self.events.iter().find(|e| e.node == node).map(|e| e.depth)
    }

    pub fn max_depth(&self) -> usize {
        self.events.iter().map(|e| e.depth).max().unwrap_or(0)
    }

    /// Activated nodes that activated nothing themselves.
    pub fn leaves(&self) -> Vec<usize> {
        let parents: std::collections::HashSet<usize> =
            self.events.iter().filter_map(|e| e.parent).collect();
        self.events.iter().map(|e| e.node).filter(|n| !parents.contains(n)).collect()
    }

    /// Root-to-`node` chain, or `None` if `node` was never activated.
    pub fn path_to(&self, node: usize) -> Option<Vec<usize>> {
        let parent_of: HashMap<usize, Option<usize>> =
            self.events.iter().map(|e| (e.node, e.parent)).collect();
        chain(&parent_of, node)
    }

    /// One root-to-leaf path per leaf, in activation order of the leaves.
    pub fn paths(&self) -> Vec<Vec<usize>> {
        let parent_of: HashMap<usize, Option<usize>> =
            self.events.iter().map(|e| (e.node, e.parent)).collect();
        self.leaves().into_iter().filter_map(|leaf| chain(&parent_of, leaf)).collect()
    }
}

fn chain(parent_of: &HashMap<usize, Option<usize>>, node: usize) -> Option<Vec<usize>> {
    let mut path = vec![node];
    let mut cur = *parent_of.get(&node)?;
    while let Some(p) = cur {
        path.push(p);
        cur = *parent_of.get(&p)?;
    }
    path.reverse();
    Some(path)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CascadeStats {
    pub traces: usize,
    /// Activated nodes summed over traces (seeds included).
    pub activations: usize,
    pub max_depth_reached: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CascadeRun {
    pub traces: Vec<CascadeTrace>,
    pub stats: CascadeStats,
}

impl CascadeRun {
    /// Number of traces in which each node was activated.
    pub fn activation_counts(&self, node_count: usize) -> Result<Vec<u64>> {
        let mut counts = vec![0u64; node_count];
        for trace in &self.traces {
            for node in trace.nodes() {
                let slot = counts
                    .get_mut(node)
                    .ok_or(Error::UnknownNode { node, node_count })?;
                *slot += 1;
            }
        }
        Ok(counts)
    }
}

/// Run a single cascade from `seed`.
///
/// Uses the same RNG stream as the first trial of [`simulate_many`], so the two agree.
pub fn simulate_cascade<G: WeightedGraphRef>(
    graph: &G,
    seed: usize,
    config: &CascadeConfig,
) -> Result<CascadeTrace> {
    let stop = prepare(graph, std::slice::from_ref(&seed), config)?;
    let mut state = Scratch::new(graph.node_count());
    let mut rng = ChaCha8Rng::seed_from_u64(stream_seed(config.seed, 0));
    cascade_trace(graph, seed, config, &stop, &mut state, &mut rng)
}

/// Monte Carlo cascades: `trials_per_seed` independent traces from each seed.
///
/// Trial `i` (in output order) uses its own RNG stream derived from `config.seed`, so output
/// is reproducible and matches [`simulate_many_parallel`].
pub fn simulate_many<G: WeightedGraphRef>(
    graph: &G,
    seeds: &[usize],
    config: &CascadeConfig,
    cancel: &CancelToken,
) -> Result<CascadeRun> {
    let stop = prepare(graph, seeds, config)?;
    if config.trials_per_seed == 0 {
        return Err(Error::InvalidConfig("trials_per_seed must be positive".into()));
    }
    let requested = seeds.len() * config.trials_per_seed;
    let mut state = Scratch::new(graph.node_count());
    let mut traces = Vec::with_capacity(requested);

    for (i, seed) in trial_seeds(seeds, config.trials_per_seed).enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { completed: i, requested });
        }
        let mut rng = ChaCha8Rng::seed_from_u64(stream_seed(config.seed, i as u64));
        traces.push(cascade_trace(graph, seed, config, &stop, &mut state, &mut rng)?);
    }

    Ok(finish(traces))
}

/// Parallel [`simulate_many`]; identical output independent of Rayon thread count.
#[cfg(feature = "parallel")]
pub fn simulate_many_parallel<G>(
    graph: &G,
    seeds: &[usize],
    config: &CascadeConfig,
    cancel: &CancelToken,
) -> Result<CascadeRun>
where
    G: WeightedGraphRef + Sync,
{
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let stop = prepare(graph, seeds, config)?;
    if config.trials_per_seed == 0 {
        return Err(Error::InvalidConfig("trials_per_seed must be positive".into()));
    }
    let jobs: Vec<usize> = trial_seeds(seeds, config.trials_per_seed).collect();
    let requested = jobs.len();
    let completed = AtomicUsize::new(0);

    let traces = jobs
        .par_iter()
        .enumerate()
        .map_init(
            || Scratch::new(graph.node_count()),
            |state, (i, &seed)| {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled {
                        completed: completed.load(Ordering::Relaxed),
                        requested,
                    });
                }
                let mut rng = ChaCha8Rng::seed_from_u64(stream_seed(config.seed, i as u64));
                let trace = cascade_trace(graph, seed, config, &stop, state, &mut rng)?;
                completed.fetch_add(1, Ordering::Relaxed);
                Ok(trace)
            },
        )
        .collect::<Result<Vec<_>>>()?;

    Ok(finish(traces))
}

/// Per-worker scratch buffers, reused across trials.
struct Scratch {
    visited: Vec<u32>,
    stamp: u32,
}

impl Scratch {
    fn new(n: usize) -> Self {
        Self { visited: vec![0u32; n], stamp: 0 }
    }

    fn next_stamp(&mut self) -> u32 {
        self.stamp = self.stamp.wrapping_add(1);
        if self.stamp == 0 {
            // Wrapped: stale stamps could alias, so reset the buffer.
            self.visited.fill(0);
            self.stamp = 1;
        }
        self.stamp
    }
}

fn cascade_trace<G: WeightedGraphRef, R: Rng>(
    graph: &G,
    seed: usize,
    config: &CascadeConfig,
    stop: &[bool],
    state: &mut Scratch,
    rng: &mut R,
) -> Result<CascadeTrace> {
    let stamp = state.next_stamp();
    state.visited[seed] = stamp;

    let mut events = vec![ActivationEvent { node: seed, parent: None, depth: 0 }];
    // The frontier at depth `d` is the contiguous run of events added during depth `d - 1`.
    let mut head = 0usize;
    let mut depth = 0usize;

    while depth < config.max_depth && head < events.len() {
        let tail = events.len();
        for idx in head..tail {
            let cur = events[idx].node;
            if stop[cur] {
                continue;
            }
            let (nbrs, wts) = graph.neighbors_and_weights_ref(cur);
            if nbrs.len() != wts.len() {
                return Err(Error::InvalidGraph(format!(
                    "node {cur} has {} neighbors but {} weights",
                    nbrs.len(),
                    wts.len()
                )));
            }
            for (&nx, &w) in nbrs.iter().zip(wts) {
                if nx >= state.visited.len() {
                    return Err(Error::InvalidGraph(format!(
                        "edge {cur} -> {nx} is outside the node range 0..{}",
                        state.visited.len()
                    )));
                }
                if !w.is_finite() || w < 0.0 {
                    return Err(Error::InvalidGraph(format!(
                        "edge {cur} -> {nx} has invalid weight {w}"
                    )));
                }
                if state.visited[nx] == stamp {
                    continue;
                }
                let p = (w * config.activation_scale).min(1.0);
                if p > 0.0 && rng.random::<f64>() < p {
                    state.visited[nx] = stamp;
                    events.push(ActivationEvent { node: nx, parent: Some(cur), depth: depth + 1 });
                }
            }
        }
        head = tail;
        depth += 1;
    }

    Ok(CascadeTrace { seed, events })
}

fn prepare<G: WeightedGraphRef>(
    graph: &G,
    seeds: &[usize],
    config: &CascadeConfig,
) -> Result<Vec<bool>> {
    let n = graph.node_count();
    if seeds.is_empty() {
        return Err(Error::InvalidConfig("at least one seed node is required".into()));
    }
    config.validate()?;
    for &s in seeds {
        if s >= n {
            return Err(Error::UnknownNode { node: s, node_count: n });
        }
    }
    let mut stop = vec![false; n];
    for &s in &config.stop_set {
        if s >= n {
            return Err(Error::UnknownNode { node: s, node_count: n });
        }
        stop[s] = true;
    }
    Ok(stop)
}

fn trial_seeds(seeds: &[usize], trials: usize) -> impl Iterator<Item = usize> + '_ {
    seeds.iter().flat_map(move |&s| std::iter::repeat(s).take(trials))
}

fn finish(traces: Vec<CascadeTrace>) -> CascadeRun {
    let stats = CascadeStats {
        traces: traces.len(),
        activations: traces.iter().map(CascadeTrace::len).sum(),
        max_depth_reached: traces.iter().map(CascadeTrace::max_depth).max().unwrap_or(0),
    };
    debug!(
        traces = stats.traces,
        activations = stats.activations,
        max_depth = stats.max_depth_reached,
        "simulated cascades"
    );
    CascadeRun { traces, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WeightedDigraph;

    fn line(n: usize) -> WeightedDigraph {
        WeightedDigraph::from_edges(n, (0..n - 1).map(|i| (i, i + 1, 1.0))).unwrap()
    }

    #[test]
    fn certain_edges_follow_depth_limit() {
        let g = line(5);
        let cfg = CascadeConfig { max_depth: 2, ..Default::default() };
        let trace = simulate_cascade(&g, 0, &cfg).unwrap();
        assert_eq!(trace.nodes().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(trace.depth_of(2), Some(2));
        assert_eq!(trace.paths(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn max_depth_zero_is_seed_only() {
        let g = line(3);
        let cfg = CascadeConfig { max_depth: 0, ..Default::default() };
        let trace = simulate_cascade(&g, 1, &cfg).unwrap();
        assert_eq!(trace.events, vec![ActivationEvent { node: 1, parent: None, depth: 0 }]);
        assert_eq!(trace.paths(), vec![vec![1]]);
    }

    #[test]
    fn stop_set_nodes_do_not_propagate() {
        let g = line(4);
        let cfg = CascadeConfig { stop_set: vec![1], ..Default::default() };
        let trace = simulate_cascade(&g, 0, &cfg).unwrap();
        assert_eq!(trace.nodes().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn scale_clamps_to_certain_activation() {
        // Weight 0.2 * scale 10 => p = min(1, 2) = 1.
        let g = WeightedDigraph::from_edges(2, [(0, 1, 0.2)]).unwrap();
        let cfg = CascadeConfig { activation_scale: 10.0, ..Default::default() };
        for seed in 0..20 {
            let trace = simulate_cascade(&g, 0, &CascadeConfig { seed, ..cfg.clone() }).unwrap();
            assert!(trace.contains(1));
        }
    }

    #[test]
    fn zero_scale_never_activates() {
        let g = line(3);
        let cfg = CascadeConfig { activation_scale: 0.0, ..Default::default() };
        let trace = simulate_cascade(&g, 0, &cfg).unwrap();
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn diamond_reactivation_is_impossible() {
        // 0 -> {1, 2} -> 3: node 3 can be reached through either parent but activates once.
        let g = WeightedDigraph::from_edges(4, [(0, 1, 1.0), (0, 2, 1.0), (1, 3, 1.0), (2, 3, 1.0)])
            .unwrap();
        let trace = simulate_cascade(&g, 0, &CascadeConfig::default()).unwrap();
        assert_eq!(trace.len(), 4);
        assert_eq!(trace.events[3], ActivationEvent { node: 3, parent: Some(1), depth: 2 });
        assert_eq!(trace.leaves(), vec![2, 3]);
        assert_eq!(trace.path_to(3), Some(vec![0, 1, 3]));
        assert_eq!(trace.paths(), vec![vec![0, 2], vec![0, 1, 3]]);
    }

    #[test]
    fn single_cascade_matches_first_monte_carlo_trial() {
        let g = WeightedDigraph::from_edges(4, [(0, 1, 0.5), (0, 2, 0.5), (1, 3, 0.5), (2, 3, 0.5)])
            .unwrap();
        for seed in 0..32 {
            let cfg = CascadeConfig { trials_per_seed: 3, seed, ..Default::default() };
            let single = simulate_cascade(&g, 0, &cfg).unwrap();
            let many = simulate_many(&g, &[0], &cfg, &CancelToken::new()).unwrap();
            assert_eq!(single, many.traces[0]);
        }
    }

    #[test]
    fn stamp_wraparound_resets_buffer() {
        let mut s = Scratch::new(2);
        s.stamp = u32::MAX;
        s.visited[0] = 1;
        assert_eq!(s.next_stamp(), 1);
        assert_eq!(s.visited, vec![0, 0]);
    }

    #[test]
    fn invalid_options_fail_fast() {
        let g = line(3);
        let bad_scale = CascadeConfig { activation_scale: f64::NAN, ..Default::default() };
        assert!(matches!(simulate_cascade(&g, 0, &bad_scale), Err(Error::InvalidConfig(_))));
        assert!(matches!(
            simulate_cascade(&g, 3, &CascadeConfig::default()),
            Err(Error::UnknownNode { node: 3, node_count: 3 })
        ));
        let zero_trials = CascadeConfig { trials_per_seed: 0, ..Default::default() };
        assert!(matches!(
            simulate_many(&g, &[0], &zero_trials, &CancelToken::new()),
            Err(Error::InvalidConfig(_))
        ));
    }
}
