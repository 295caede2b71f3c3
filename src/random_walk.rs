//! Random walk generation over a [`TransitionMatrix`].
//!
//! Two samplers share one contract ([`WalkSampler`]):
//! - [`ReferenceSampler`]: one walk at a time, one RNG per walk, each step a linear scan of the
//!   current row.
//! - [`BatchSampler`]: all walks of a chunk advance together, grouped by current node, drawing
//!   from cumulative tables built once per node.
//!
//! Both draw from the same per-node distributions and honor the same stopping rules. They are
//! **not** sequence-identical for a given seed; only their statistics agree.

use crate::cancel::CancelToken;
use crate::transition::{Row, TransitionMatrix};
use crate::{Error, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

/// Options for one walk-generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WalkConfig {
    /// Maximum number of steps; a walk holds at most `max_hops + 1` nodes.
    pub max_hops: usize,
    /// Walks started from each seed.
    pub walks_per_seed: usize,
    /// Walks end as soon as they step into one of these nodes.
    pub stop_set: Vec<usize>,
    /// Keep only walks that ended in `stop_set`.
    pub only_stopped: bool,
    /// Seed for deterministic RNG.
    pub seed: u64,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self { max_hops: 25, walks_per_seed: 100, stop_set: Vec::new(), only_stopped: false, seed: 42 }
    }
}

impl WalkConfig {
    /// Checks that do not depend on the transition model.
    pub fn validate(&self) -> Result<()> {
        if self.walks_per_seed == 0 {
            return Err(Error::InvalidConfig("walks_per_seed must be positive".into()));
        }
        Ok(())
    }
}

/// Why a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Termination {
    HopLimit,
    StopSet,
    /// Reached (or started at) a sink under [`SinkPolicy::Exclude`](crate::SinkPolicy::Exclude).
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Walk {
    pub nodes: Vec<usize>,
    pub termination: Termination,
}

impl Walk {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false` for sampled walks, which hold at least their seed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn hops(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// `None` only for a hand-built walk with no nodes.
    pub fn start(&self) -> Option<usize> {
        self.nodes.first().copied()
    }

    pub fn end(&self) -> Option<usize> {
        self.nodes.last().copied()
    }
}

impl AsRef<[usize]> for Walk {
    fn as_ref(&self) -> &[usize] {
        &self.nodes
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WalkStats {
    /// Walks generated (before `only_stopped` filtering).
    pub walks: usize,
    /// Walks dropped by `only_stopped`.
    pub discarded: usize,
    /// Sum of `len - 1` over generated walks.
    pub total_hops: usize,
    pub hop_limited: usize,
    pub stopped: usize,
    pub excluded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WalkRun {
    pub walks: Vec<Walk>,
    pub stats: WalkStats,
}

/// A walk generation strategy.
///
/// Output order is fixed: for each seed (in input order), `walks_per_seed` consecutive walks.
pub trait WalkSampler {
    fn sample(
        &self,
        model: &TransitionMatrix,
        seeds: &[usize],
        config: &WalkConfig,
        cancel: &CancelToken,
    ) -> Result<WalkRun>;
}

/// Walk-at-a-time sampler with one independent RNG stream per walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceSampler;

/// Hop-at-a-time batch sampler using per-node cumulative tables.
#[derive(Debug, Clone, Copy)]
pub struct BatchSampler {
    /// Walks advanced together; each chunk owns one RNG stream.
    pub chunk_size: usize,
}

impl Default for BatchSampler {
    fn default() -> Self {
        Self { chunk_size: 4096 }
    }
}

pub fn generate_walks(
    model: &TransitionMatrix,
    seeds: &[usize],
    config: &WalkConfig,
) -> Result<WalkRun> {
    ReferenceSampler.sample(model, seeds, config, &CancelToken::new())
}

pub fn generate_walks_fast(
    model: &TransitionMatrix,
    seeds: &[usize],
    config: &WalkConfig,
) -> Result<WalkRun> {
    BatchSampler::default().sample(model, seeds, config, &CancelToken::new())
}

impl WalkSampler for ReferenceSampler {
    fn sample(
        &self,
        model: &TransitionMatrix,
        seeds: &[usize],
        config: &WalkConfig,
        cancel: &CancelToken,
    ) -> Result<WalkRun> {
        let stop = prepare(model, seeds, config)?;
        let requested = seeds.len() * config.walks_per_seed;
        let mut walks = Vec::with_capacity(requested);

        for (i, start) in start_nodes(seeds, config.walks_per_seed).enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled { completed: i, requested });
            }
            let mut rng = ChaCha8Rng::seed_from_u64(stream_seed(config.seed, i as u64));
            walks.push(reference_walk(model, start, config.max_hops, &stop, &mut rng));
        }

        Ok(finish(walks, config, "reference"))
    }
}

impl WalkSampler for BatchSampler {
    fn sample(
        &self,
        model: &TransitionMatrix,
        seeds: &[usize],
        config: &WalkConfig,
        cancel: &CancelToken,
    ) -> Result<WalkRun> {
        let stop = prepare(model, seeds, config)?;
        let chunk_size = checked_chunk_size(self.chunk_size)?;
        let starts: Vec<usize> = start_nodes(seeds, config.walks_per_seed).collect();
        let table = CdfTable::new(model);
        let requested = starts.len();

        let mut walks = Vec::with_capacity(requested);
        for (c, chunk) in starts.chunks(chunk_size).enumerate() {
            let mut rng = ChaCha8Rng::seed_from_u64(stream_seed(config.seed, c as u64));
            let done = walks.len();
            walks.extend(advance_batch(
                model,
                &table,
                chunk,
                config.max_hops,
                &stop,
                &mut rng,
                cancel,
                (done, requested),
            )?);
        }

        Ok(finish(walks, config, "batch"))
    }
}

/// Parallel reference walks.
///
/// Invariant: output is identical to [`generate_walks`] for the same inputs, independent of
/// Rayon thread count.
#[cfg(feature = "parallel")]
pub fn generate_walks_parallel(
    model: &TransitionMatrix,
    seeds: &[usize],
    config: &WalkConfig,
    cancel: &CancelToken,
) -> Result<WalkRun> {
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let stop = prepare(model, seeds, config)?;
    let starts: Vec<usize> = start_nodes(seeds, config.walks_per_seed).collect();
    let requested = starts.len();
    let completed = AtomicUsize::new(0);

    let walks = starts
        .par_iter()
        .enumerate()
        .map(|(i, &start)| {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    completed: completed.load(Ordering::Relaxed),
                    requested,
                });
            }
            let mut rng = ChaCha8Rng::seed_from_u64(stream_seed(config.seed, i as u64));
            let walk = reference_walk(model, start, config.max_hops, &stop, &mut rng);
            completed.fetch_add(1, Ordering::Relaxed);
            Ok(walk)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(finish(walks, config, "reference-parallel"))
}

/// Parallel batch walks: chunks are distributed across workers, one RNG stream per chunk.
///
/// Invariant: output is identical to [`BatchSampler`] with the same chunk size, independent of
/// Rayon thread count.
#[cfg(feature = "parallel")]
pub fn generate_walks_fast_parallel(
    model: &TransitionMatrix,
    seeds: &[usize],
    config: &WalkConfig,
    cancel: &CancelToken,
) -> Result<WalkRun> {
    use rayon::prelude::*;

    let stop = prepare(model, seeds, config)?;
    let chunk_size = checked_chunk_size(BatchSampler::default().chunk_size)?;
    let starts: Vec<usize> = start_nodes(seeds, config.walks_per_seed).collect();
    let table = CdfTable::new(model);
    let requested = starts.len();

    let chunks = starts
        .par_chunks(chunk_size)
        .enumerate()
        .map(|(c, chunk)| {
            let mut rng = ChaCha8Rng::seed_from_u64(stream_seed(config.seed, c as u64));
            advance_batch(
                model,
                &table,
                chunk,
                config.max_hops,
                &stop,
                &mut rng,
                cancel,
                (c * chunk_size, requested),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(finish(chunks.into_iter().flatten().collect(), config, "batch-parallel"))
}

fn reference_walk<R: Rng>(
    model: &TransitionMatrix,
    start: usize,
    max_hops: usize,
    stop: &[bool],
    rng: &mut R,
) -> Walk {
    let mut nodes = Vec::with_capacity(max_hops.min(64) + 1);
    nodes.push(start);
    if model.is_excluded(start) {
        return Walk { nodes, termination: Termination::Excluded };
    }

    let mut curr = start;
    for _ in 0..max_hops {
        let Some(next) = sample_row(model.row(curr), rng) else {
            return Walk { nodes, termination: Termination::Excluded };
        };
        nodes.push(next);
        if let Some(termination) = stop_reason(model, stop, next) {
            return Walk { nodes, termination };
        }
        curr = next;
    }
    Walk { nodes, termination: Termination::HopLimit }
}

/// Single weighted-categorical draw by linear scan of the row.
fn sample_row<R: Rng>(row: Row<'_>, rng: &mut R) -> Option<usize> {
    match row {
        Row::Weighted { targets, probs } => {
            if targets.len() == 1 {
                return Some(targets[0]);
            }
            let mut r = rng.random::<f64>();
            for (i, &p) in probs.iter().enumerate() {
                if r < p {
                    return Some(targets[i]);
                }
                r -= p;
            }
            targets.last().copied()
        }
        Row::Uniform { n } => Some(rng.random_range(0..n)),
        Row::Excluded => None,
    }
}

fn stop_reason(model: &TransitionMatrix, stop: &[bool], node: usize) -> Option<Termination> {
    if stop[node] {
        Some(Termination::StopSet)
    } else if model.is_excluded(node) {
        Some(Termination::Excluded)
    } else {
        None
    }
}

/// Cumulative distributions for every weighted row, laid out like the matrix CSR.
struct CdfTable {
    offsets: Vec<usize>,
    targets: Vec<usize>,
    cdf: Vec<f64>,
}

enum CdfRow<'a> {
    Weighted { targets: &'a [usize], cdf: &'a [f64] },
    Uniform(usize),
    Excluded,
}

impl CdfTable {
    fn new(model: &TransitionMatrix) -> Self {
        let n = model.node_count();
        let mut offsets = Vec::with_capacity(n + 1);
        let mut targets = Vec::new();
        let mut cdf = Vec::new();
        offsets.push(0);
        for u in 0..n {
            if let Row::Weighted { targets: t, probs } = model.row(u) {
                targets.extend_from_slice(t);
                let mut acc = 0.0;
                for &p in probs {
                    acc += p;
                    cdf.push(acc);
                }
            }
            offsets.push(targets.len());
        }
        Self { offsets, targets, cdf }
    }

    fn row<'a>(&'a self, model: &TransitionMatrix, node: usize) -> CdfRow<'a> {
        match model.row(node) {
            Row::Weighted { .. } => {
                let (start, end) = (self.offsets[node], self.offsets[node + 1]);
                CdfRow::Weighted { targets: &self.targets[start..end], cdf: &self.cdf[start..end] }
            }
            Row::Uniform { n } => CdfRow::Uniform(n),
            Row::Excluded => CdfRow::Excluded,
        }
    }
}

impl CdfRow<'_> {
    fn draw<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        match *self {
            CdfRow::Weighted { targets, cdf } => {
                if targets.len() == 1 {
                    return Some(targets[0]);
                }
                let r = rng.random::<f64>();
                // Rounding can leave the last entry just below 1.0; clamp to the last target.
                let i = cdf.partition_point(|&c| c <= r).min(targets.len() - 1);
                Some(targets[i])
            }
            CdfRow::Uniform(n) => Some(rng.random_range(0..n)),
            CdfRow::Excluded => None,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn advance_batch<R: Rng>(
    model: &TransitionMatrix,
    table: &CdfTable,
    starts: &[usize],
    max_hops: usize,
    stop: &[bool],
    rng: &mut R,
    cancel: &CancelToken,
    (completed, requested): (usize, usize),
) -> Result<Vec<Walk>> {
    let mut walks: Vec<Walk> = Vec::with_capacity(starts.len());
    let mut current: Vec<usize> = starts.to_vec();
    let mut active: Vec<usize> = Vec::with_capacity(starts.len());

    for (i, &s) in starts.iter().enumerate() {
        let mut nodes = Vec::with_capacity(max_hops.min(64) + 1);
        nodes.push(s);
        let termination = if model.is_excluded(s) {
            Termination::Excluded
        } else {
            active.push(i);
            Termination::HopLimit
        };
        walks.push(Walk { nodes, termination });
    }

    for hop in 0..max_hops {
        if active.is_empty() {
            break;
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { completed, requested });
        }

        // Group walks by current node so each row is resolved once per hop.
        active.sort_unstable_by_key(|&w| (current[w], w));
        let mut still_active = Vec::with_capacity(active.len());

        let mut j = 0;
        while j < active.len() {
            let node = current[active[j]];
            let mut k = j;
            while k < active.len() && current[active[k]] == node {
                k += 1;
            }

            let row = table.row(model, node);
            for &w in &active[j..k] {
                let Some(next) = row.draw(rng) else {
                    walks[w].termination = Termination::Excluded;
                    continue;
                };
                walks[w].nodes.push(next);
                current[w] = next;
                match stop_reason(model, stop, next) {
                    Some(termination) => walks[w].termination = termination,
                    None => still_active.push(w),
                }
            }
            j = k;
        }

        active = still_active;
        trace!(hop, active = active.len(), "advanced walk batch");
    }

    Ok(walks)
}

/// Validate seeds and options; returns the stop-set membership mask.
fn prepare(model: &TransitionMatrix, seeds: &[usize], config: &WalkConfig) -> Result<Vec<bool>> {
    let n = model.node_count();
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

fn checked_chunk_size(chunk_size: usize) -> Result<usize> {
    if chunk_size == 0 {
        return Err(Error::InvalidConfig("batch chunk_size must be positive".into()));
    }
    Ok(chunk_size)
}

fn start_nodes(seeds: &[usize], walks_per_seed: usize) -> impl Iterator<Item = usize> + '_ {
    seeds.iter().flat_map(move |&s| std::iter::repeat(s).take(walks_per_seed))
}

fn finish(walks: Vec<Walk>, config: &WalkConfig, sampler: &'static str) -> WalkRun {
    let mut stats = WalkStats { walks: walks.len(), ..WalkStats::default() };
    for w in &walks {
        stats.total_hops += w.hops();
        match w.termination {
            Termination::HopLimit => stats.hop_limited += 1,
            Termination::StopSet => stats.stopped += 1,
            Termination::Excluded => stats.excluded += 1,
        }
    }

    let walks = if config.only_stopped {
        let kept: Vec<Walk> =
            walks.into_iter().filter(|w| w.termination == Termination::StopSet).collect();
        stats.discarded = stats.walks - kept.len();
        kept
    } else {
        walks
    };

    debug!(
        sampler,
        walks = stats.walks,
        kept = walks.len(),
        total_hops = stats.total_hops,
        stopped = stats.stopped,
        excluded = stats.excluded,
        "generated walks"
    );
    WalkRun { walks, stats }
}

pub(crate) fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    x
}

/// Seed for the `index`-th independent stream derived from a user seed.
pub(crate) fn stream_seed(seed: u64, index: u64) -> u64 {
    mix64(seed ^ mix64(index.wrapping_add(0x9e3779b97f4a7c15)))
}
