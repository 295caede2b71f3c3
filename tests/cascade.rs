use proptest::prelude::*;
use std::collections::HashSet;
use traverse::{
    aggregate_traces, depth_histogram, simulate_cascade, simulate_many, AggregateConfig,
    CancelToken, CascadeConfig, CascadeTrace, Error, WeightedDigraph, WeightedGraphRef,
};

fn star() -> WeightedDigraph {
    WeightedDigraph::from_edges(3, [(0, 1, 0.5), (0, 2, 0.5)]).unwrap()
}

fn assert_single_activation(traces: &[CascadeTrace]) {
    for t in traces {
        let mut seen = HashSet::new();
        for node in t.nodes() {
            assert!(seen.insert(node), "node {node} activated twice in {t:?}");
        }
    }
}

fn assert_tree_shape(trace: &CascadeTrace, max_depth: usize) {
    assert_eq!(trace.events[0].node, trace.seed);
    assert_eq!(trace.events[0].parent, None);
    assert_eq!(trace.events[0].depth, 0);
    for e in &trace.events[1..] {
        let parent = e.parent.expect("non-seed events have a parent");
        let pd = trace.depth_of(parent).expect("parent activated earlier");
        assert_eq!(e.depth, pd + 1);
        assert!(e.depth <= max_depth);
    }
}

#[test]
fn star_children_activate_at_half_rate() {
    let g = star();
    let cfg = CascadeConfig { max_depth: 1, trials_per_seed: 100_000, seed: 2024, ..Default::default() };
    let run = simulate_many(&g, &[0], &cfg, &CancelToken::new()).unwrap();
    assert_eq!(run.traces.len(), 100_000);

    let counts = run.activation_counts(3).unwrap();
    assert_eq!(counts[0], 100_000);
    for child in [1, 2] {
        let rate = counts[child] as f64 / 100_000.0;
        // sd ~ 0.0016; allow ~6 sd.
        assert!((rate - 0.5).abs() < 0.01, "child {child} rate {rate}");
    }

    // Children fire independently: both active about a quarter of the time.
    let both = run.traces.iter().filter(|t| t.contains(1) && t.contains(2)).count() as f64;
    assert!((both / 100_000.0 - 0.25).abs() < 0.01, "joint rate {}", both / 100_000.0);
    assert_single_activation(&run.traces);
}

#[test]
fn simulate_many_is_reproducible_and_ordered_by_seed() {
    let g = WeightedDigraph::from_dense(&[
        vec![0.0, 0.6, 0.3, 0.0],
        vec![0.2, 0.0, 0.5, 0.9],
        vec![0.0, 0.4, 0.0, 0.7],
        vec![0.5, 0.0, 0.1, 0.0],
    ])
    .unwrap();
    let cfg = CascadeConfig { trials_per_seed: 50, seed: 7, ..Default::default() };
    let a = simulate_many(&g, &[0, 3], &cfg, &CancelToken::new()).unwrap();
    let b = simulate_many(&g, &[0, 3], &cfg, &CancelToken::new()).unwrap();
    assert_eq!(a, b);
    assert!(a.traces[..50].iter().all(|t| t.seed == 0));
    assert!(a.traces[50..].iter().all(|t| t.seed == 3));
    assert_eq!(a.stats.traces, 100);
    assert_eq!(a.stats.activations, a.traces.iter().map(|t| t.len()).sum::<usize>());
    for t in &a.traces {
        assert_tree_shape(t, cfg.max_depth);
    }
    assert_single_activation(&a.traces);
}

#[test]
fn flattened_cascades_feed_the_aggregator() {
    let g = WeightedDigraph::from_edges(4, [(0, 1, 1.0), (0, 2, 1.0), (1, 3, 1.0), (2, 3, 1.0)])
        .unwrap();
    let cfg = CascadeConfig { trials_per_seed: 3, ..Default::default() };
    let run = simulate_many(&g, &[0], &cfg, &CancelToken::new()).unwrap();
    // Certain edges: every trace is 0 -> {1, 2}, 1 -> 3, so paths are [0,2] and [0,1,3].
    let pg = aggregate_traces(&run.traces, AggregateConfig::default()).unwrap();
    assert_eq!(pg.path_count(), 6);
    assert_eq!(pg.node_visits(0), 6);
    assert_eq!(pg.edge_visits(1, 3), 3);
    assert_eq!(pg.edge_visits(2, 3), 0);
    assert_eq!(pg.total_node_visits(), 3 * (2 + 3));
    assert_eq!(pg.total_edge_visits(), 3 * (1 + 2));

    let hist = depth_histogram(&run.traces, 4).unwrap();
    assert_eq!(hist.count(3, 2), 3);
    assert_eq!(hist.total(), 12);
}

#[test]
fn unknown_seed_and_bad_options_fail() {
    let g = star();
    let cancel = CancelToken::new();
    let err = simulate_many(&g, &[0, 5], &CascadeConfig::default(), &cancel).unwrap_err();
    assert!(matches!(err, Error::UnknownNode { node: 5, node_count: 3 }));

    let err = simulate_many(&g, &[], &CascadeConfig::default(), &cancel).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));

    let negative = CascadeConfig { activation_scale: -1.0, ..Default::default() };
    assert!(matches!(simulate_cascade(&g, 0, &negative), Err(Error::InvalidConfig(_))));

    let bad_stop = CascadeConfig { stop_set: vec![3], ..Default::default() };
    assert!(matches!(simulate_cascade(&g, 0, &bad_stop), Err(Error::UnknownNode { node: 3, .. })));
}

/// An unvalidated adapter: the engine's cheap sanity check must still catch bad weights.
struct RawAdj {
    adj: Vec<Vec<usize>>,
    wts: Vec<Vec<f64>>,
}

impl WeightedGraphRef for RawAdj {
    fn node_count(&self) -> usize {
        self.adj.len()
    }

    fn neighbors_and_weights_ref(&self, node: usize) -> (&[usize], &[f64]) {
        let nbrs = self.adj.get(node).map(Vec::as_slice).unwrap_or(&[]);
        let wts = self.wts.get(node).map(Vec::as_slice).unwrap_or(&[]);
        (nbrs, wts)
    }
}

#[test]
fn invalid_weights_from_raw_adapters_are_rejected() {
    let g = RawAdj { adj: vec![vec![1], vec![]], wts: vec![vec![f64::NAN], vec![]] };
    let err = simulate_cascade(&g, 0, &CascadeConfig::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidGraph(_)));

    let g = RawAdj { adj: vec![vec![1], vec![]], wts: vec![vec![-0.5], vec![]] };
    let err = simulate_many(&g, &[0], &CascadeConfig::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidGraph(_)));
    // Neighbour outside the adapter's own node range.
    let g = RawAdj { adj: vec![vec![5], vec![]], wts: vec![vec![1.0], vec![]] };
    let err = simulate_cascade(&g, 0, &CascadeConfig::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidGraph(_)));

    // Neighbour and weight slices of different lengths.
    let g = RawAdj { adj: vec![vec![1, 0], vec![]], wts: vec![vec![1.0], vec![]] };
    let err = simulate_many(&g, &[0], &CascadeConfig::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidGraph(_)));
}

#[test]
fn cancelled_token_returns_no_traces() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let cfg = CascadeConfig { trials_per_seed: 10, ..Default::default() };
    let err = simulate_many(&star(), &[0, 1], &cfg, &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled { completed: 0, requested: 20 }));
}

proptest! {
    // Property: no trace ever activates a node twice, and every trace is a depth-consistent tree.
    #[test]
    fn prop_single_activation_and_tree_shape(
        n in 1usize..9,
        entries in prop::collection::vec((0usize..9, 0usize..9, 0.0f64..1.5), 0..30),
        max_depth in 0usize..6,
        scale in 0.0f64..3.0,
        seed in any::<u64>(),
    ) {
        let g = WeightedDigraph::from_edges(n, entries.into_iter().map(|(u, v, w)| (u % n, v % n, w))).unwrap();
        let cfg = CascadeConfig { max_depth, activation_scale: scale, trials_per_seed: 4, seed, ..Default::default() };
        let seeds: Vec<usize> = (0..n).collect();
        let run = simulate_many(&g, &seeds, &cfg, &CancelToken::new()).unwrap();
        prop_assert_eq!(run.traces.len(), n * 4);
        assert_single_activation(&run.traces);
        for t in &run.traces {
            assert_tree_shape(t, max_depth);
            for e in &t.events[1..] {
                let parent = e.parent.unwrap_or(t.seed);
                prop_assert!(g.weight(parent, e.node) > 0.0);
            }
        }
    }
}

#[cfg(feature = "parallel")]
#[test]
fn parallel_cascades_match_serial() {
    use traverse::simulate_many_parallel;

    let g = star();
    let cfg = CascadeConfig { trials_per_seed: 500, seed: 11, ..Default::default() };
    let cancel = CancelToken::new();
    let pool1 = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let pool4 = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();

    let p1 = pool1.install(|| simulate_many_parallel(&g, &[0, 1], &cfg, &cancel)).unwrap();
    let p4 = pool4.install(|| simulate_many_parallel(&g, &[0, 1], &cfg, &cancel)).unwrap();
    assert_eq!(p1, p4);
    assert_eq!(p1, simulate_many(&g, &[0, 1], &cfg, &cancel).unwrap());
}
