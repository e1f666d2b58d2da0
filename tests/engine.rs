//! End-to-end engine scenarios

use std::sync::mpsc;

use multilevel_layout::config::Backend;
use multilevel_layout::{
    GraphData, HostNode, LayoutConfig, LayoutEngine, LayoutMode, NodeId, NodePosition,
    PositionBuffer, RefinementState, TickOutcome,
};

fn distance(a: &NodePosition, b: &NodePosition) -> f32 {
    let (dx, dy) = (a.position.x - b.position.x, a.position.y - b.position.y);
    (dx * dx + dy * dy).sqrt()
}

fn ring_config(seed: u64) -> LayoutConfig {
    let mut config = LayoutConfig::default();
    config.hierarchy.min_coarse_size = 2;
    config.driver.seed = seed;
    config
}

#[test]
fn coincident_nodes_separate_after_one_step() {
    let graph = GraphData {
        nodes: (0..3).map(|i| HostNode::new(i, 0.0, 0.0, 0.0)).collect(),
        edges: vec![],
    };
    let engine = LayoutEngine::new(LayoutConfig::default(), graph, PositionBuffer::new()).unwrap();
    engine.initialize();
    assert_eq!(engine.step(), TickOutcome::Stepped);

    let positions = engine.current_positions();
    assert_eq!(positions.len(), 3);
    for i in 0..3 {
        assert!(positions[i].position.x.is_finite() && positions[i].position.y.is_finite());
        for j in (i + 1)..3 {
            let d = distance(&positions[i], &positions[j]);
            assert!(d > 1e-4, "nodes {i} and {j} still coincide ({d})");
        }
    }
}

#[test]
fn ring_refines_to_even_edge_lengths() {
    let ideal = LayoutConfig::default().force.ideal_length;

    for seed in 0..5 {
        let config = ring_config(seed);
        let engine = LayoutEngine::new(config, GraphData::ring(10), PositionBuffer::new()).unwrap();
        engine.initialize();
        let levels = engine.status().level_sizes;
        assert!(levels.len() > 1, "seed {seed}: ring did not coarsen: {levels:?}");

        engine.run_to_convergence(100_000);
        assert_eq!(engine.status().state, Some(RefinementState::Converged));

        let sink = engine.shutdown();
        let positions = sink.positions();
        assert_eq!(positions.len(), 10);

        for i in 0..10u64 {
            let a = sink.get(NodeId(i)).unwrap();
            let b = sink.get(NodeId((i + 1) % 10)).unwrap();
            let d = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
            assert!(
                (0.5 * ideal..=3.0 * ideal).contains(&d),
                "seed {seed}: edge {i} has length {d}"
            );
        }
        for i in 0..10 {
            for j in (i + 1)..10 {
                let d = distance(&positions[i], &positions[j]);
                assert!(d > 1.0, "seed {seed}: nodes {i} and {j} overlap ({d})");
            }
        }
    }
}

#[test]
fn reinitialize_after_clear_matches_fresh_build() {
    let graph = GraphData::ring(24);

    let reused = LayoutEngine::new(ring_config(3), graph.clone(), PositionBuffer::new()).unwrap();
    reused.initialize();
    for _ in 0..50 {
        reused.step();
    }
    reused.clear();
    reused.initialize();

    let fresh = LayoutEngine::new(ring_config(3), graph, PositionBuffer::new()).unwrap();
    fresh.initialize();

    let (a, b) = (reused.status(), fresh.status());
    assert_eq!(a.level_sizes, b.level_sizes);
    assert_eq!(a.active_level, b.active_level);
    assert_eq!(a.temperature, b.temperature);
    assert_eq!(a.ticks, 0);

    reused.run_to_convergence(100_000);
    fresh.run_to_convergence(100_000);
    assert_eq!(reused.shutdown().positions(), fresh.shutdown().positions());
}

#[test]
fn tick_during_a_step_is_dropped() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let mut calls = 0;
    let sink = move |_batch: &[NodePosition]| {
        if calls == 0 {
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }
        calls += 1;
    };

    let mut config = LayoutConfig::default();
    config.mode = LayoutMode::Collision;
    let engine = LayoutEngine::new(config, GraphData::ring(4), sink).unwrap();
    engine.initialize();

    std::thread::scope(|scope| {
        let worker = scope.spawn(|| engine.step());
        entered_rx.recv().unwrap();

        assert_eq!(engine.step(), TickOutcome::Dropped);
        assert_eq!(engine.tick(1.0), TickOutcome::Dropped);
        assert_eq!(engine.dropped_ticks(), 2);

        release_tx.send(()).unwrap();
        assert_eq!(worker.join().unwrap(), TickOutcome::Stepped);
    });

    assert_eq!(engine.status().dropped_ticks, 2);
    assert_eq!(engine.status().ticks, 1);
    assert_eq!(engine.step(), TickOutcome::Stepped);
}

#[test]
fn empty_graph_is_a_no_op() {
    let engine =
        LayoutEngine::new(LayoutConfig::default(), GraphData::default(), PositionBuffer::new())
            .unwrap();
    engine.initialize();

    assert!(!engine.is_active());
    assert_eq!(engine.tick(1.0), TickOutcome::Inactive);
    assert_eq!(engine.run_to_convergence(10), 0);
    assert!(engine.current_positions().is_empty());
    assert_eq!(engine.shutdown().batches(), 0);
}

#[test]
fn simple_mode_converges_on_one_level() {
    let mut config = LayoutConfig::default();
    config.mode = LayoutMode::Simple;
    let engine = LayoutEngine::new(config, GraphData::ring(8), PositionBuffer::new()).unwrap();
    engine.initialize();

    let mut changes = 0;
    loop {
        match engine.step() {
            TickOutcome::LevelChanged { .. } => changes += 1,
            TickOutcome::Converged => break,
            TickOutcome::Stepped => {}
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(changes, 0);

    let sink = engine.shutdown();
    assert_eq!(sink.batches(), 1);
    assert!(sink.positions().iter().all(|p| p.position.x.is_finite()));
}

#[test]
fn collision_mode_keeps_small_graphs_apart() {
    let mut config = LayoutConfig::default();
    config.mode = LayoutMode::Auto;
    let radius = config.collision.collider_radius;
    let engine = LayoutEngine::new(config, GraphData::ring(5), PositionBuffer::new()).unwrap();
    engine.initialize();

    assert_eq!(engine.run_to_convergence(300), 300);
    assert!(engine.is_active());

    let sink = engine.shutdown();
    assert_eq!(sink.batches(), 300);
    let positions = sink.positions();
    for i in 0..positions.len() {
        for j in (i + 1)..positions.len() {
            assert!(distance(&positions[i], &positions[j]) > radius);
        }
    }
}

#[test]
fn gpu_request_still_lays_out() {
    let mut config = ring_config(1);
    config.driver.backend = Backend::Gpu;
    let engine = LayoutEngine::new(config, GraphData::ring(10), PositionBuffer::new()).unwrap();
    engine.initialize();
    engine.run_to_convergence(100_000);

    assert!(!engine.is_active());
    assert_eq!(engine.shutdown().positions().len(), 10);
}
