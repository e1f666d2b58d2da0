//! Property tests for coarsening and the pair force laws

use std::collections::BTreeSet;

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use multilevel_layout::config::{ForceParams, HierarchyConfig};
use multilevel_layout::geometry::Vec2;
use multilevel_layout::graph::LevelEdge;
use multilevel_layout::hierarchy::build_hierarchy;
use multilevel_layout::kernel::{attraction, repulsion};

/// Node count plus a deduplicated undirected edge list without self-loops
fn graph_strategy() -> impl Strategy<Value = (usize, Vec<LevelEdge>)> {
    (0usize..60).prop_flat_map(|n| {
        let max = n.max(1);
        (
            Just(n),
            prop::collection::vec((0..max, 0..max, 1u8..5), 0..(n * 3 + 1)),
        )
            .prop_map(|(n, raw)| {
                let unique: BTreeSet<(usize, usize, u8)> = raw
                    .into_iter()
                    .filter(|&(a, b, _)| a != b && a < n && b < n)
                    .map(|(a, b, w)| (a.min(b), a.max(b), w))
                    .collect();
                let mut seen = BTreeSet::new();
                let edges = unique
                    .into_iter()
                    .filter(|&(a, b, _)| seen.insert((a, b)))
                    .map(|(a, b, w)| LevelEdge {
                        a,
                        b,
                        weight: w as f32,
                    })
                    .collect();
                (n, edges)
            })
    })
}

fn config_strategy() -> impl Strategy<Value = HierarchyConfig> {
    (1usize..12, 1usize..12).prop_map(|(max_levels, min_coarse_size)| HierarchyConfig {
        max_levels,
        min_coarse_size,
        ..HierarchyConfig::default()
    })
}

fn point() -> impl Strategy<Value = Vec2> {
    (-1000.0f32..1000.0, -1000.0f32..1000.0).prop_map(|(x, y)| Vec2::new(x, y))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn coarsening_shrinks_and_halts(
        (n, edges) in graph_strategy(),
        config in config_strategy(),
        seed in any::<u64>(),
    ) {
        let h = build_hierarchy(n, &edges, &config, &mut StdRng::seed_from_u64(seed));
        let sizes = h.level_sizes();

        prop_assert!(!sizes.is_empty());
        prop_assert!(sizes.len() <= config.max_levels);
        prop_assert_eq!(sizes[0], n);
        for pair in sizes.windows(2) {
            prop_assert!((pair[1] as f32) < config.coarsening_ratio * pair[0] as f32);
            prop_assert!(pair[0] > config.min_coarse_size);
        }
    }

    #[test]
    fn every_node_has_exactly_one_parent(
        (n, edges) in graph_strategy(),
        seed in any::<u64>(),
    ) {
        let config = HierarchyConfig {
            min_coarse_size: 1,
            ..HierarchyConfig::default()
        };
        let h = build_hierarchy(n, &edges, &config, &mut StdRng::seed_from_u64(seed));

        for k in 1..h.len() {
            let mut parents = vec![0usize; h.levels()[k - 1].node_count()];
            for children in &h.levels()[k].children {
                for c in children.iter() {
                    parents[c] += 1;
                }
            }
            prop_assert!(parents.iter().all(|&p| p == 1), "level {}: {:?}", k, parents);
        }
    }

    #[test]
    fn coarse_edges_are_valid_and_unique(
        (n, edges) in graph_strategy(),
        seed in any::<u64>(),
    ) {
        let config = HierarchyConfig {
            min_coarse_size: 1,
            ..HierarchyConfig::default()
        };
        let h = build_hierarchy(n, &edges, &config, &mut StdRng::seed_from_u64(seed));

        for level in h.levels() {
            let mut seen = BTreeSet::new();
            for e in &level.edges {
                prop_assert!(e.a < e.b);
                prop_assert!(e.b < level.node_count());
                prop_assert!(seen.insert((e.a, e.b)));
            }
        }
    }

    #[test]
    fn same_seed_same_hierarchy(
        (n, edges) in graph_strategy(),
        seed in any::<u64>(),
    ) {
        let config = HierarchyConfig {
            min_coarse_size: 1,
            ..HierarchyConfig::default()
        };
        let a = build_hierarchy(n, &edges, &config, &mut StdRng::seed_from_u64(seed));
        let b = build_hierarchy(n, &edges, &config, &mut StdRng::seed_from_u64(seed));

        prop_assert_eq!(a.len(), b.len());
        for (la, lb) in a.levels().iter().zip(b.levels()) {
            prop_assert_eq!(&la.children, &lb.children);
            prop_assert_eq!(&la.edges, &lb.edges);
        }
    }

    #[test]
    fn pair_forces_cancel_exactly(a in point(), b in point(), temperature in 0.01f32..1.0) {
        let params = ForceParams::default();
        if let (Some(ab), Some(ba)) = (
            repulsion(a, b, &params, temperature),
            repulsion(b, a, &params, temperature),
        ) {
            prop_assert_eq!(ab + ba, Vec2::ZERO);
        }
        if let (Some(ab), Some(ba)) = (attraction(a, b, &params), attraction(b, a, &params)) {
            prop_assert_eq!(ab + ba, Vec2::ZERO);
        }
    }

    #[test]
    fn repulsion_never_pulls_together(a in point(), b in point(), temperature in 0.01f32..1.0) {
        let params = ForceParams::default();
        if let Some(f) = repulsion(a, b, &params, temperature) {
            prop_assert!(f.dot(a - b) >= 0.0);
            prop_assert!(f.is_finite());
        }
    }
}
