//! Property tests for score tables, severity adjustment and cut sets

use autosafe_engine::assurance::adjust_for_severity;
use autosafe_engine::fta::CutSet;
use autosafe_engine::graph::{FaultType, InputKind};
use autosafe_engine::scores::{
    and_aggregate, base_from_confidence_robustness, discretize, or_aggregate,
};
use autosafe_engine::{cut_sets, evaluate_levels, GateType, NodeGraph, NodeKind};
use proptest::prelude::*;

fn level() -> impl Strategy<Value = u8> {
    1u8..=5
}

fn gate_type() -> impl Strategy<Value = GateType> {
    prop_oneof![Just(GateType::And), Just(GateType::Or)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_base_table_in_range_and_monotonic(cl in level(), rs in level()) {
        let base = base_from_confidence_robustness(cl, rs).unwrap();
        prop_assert!((1..=5).contains(&base));
        if cl < 5 {
            prop_assert!(base_from_confidence_robustness(cl + 1, rs).unwrap() <= base);
        }
        if rs < 5 {
            prop_assert!(base_from_confidence_robustness(cl, rs + 1).unwrap() <= base);
        }
    }

    #[test]
    fn prop_discretize_idempotent(x in -10.0f64..15.0) {
        let once = discretize(x);
        prop_assert!((1..=5).contains(&once));
        prop_assert_eq!(discretize(f64::from(once)), once);
    }

    #[test]
    fn prop_and_table_symmetric(a in level(), b in level()) {
        prop_assert_eq!(and_aggregate(a, b).unwrap(), and_aggregate(b, a).unwrap());
    }

    #[test]
    fn prop_or_is_exact_mean(a in 1.0f64..=5.0, b in 1.0f64..=5.0) {
        prop_assert_eq!(or_aggregate(a, b).unwrap(), (a + b) / 2.0);
        prop_assert_eq!(or_aggregate(a, b).unwrap(), or_aggregate(b, a).unwrap());
    }

    #[test]
    fn prop_severity_adjustment_in_range(
        aggregated in 1.0f64..=5.0,
        own in 1u8..=3,
        parent in proptest::option::of(1u8..=3),
        vehicle_level: bool,
    ) {
        let level = adjust_for_severity(aggregated, own, parent, vehicle_level);
        prop_assert!((1.0..=5.0).contains(&level));
    }

    #[test]
    fn prop_cut_sets_cover_only_leaves(
        gates in proptest::collection::vec(gate_type(), 1..4),
        leaves in 1usize..5,
    ) {
        let mut graph = NodeGraph::new();
        let leaf_ids: Vec<_> = (0..leaves)
            .map(|_| graph.create(NodeKind::basic_event(1.0, 0.0, FaultType::Permanent)).unwrap())
            .collect();
        let mut below = leaf_ids.clone();
        let mut root = leaf_ids[0];
        for gate in gates {
            root = graph.create(NodeKind::gate(gate)).unwrap();
            for &child in &below {
                graph.attach_child(root, child).unwrap();
            }
            below = vec![root];
        }

        let family = cut_sets(&graph, root).unwrap();
        prop_assert!(!family.is_empty());
        let all: CutSet = leaf_ids.iter().copied().collect();
        for set in &family {
            prop_assert!(!set.is_empty());
            prop_assert!(set.is_subset(&all));
        }
    }

    #[test]
    fn prop_levels_stay_in_range(
        values in proptest::collection::vec(1.0f64..=5.0, 1..6),
        gate in gate_type(),
        severity in 1u8..=3,
    ) {
        let mut graph = NodeGraph::new();
        let top = graph.create(NodeKind::top_event(severity)).unwrap();
        graph.set_gate_type(top, gate).unwrap();
        for value in values {
            let leaf = graph.create(NodeKind::leaf_input(value, InputKind::Confidence)).unwrap();
            graph.attach_child(top, leaf).unwrap();
        }

        let first = evaluate_levels(&mut graph).unwrap();
        let second = evaluate_levels(&mut graph).unwrap();
        let level = first.get(top).unwrap().level;
        prop_assert!((1.0..=5.0).contains(&level));
        prop_assert_eq!(level.to_bits(), second.get(top).unwrap().level.to_bits());
    }
}
