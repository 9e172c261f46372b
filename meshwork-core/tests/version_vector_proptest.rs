// Property-based tests for version vector algebra and member ordering

use proptest::prelude::*;

use meshwork_core::cluster::node_state::NodeState;
use meshwork_core::cluster::{CausalOrder, VersionVector};

fn vector_strategy() -> impl Strategy<Value = VersionVector> {
    prop::collection::btree_map("[a-f]", 1u64..50, 0..6).prop_map(|entries| {
        VersionVector::from_entries(entries).expect("generated entries are valid")
    })
}

fn node_strategy() -> impl Strategy<Value = NodeState> {
    ("[a-c]", 1u64..4, 1u64..6, 0i64..5).prop_map(|(id, generation, clock, ts)| {
        let mut state = NodeState::new(id, "test", "127.0.0.1:7000", ts);
        state.generation = generation;
        state.logical_clock = clock;
        state
    })
}

proptest! {
    #[test]
    fn test_merge_is_commutative(a in vector_strategy(), b in vector_strategy()) {
        prop_assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn test_merge_is_associative(
        a in vector_strategy(),
        b in vector_strategy(),
        c in vector_strategy()
    ) {
        prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn test_merge_is_idempotent(a in vector_strategy()) {
        prop_assert_eq!(a.merge(&a), a.clone());
    }

    #[test]
    fn test_merge_dominates_both_inputs(a in vector_strategy(), b in vector_strategy()) {
        let merged = a.merge(&b);
        prop_assert!(merged.dominates_or_equals(&a));
        prop_assert!(merged.dominates_or_equals(&b));
    }
}

proptest! {
    #[test]
    fn test_compare_is_antisymmetric(a in vector_strategy(), b in vector_strategy()) {
        let expected = match a.compare(&b) {
            CausalOrder::Equal => CausalOrder::Equal,
            CausalOrder::Before => CausalOrder::After,
            CausalOrder::After => CausalOrder::Before,
            CausalOrder::Concurrent => CausalOrder::Concurrent,
        };
        prop_assert_eq!(b.compare(&a), expected);
    }

    #[test]
    fn test_increment_moves_strictly_forward(a in vector_strategy(), id in "[a-f]") {
        let next = a.increment(&id).unwrap();
        prop_assert_eq!(a.compare(&next), CausalOrder::Before);
        prop_assert_eq!(next.get(&id), a.get(&id) + 1);
    }

    #[test]
    fn test_prune_with_max_is_bounded_and_deterministic(
        a in vector_strategy(),
        max in 0usize..6
    ) {
        let active: Vec<String> = a.entries().map(|(id, _)| id.to_string()).collect();
        let first = a.prune_with_max(active.iter().map(String::as_str), max);
        let second = a.prune_with_max(active.iter().rev().map(String::as_str), max);
        prop_assert!(first.len() <= max);
        prop_assert_eq!(first, second);
    }
}

proptest! {
    #[test]
    fn test_is_newer_than_never_holds_both_ways(a in node_strategy(), b in node_strategy()) {
        prop_assert!(!(a.is_newer_than(&b) && b.is_newer_than(&a)));
    }

    #[test]
    fn test_supersede_outranks_prior(a in node_strategy(), prior in node_strategy(), now in 0i64..10) {
        let mut next = a.clone();
        next.id = prior.id.clone();
        prop_assert!(next.supersede(&prior, now).is_ok());
        prop_assert!(next.is_newer_than(&prior));
    }
}
