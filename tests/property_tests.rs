//! Property-based tests for the pure core: valuation math and the cycle guard.
//!
//! These tests verify invariants hold under random inputs.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, VecDeque};
use swap_core::valuation::{demand_score, rarity_score, valuate};
use swap_core::*;

// Strategies for generating test data
fn condition_strategy() -> impl Strategy<Value = Condition> {
    prop_oneof![
        Just(Condition::Excellent),
        Just(Condition::Good),
        Just(Condition::Fair),
        Just(Condition::Poor),
        Just(Condition::Unrated),
    ]
}

fn signals_strategy() -> impl Strategy<Value = DemandSignals> {
    (0u32..200, 0u32..3, 0u32..100, 1u32..50).prop_map(|(wishlist, active, completed, copies)| {
        DemandSignals {
            wishlist_count: wishlist,
            active_requests: active,
            completed_exchanges: completed,
            copies_available: copies,
        }
    })
}

// forward-only edges between 8 users: always acyclic
fn dag_strategy() -> impl Strategy<Value = Vec<(UserId, UserId)>> {
    prop::collection::vec((1u64..8, 1u64..8), 0..20).prop_map(|pairs| {
        pairs
            .into_iter()
            .filter(|(a, b)| a < b)
            .map(|(a, b)| (UserId(a), UserId(b)))
            .collect()
    })
}

fn reaches(edges: &[(UserId, UserId)], from: UserId, to: UserId) -> bool {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        if node == to {
            return true;
        }
        if seen.insert(node) {
            queue.extend(edges.iter().filter(|(a, _)| *a == node).map(|(_, b)| *b));
        }
    }
    false
}

proptest! {
    /// Price is always at least one point
    #[test]
    fn valuation_at_least_one(
        condition in condition_strategy(),
        signals in signals_strategy(),
        suggestion in prop::option::of(-100i64..1_000),
    ) {
        let params = ValuationParams::default();
        let v = valuate(&params, condition, &signals, suggestion);
        prop_assert!(v.points.value() >= 1);
    }

    /// Same inputs, same price
    #[test]
    fn valuation_deterministic(
        condition in condition_strategy(),
        signals in signals_strategy(),
    ) {
        let params = ValuationParams::default();
        prop_assert_eq!(
            valuate(&params, condition, &signals, None),
            valuate(&params, condition, &signals, None)
        );
    }

    /// Scores stay inside their ranges
    #[test]
    fn scores_bounded(signals in signals_strategy()) {
        let params = ValuationParams::default();
        let demand = demand_score(&params, &signals);
        let rarity = rarity_score(signals.copies_available);
        prop_assert!(demand >= Decimal::ZERO && demand <= Decimal::ONE);
        prop_assert!(rarity > Decimal::ZERO && rarity <= Decimal::ONE);
    }

    /// More wishlists never lower the price
    #[test]
    fn demand_is_monotone(
        condition in condition_strategy(),
        signals in signals_strategy(),
        extra in 1u32..50,
    ) {
        let params = ValuationParams::default();
        let before = valuate(&params, condition, &signals, None);
        let more = DemandSignals { wishlist_count: signals.wishlist_count + extra, ..signals };
        let after = valuate(&params, condition, &more, None);
        prop_assert!(after.points >= before.points);
    }

    /// More available copies never raise the price
    #[test]
    fn rarity_is_monotone(
        condition in condition_strategy(),
        signals in signals_strategy(),
        extra in 1u32..20,
    ) {
        let params = ValuationParams::default();
        let before = valuate(&params, condition, &signals, None);
        let more = DemandSignals { copies_available: signals.copies_available + extra, ..signals };
        let after = valuate(&params, condition, &more, None);
        prop_assert!(after.points <= before.points);
    }

    /// Oracle suggestions are clamped into the configured range
    #[test]
    fn oracle_base_clamped(
        condition in condition_strategy(),
        suggestion in -1_000i64..10_000,
    ) {
        let params = ValuationParams::default();
        let v = valuate(&params, condition, &DemandSignals { copies_available: 1, ..Default::default() }, Some(suggestion));
        prop_assert_eq!(v.base_source, BaseSource::Oracle);
        prop_assert!(v.base_points >= Decimal::from(params.oracle_min_points));
        prop_assert!(v.base_points <= Decimal::from(params.oracle_max_points));
    }

    /// The guard vetoes exactly the edges whose owner already reaches the requester
    #[test]
    fn guard_matches_reachability(
        edges in dag_strategy(),
        requester in 1u64..8,
        owner in 1u64..8,
    ) {
        let (requester, owner) = (UserId(requester), UserId(owner));
        prop_assume!(requester != owner);
        let graph = ObligationGraph::from_edges(edges.clone());
        prop_assert_eq!(
            graph.would_create_cycle(requester, owner),
            reaches(&edges, owner, requester)
        );
    }

    /// Guard verdict agrees with a full cycle search on the extended graph
    #[test]
    fn guard_matches_cycle_search(
        edges in dag_strategy(),
        requester in 1u64..8,
        owner in 1u64..8,
    ) {
        let (requester, owner) = (UserId(requester), UserId(owner));
        prop_assume!(requester != owner);
        let graph = ObligationGraph::from_edges(edges.clone());
        prop_assert!(graph.find_cycles().is_empty());

        let mut extended = edges;
        extended.push((requester, owner));
        let cyclic = !ObligationGraph::from_edges(extended).find_cycles().is_empty();
        prop_assert_eq!(graph.would_create_cycle(requester, owner), cyclic);
    }
}

#[cfg(test)]
mod edge_cases {
    use super::*;

    #[test]
    fn unknown_condition_label_uses_default_rows() {
        let params = ValuationParams::default();
        let condition = Condition::from_label("like new");
        assert_eq!(condition, Condition::Unrated);
        let v = valuate(&params, condition, &DemandSignals { copies_available: 1, ..Default::default() }, None);
        // 10 × 0.6 × 1.5
        assert_eq!(v.points, Points::new(9));
    }

    #[test]
    fn saturated_demand_caps_at_one() {
        let params = ValuationParams::default();
        let signals = DemandSignals {
            wishlist_count: 1_000,
            active_requests: 1,
            completed_exchanges: 1_000,
            copies_available: 1,
        };
        assert_eq!(demand_score(&params, &signals), Decimal::ONE);
        // 15 × 1.0 × (1 + 0.5 + 0.5)
        assert_eq!(valuate(&params, Condition::Excellent, &signals, None).points, Points::new(30));
    }

    #[test]
    fn long_chain_closes_into_cycle() {
        let edges: Vec<_> = (1..500u64).map(|i| (UserId(i), UserId(i + 1))).collect();
        let graph = ObligationGraph::from_edges(edges);
        assert!(graph.would_create_cycle(UserId(500), UserId(1)));
        assert!(!graph.would_create_cycle(UserId(1), UserId(500)));
    }
}
