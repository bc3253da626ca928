// 3.0: valuation engine. turns an item's condition plus marketplace signals into a point price.
// pure math: callers gather the signals and the optional oracle suggestion, this module never
// touches storage or the network.
//
// final = base × condition_multiplier × (1 + demand_bonus×demand + rarity_bonus×rarity)

use crate::types::{Condition, Points};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// One value per condition category, with a row for unrecognised labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionTable<T> {
    pub excellent: T,
    pub good: T,
    pub fair: T,
    pub poor: T,
    pub unrated: T,
}

impl<T: Copy> ConditionTable<T> {
    pub fn get(&self, condition: Condition) -> T {
        match condition {
            Condition::Excellent => self.excellent,
            Condition::Good => self.good,
            Condition::Fair => self.fair,
            Condition::Poor => self.poor,
            Condition::Unrated => self.unrated,
        }
    }
}

/// 3.1: tunable weights for the valuation formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationParams {
    pub condition_multipliers: ConditionTable<Decimal>,
    pub base_points: ConditionTable<i64>,
    pub wishlist_weight: Decimal,
    pub active_request_weight: Decimal,
    pub completed_weight: Decimal,
    // raw demand at which demand_score saturates at 1
    pub demand_cap: Decimal,
    pub demand_bonus: Decimal,
    pub rarity_bonus: Decimal,
    // oracle suggestions are clamped into [min, max] before use
    pub oracle_min_points: i64,
    pub oracle_max_points: i64,
}

impl Default for ValuationParams {
    fn default() -> Self {
        Self {
            condition_multipliers: ConditionTable {
                excellent: dec!(1.0),
                good: dec!(0.8),
                fair: dec!(0.6),
                poor: dec!(0.4),
                unrated: dec!(0.6),
            },
            base_points: ConditionTable {
                excellent: 15,
                good: 12,
                fair: 8,
                poor: 5,
                unrated: 10,
            },
            wishlist_weight: dec!(0.5),
            active_request_weight: dec!(2.0),
            completed_weight: dec!(0.2),
            demand_cap: dec!(20),
            demand_bonus: dec!(0.5),
            rarity_bonus: dec!(0.5),
            oracle_min_points: 5,
            oracle_max_points: 50,
        }
    }
}

/// Marketplace signals for one item, read from storage by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DemandSignals {
    pub wishlist_count: u32,
    /// requests on the item currently PENDING or APPROVED
    pub active_requests: u32,
    /// requests on the item that reached COMPLETED (turnover proxy)
    pub completed_exchanges: u32,
    /// available items sharing the same title+author, this one included
    pub copies_available: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseSource {
    ConditionTable,
    Oracle,
}

/// 3.2: a computed price plus the components that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub points: Points,
    pub base_points: Decimal,
    pub base_source: BaseSource,
    pub condition_multiplier: Decimal,
    pub demand_score: Decimal,
    pub rarity_score: Decimal,
}

pub fn condition_multiplier(params: &ValuationParams, condition: Condition) -> Decimal {
    params.condition_multipliers.get(condition)
}

// normalised to [0, 1]
pub fn demand_score(params: &ValuationParams, signals: &DemandSignals) -> Decimal {
    let raw = params.wishlist_weight * Decimal::from(signals.wishlist_count)
        + params.active_request_weight * Decimal::from(signals.active_requests)
        + params.completed_weight * Decimal::from(signals.completed_exchanges);

    if params.demand_cap <= Decimal::ZERO {
        return Decimal::ONE;
    }
    (raw / params.demand_cap).min(Decimal::ONE)
}

// 1 copy = 1.0, 2 copies = 0.5, 3 copies = 0.33...
pub fn rarity_score(copies_available: u32) -> Decimal {
    let copies = Decimal::from(copies_available.max(1));
    Decimal::ONE / (Decimal::ONE + (copies - Decimal::ONE))
}

/// Oracle suggestion clamped into range, or the condition-indexed default.
pub fn base_points(
    params: &ValuationParams,
    condition: Condition,
    oracle_suggestion: Option<i64>,
) -> (Decimal, BaseSource) {
    match oracle_suggestion {
        Some(suggested) => {
            let clamped = suggested.clamp(params.oracle_min_points, params.oracle_max_points);
            (Decimal::from(clamped), BaseSource::Oracle)
        }
        None => (
            Decimal::from(params.base_points.get(condition)),
            BaseSource::ConditionTable,
        ),
    }
}

/// 3.3: the valuation formula. result is always at least one point.
pub fn valuate(
    params: &ValuationParams,
    condition: Condition,
    signals: &DemandSignals,
    oracle_suggestion: Option<i64>,
) -> Valuation {
    let (base, base_source) = base_points(params, condition, oracle_suggestion);
    let multiplier = condition_multiplier(params, condition);
    let demand = demand_score(params, signals);
    let rarity = rarity_score(signals.copies_available);

    let bonus = Decimal::ONE + params.demand_bonus * demand + params.rarity_bonus * rarity;
    let raw = base * multiplier * bonus;

    // half-up: 22.5 prices at 23, never at 22
    let rounded = raw
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(1);

    Valuation {
        points: Points::new(rounded.max(1)),
        base_points: base,
        base_source,
        condition_multiplier: multiplier,
        demand_score: demand,
        rarity_score: rarity,
    }
}
