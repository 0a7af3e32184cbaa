//! Depth-aware binary arbitrage math.
//!
//! A buy-both arbitrage exists at size `q` when filling `q` shares of YES
//! and `q` shares of NO greedily from the two ask books costs less than
//! `1 - ARB_EDGE_MIN` per share pair, fees included. The evaluation walks
//! the union of cumulative-depth break-points, which is exact for the
//! piecewise-linear average-cost curve.

use rust_decimal::Decimal;
use serde::Serialize;

use pulse_common::BookLevel;

/// Inputs controlling the evaluation; mirrored from the arb config keys.
#[derive(Debug, Clone)]
pub struct ArbParams {
    pub edge_min: Decimal,
    pub min_executable_shares: Decimal,
    pub max_shares_to_evaluate: Decimal,
    pub taker_fee_bps: u32,
}

/// Result of a depth-aware evaluation.
#[derive(Debug, Clone, Default)]
pub struct ArbEvaluation {
    /// Largest executable size with edge above the floor.
    pub q_max: Option<Decimal>,
    pub edge_at_q_max: Option<Decimal>,
    pub edge_at_min_q: Option<Decimal>,
    pub avg_ask_yes_at_q_max: Option<Decimal>,
    pub avg_ask_no_at_q_max: Option<Decimal>,
}

/// An ask level consumed by a fill, for the signal payload.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumedLevel {
    pub price: String,
    pub size: String,
}

/// Volume-weighted average price to fill `quantity` shares greedily from
/// `levels` (sorted ascending by price). `None` when the depth is
/// insufficient or the quantity is non-positive.
pub fn avg_ask(levels: &[BookLevel], quantity: Decimal) -> Option<Decimal> {
    if quantity <= Decimal::ZERO {
        return None;
    }
    let mut remaining = quantity;
    let mut cost = Decimal::ZERO;
    for level in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        let fill = remaining.min(level.size);
        cost += fill * level.price;
        remaining -= fill;
    }
    if remaining > Decimal::ZERO {
        return None;
    }
    Some(cost / quantity)
}

/// The exact ask levels a greedy fill of `quantity` consumes.
pub fn fill_levels(levels: &[BookLevel], quantity: Decimal) -> Vec<ConsumedLevel> {
    let mut remaining = quantity;
    let mut used = Vec::new();
    for level in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        let fill = remaining.min(level.size);
        used.push(ConsumedLevel {
            price: level.price.to_string(),
            size: fill.to_string(),
        });
        remaining -= fill;
    }
    used
}

/// Cumulative-depth break-points of one side, clamped at `max_shares`.
fn candidate_quantities(levels: &[BookLevel], max_shares: Decimal) -> Vec<Decimal> {
    let mut quantities = Vec::with_capacity(levels.len());
    let mut total = Decimal::ZERO;
    for level in levels {
        total += level.size;
        if total > max_shares {
            total = max_shares;
        }
        quantities.push(total);
        if total >= max_shares {
            break;
        }
    }
    quantities
}

/// Summed average cost of both legs plus the proportional taker fee.
fn total_avg_cost(avg_yes: Decimal, avg_no: Decimal, fee_bps: u32) -> Decimal {
    let base = avg_yes + avg_no;
    base + base * Decimal::from(fee_bps) / Decimal::from(10_000u32)
}

/// Evaluate the buy-both arbitrage over both ask books.
///
/// Candidate sizes are the union of both sides' cumulative-depth
/// break-points plus the configured min/max bounds; the average-cost curve
/// is linear between break-points, so checking only the break-points is
/// exact. `q_max` is the largest candidate in
/// `[min_executable_shares, max_shares_to_evaluate]` whose edge clears the
/// floor.
pub fn compute_arb(
    asks_yes: &[BookLevel],
    asks_no: &[BookLevel],
    params: &ArbParams,
) -> ArbEvaluation {
    let min_q = params.min_executable_shares;
    let max_q = params.max_shares_to_evaluate;

    let mut candidates = candidate_quantities(asks_yes, max_q);
    candidates.extend(candidate_quantities(asks_no, max_q));
    candidates.push(min_q);
    candidates.push(max_q);
    candidates.retain(|q| *q >= min_q);
    candidates.sort();
    candidates.dedup();

    let mut result = ArbEvaluation::default();

    if let (Some(avg_yes), Some(avg_no)) = (avg_ask(asks_yes, min_q), avg_ask(asks_no, min_q)) {
        let total = total_avg_cost(avg_yes, avg_no, params.taker_fee_bps);
        result.edge_at_min_q = Some(Decimal::ONE - total);
    }

    for q in candidates {
        let (avg_yes, avg_no) = match (avg_ask(asks_yes, q), avg_ask(asks_no, q)) {
            (Some(y), Some(n)) => (y, n),
            _ => continue,
        };
        let total = total_avg_cost(avg_yes, avg_no, params.taker_fee_bps);
        let edge = Decimal::ONE - total;
        if edge >= params.edge_min {
            result.q_max = Some(q);
            result.edge_at_q_max = Some(edge);
            result.avg_ask_yes_at_q_max = Some(avg_yes);
            result.avg_ask_no_at_q_max = Some(avg_no);
        }
    }

    result
}

/// Severity banding for an emitted arb signal; staleness above five
/// seconds costs one level. Clamped to [1, 5].
pub fn arb_severity(edge_at_q_max: Decimal, q_max: Decimal, max_book_age_seconds: i64) -> u8 {
    let mut severity: i32 = if edge_at_q_max >= Decimal::new(15, 3) && q_max >= Decimal::from(500) {
        4
    } else if edge_at_q_max >= Decimal::new(10, 3) && q_max >= Decimal::from(100) {
        3
    } else {
        2
    };

    if max_book_age_seconds > 5 {
        severity -= 1;
    }
    severity.clamp(1, 5) as u8
}
