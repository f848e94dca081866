//! LMSR pricing over a market's combinatorial state space.
//!
//! A market with `k` decisions has `2^k` states, one binary dimension per
//! decision. The share vector is rebuilt from scratch from the trade
//! history on every quote; no mutable pricing state survives between
//! requests. Cost is the logarithmic market scoring rule
//! `C(q) = B * ln(sum exp(q_i / B))`, evaluated in max-shifted form so the
//! exponentials stay finite for any share magnitudes.

use ndarray::{Array1, ArrayView1};
use thiserror::Error;

use crate::{
    math::fixed,
    types::{Market, Trade},
};

const MIN_BETA: f64 = 1e-6;
const MAX_BETA: f64 = 1e12;

/// Largest decision set a single market may span (256 states).
pub const MAX_MARKET_DECISIONS: usize = 8;

/// Slack below the computed per-share price a declared buy price may sit.
pub const PRICE_EPSILON: f64 = 1e-8;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LmsrError {
    #[error("beta {beta} outside valid range [{min}, {max}]")]
    InvalidBeta { beta: f64, min: f64, max: f64 },
    #[error("market has no decisions")]
    NoDecisions,
    #[error("market spans {count} decisions, maximum {max}")]
    TooManyDecisions { count: usize, max: usize },
    #[error("decision state {state} out of range for {n_states} states")]
    StateOutOfRange { state: u32, n_states: u32 },
    #[error("trade must move a positive number of shares")]
    ZeroShares,
    #[error("cost calculation produced a non-finite value")]
    NonFinite,
}

/// Number of states spanned by `n_decisions` binary decisions.
pub fn n_states(n_decisions: usize) -> Result<u32, LmsrError> {
    if n_decisions == 0 {
        return Err(LmsrError::NoDecisions);
    }
    if n_decisions > MAX_MARKET_DECISIONS {
        return Err(LmsrError::TooManyDecisions {
            count: n_decisions,
            max: MAX_MARKET_DECISIONS,
        });
    }
    Ok(1u32 << n_decisions)
}

/// Net shares per state, coin-denominated, from the trade history in index
/// order: each trade adds (buy) or subtracts (sell) its share count in its
/// state. Trades naming an out-of-range state contribute nothing.
pub fn shares_by_state(trades: &[Trade], n_states: u32) -> Array1<f64> {
    let mut shares = Array1::zeros(n_states as usize);
    for trade in trades {
        if trade.decision_state < n_states {
            let delta = trade.n_shares as f64;
            let slot = &mut shares[trade.decision_state as usize];
            if trade.is_buy {
                *slot += delta;
            } else {
                *slot -= delta;
            }
        }
    }
    shares.mapv_into(|sats| sats / fixed::COIN_F64)
}

/// `C(q) = beta * ln(sum exp(q_i / beta))`, max-shifted for stability.
pub fn cost(beta: f64, shares: &ArrayView1<f64>) -> Result<f64, LmsrError> {
    if beta <= MIN_BETA || beta >= MAX_BETA {
        return Err(LmsrError::InvalidBeta {
            beta,
            min: MIN_BETA,
            max: MAX_BETA,
        });
    }
    if shares.is_empty() {
        return Err(LmsrError::NoDecisions);
    }
    let max_share = shares.fold(f64::NEG_INFINITY, |acc, &x| acc.max(x));
    let mut sum_exp = 0.0;
    for &share in shares {
        let term = ((share - max_share) / beta).exp();
        if !term.is_finite() {
            return Err(LmsrError::NonFinite);
        }
        sum_exp += term;
    }
    let value = beta * (sum_exp.ln() + max_share / beta);
    if !value.is_finite() {
        return Err(LmsrError::NonFinite);
    }
    Ok(value)
}

/// Account value of a position under the author's commission ceiling: the
/// chargeable cost is `C(q) - C(0)` clamped to `max_commission` when the
/// ceiling is positive, so
/// `account(q) = C(0) + min(C(q) - C(0), max_commission)`.
/// A zero ceiling leaves the cost uncapped.
pub fn account_value(
    max_commission: f64,
    beta: f64,
    shares: &ArrayView1<f64>,
) -> Result<f64, LmsrError> {
    let value = cost(beta, shares)?;
    if max_commission <= 0.0 {
        return Ok(value);
    }
    let base = cost(beta, &Array1::zeros(shares.len()).view())?;
    Ok(base + (value - base).min(max_commission))
}

/// Capital an author must escrow for a fresh market: the maker's worst-case
/// loss, `beta * ln(n_states)`.
pub fn capital_required(
    beta: f64,
    n_states: u32,
) -> Result<f64, LmsrError> {
    if beta <= MIN_BETA || beta >= MAX_BETA {
        return Err(LmsrError::InvalidBeta {
            beta,
            min: MIN_BETA,
            max: MAX_BETA,
        });
    }
    if n_states == 0 {
        return Err(LmsrError::NoDecisions);
    }
    let value = beta * (n_states as f64).ln();
    if !value.is_finite() {
        return Err(LmsrError::NonFinite);
    }
    Ok(value)
}

/// A priced trade: coin-denominated per-share price and total cost (both
/// positive for buys and for sells).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quote {
    pub price_per_share: f64,
    pub total_cost: f64,
}

impl Quote {
    /// Smallest declared price (1e-8 units) that clears this quote.
    pub fn min_acceptable_price(&self) -> u64 {
        fixed::to_fixed(self.price_per_share, fixed::Rounding::Up)
            .unwrap_or(u64::MAX)
    }
}

/// Price an incremental trade against the market's current share vector.
pub fn quote(
    market: &Market,
    trades: &[Trade],
    is_buy: bool,
    n_shares: u64,
    decision_state: u32,
) -> Result<Quote, LmsrError> {
    if n_shares == 0 {
        return Err(LmsrError::ZeroShares);
    }
    let states = n_states(market.decision_ids.len())?;
    if decision_state >= states {
        return Err(LmsrError::StateOutOfRange {
            state: decision_state,
            n_states: states,
        });
    }

    let beta = fixed::to_coin(market.b);
    let max_commission = fixed::to_coin(market.max_commission);
    let delta = n_shares as f64 / fixed::COIN_F64;

    let mut shares = shares_by_state(trades, states);
    let before = account_value(max_commission, beta, &shares.view())?;
    let slot = &mut shares[decision_state as usize];
    if is_buy {
        *slot += delta;
    } else {
        *slot -= delta;
    }
    let after = account_value(max_commission, beta, &shares.view())?;

    let total_cost = if is_buy {
        after - before
    } else {
        before - after
    };
    let price_per_share = total_cost / delta;
    if !price_per_share.is_finite() {
        return Err(LmsrError::NonFinite);
    }
    Ok(Quote {
        price_per_share,
        total_cost,
    })
}
