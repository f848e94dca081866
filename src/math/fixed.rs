//! Fixed-point (1e-8) conversion with explicit rounding.
//!
//! Monetary fields and every published outcome vector are 64-bit integers
//! in units of 1e-8 of one coin. The engines compute in IEEE-754 doubles
//! and convert at the boundary; the conversion must be deterministic across
//! platforms, so the rounding mode is always spelled out and ties never
//! fall back to round-half-to-even.

use thiserror::Error;

/// 1 coin in fixed-point units.
pub const COIN_F64: f64 = 100_000_000.0;

#[derive(Clone, Debug, Error)]
pub enum FixedPointError {
    #[error("non-finite value: {0}")]
    NonFinite(f64),
    #[error("negative value not allowed: {0}")]
    Negative(f64),
    #[error("value exceeds fixed-point range: {0}")]
    Overflow(f64),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Rounding {
    /// Round up (ceil): costs charged to a user.
    Up,
    /// Round down (floor): payouts to a user.
    Down,
    /// Round half-up: published consensus vectors.
    HalfUp,
}

/// Convert a coin-denominated double to 1e-8 fixed point.
pub fn to_fixed(value: f64, mode: Rounding) -> Result<u64, FixedPointError> {
    if !value.is_finite() {
        return Err(FixedPointError::NonFinite(value));
    }
    if value < 0.0 {
        return Err(FixedPointError::Negative(value));
    }
    let scaled = value * COIN_F64;
    let rounded = match mode {
        Rounding::Up => scaled.ceil(),
        Rounding::Down => scaled.floor(),
        Rounding::HalfUp => (scaled + 0.5).floor(),
    };
    if rounded > u64::MAX as f64 {
        return Err(FixedPointError::Overflow(value));
    }
    Ok(rounded as u64)
}

/// Convert a coin-denominated double to signed 1e-8 fixed point, for
/// quantities that may legitimately be negative (reputation deltas).
/// Rounding acts on the magnitude, so positive and negative values of the
/// same size land symmetrically.
pub fn to_fixed_signed(
    value: f64,
    mode: Rounding,
) -> Result<i64, FixedPointError> {
    if !value.is_finite() {
        return Err(FixedPointError::NonFinite(value));
    }
    let scaled = value * COIN_F64;
    let magnitude = match mode {
        Rounding::Up => scaled.abs().ceil(),
        Rounding::Down => scaled.abs().floor(),
        Rounding::HalfUp => (scaled.abs() + 0.5).floor(),
    };
    if magnitude > i64::MAX as f64 {
        return Err(FixedPointError::Overflow(value));
    }
    let magnitude = magnitude as i64;
    Ok(if scaled < 0.0 { -magnitude } else { magnitude })
}

/// Fixed point back to a coin-denominated double.
pub fn to_coin(value: u64) -> f64 {
    value as f64 / COIN_F64
}

/// Convert a whole slice half-up; used when publishing outcome vectors.
pub fn to_fixed_vec(values: &[f64]) -> Result<Vec<u64>, FixedPointError> {
    values
        .iter()
        .map(|&v| to_fixed(v, Rounding::HalfUp))
        .collect()
}
