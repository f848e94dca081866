//! Tau-aligned ballot window arithmetic.
//!
//! A branch partitions decisions into voting periods by their
//! `event_over_by` height: period `n` covers `((n-1)*tau, n*tau]`, its
//! ballot becomes available at `n*tau`, and sealed/reveal submissions
//! follow for `ballot_time` and `unseal_time` blocks.

/// The `(minblock, maxblock)` window containing `height`.
pub fn window(tau: u16, height: u32) -> (u32, u32) {
    let tau = tau as u32;
    let minblock = tau * (height.saturating_sub(1) / tau) + 1;
    (minblock, minblock + tau - 1)
}

/// Whether `height` is a valid voting-period height for a branch: a
/// positive multiple of tau.
pub fn is_vote_height(tau: u16, height: u32) -> bool {
    height > 0 && height % tau as u32 == 0
}
