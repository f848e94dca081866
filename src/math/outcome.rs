//! Voter-consensus outcome computation.
//!
//! Given the old reputation vector and the voter x decision vote matrix of
//! one closed voting period, derive the period's truth: new reputation,
//! participation and NA accounting, finalised decision values, and the
//! reward vectors for voters and decision authors.
//!
//! Reputation is re-ranked along the first principal component of the
//! reputation-weighted vote matrix: voters who moved with the consensus
//! axis keep their weight, voters who moved against it lose weight. Both
//! polarities of the component are scored against a compliance vector
//! (distance from the consensus outcome, weighted by the normalised inverse
//! loadings) and the nearer one wins, so the re-ranking cannot be flipped
//! by the sign indeterminacy of the decomposition.
//!
//! Everything here is f64; callers publish through [`fixed`] half-up.

use ndarray::{Array1, Array2};
use thiserror::Error;

use crate::{math::fixed, store::CancelToken};

/// Absolute slack when testing whether a filled vote agrees with the final
/// outcome (certainty accounting).
const CERTAINTY_EPSILON: f64 = 1e-5;

/// Convergence threshold and iteration budget for the dominant-eigenvector
/// power iteration.
const POWER_TOLERANCE: f64 = 1e-12;
const POWER_ITERATIONS_PER_DIM: usize = 100;

#[derive(Clone, Debug, Error)]
pub enum OutcomeError {
    #[error("empty vote matrix")]
    EmptyMatrix,
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },
    #[error("computation produced a non-finite value")]
    NonFinite,
    #[error("operation cancelled")]
    Cancelled,
}

/// Inputs for one voting period. NA cells carry the `na` sentinel value;
/// `old_rep` is expected to sum to one.
#[derive(Clone, Debug)]
pub struct VoteInput {
    /// Voters x decisions.
    pub matrix: Array2<f64>,
    pub old_rep: Array1<f64>,
    /// Per decision: `true` for binary, `false` for scaled.
    pub is_binary: Vec<bool>,
    pub na: f64,
    pub alpha: f64,
    pub tol: f64,
}

/// Every derived vector of one outcome computation. Row vectors have one
/// entry per voter, column vectors one per decision.
#[derive(Clone, Debug, PartialEq)]
pub struct VoteOutput {
    pub this_rep: Array1<f64>,
    pub smoothed_rep: Array1<f64>,
    pub na_row: Array1<f64>,
    pub partic_row: Array1<f64>,
    pub partic_rel: Array1<f64>,
    pub row_bonus: Array1<f64>,
    pub first_loading: Array1<f64>,
    pub decisions_raw: Array1<f64>,
    pub decisions_final: Array1<f64>,
    pub certainty: Array1<f64>,
    pub consensus_reward: Array1<f64>,
    pub na_col: Array1<f64>,
    pub partic_col: Array1<f64>,
    pub author_bonus: Array1<f64>,
}

impl VoteOutput {
    /// Publish a vector as 1e-8 fixed point, half-up.
    pub fn to_fixed(
        vector: &Array1<f64>,
    ) -> Result<Vec<u64>, fixed::FixedPointError> {
        fixed::to_fixed_vec(vector.as_slice().unwrap_or(&[]))
    }
}

/// Run the full consensus computation for one period.
pub fn process(
    input: &VoteInput,
    cancel: &CancelToken,
) -> Result<VoteOutput, OutcomeError> {
    let (n_voters, n_decisions) = input.matrix.dim();
    if n_voters == 0 || n_decisions == 0 {
        return Err(OutcomeError::EmptyMatrix);
    }
    if input.old_rep.len() != n_voters {
        return Err(OutcomeError::DimensionMismatch {
            expected: format!("{n_voters} reputation entries"),
            actual: format!("{}", input.old_rep.len()),
        });
    }
    if input.is_binary.len() != n_decisions {
        return Err(OutcomeError::DimensionMismatch {
            expected: format!("{n_decisions} decision kinds"),
            actual: format!("{}", input.is_binary.len()),
        });
    }
    if !(0.0..=1.0).contains(&input.alpha) {
        return Err(OutcomeError::InvalidParameter {
            reason: format!("alpha {} outside [0, 1]", input.alpha),
        });
    }
    if input.tol < 0.0 || input.tol >= 1.0 {
        return Err(OutcomeError::InvalidParameter {
            reason: format!("tol {} outside [0, 1)", input.tol),
        });
    }

    let matrix = &input.matrix;
    let old_rep = &input.old_rep;
    let na = input.na;

    // Filled matrix: NA cells replaced per column with the preliminary
    // outcome under old reputation (mean for binary, median for scaled).
    let mut filled = matrix.clone();
    for d in 0..n_decisions {
        if cancel.is_cancelled() {
            return Err(OutcomeError::Cancelled);
        }
        let prelim = if input.is_binary[d] {
            weighted_column_mean(old_rep, matrix, d, na)
        } else {
            weighted_column_median(old_rep, matrix, d, na)
        };
        for v in 0..n_voters {
            if filled[[v, d]] == na {
                filled[[v, d]] = prelim;
            }
        }
    }

    let (first_loading, scores) =
        weighted_prin_comp(old_rep, &filled, cancel)?;

    // Consensus target per decision under old reputation, used to measure
    // each voter's distance from the mainstream.
    let mut targets = Array1::zeros(n_decisions);
    for d in 0..n_decisions {
        targets[d] = if input.is_binary[d] {
            let mean: f64 = (0..n_voters)
                .map(|v| old_rep[v] * filled[[v, d]])
                .sum();
            if mean < 0.5 {
                0.0
            } else if mean > 0.5 {
                1.0
            } else {
                0.5
            }
        } else {
            weighted_column_median(old_rep, &filled, d, na)
        };
    }

    let sum_abs_scores: f64 = scores.iter().map(|s| s.abs()).sum();
    let this_rep = if sum_abs_scores == 0.0 {
        // Perfect consensus: nothing to re-rank.
        old_rep.clone()
    } else {
        rerank_reputation(
            old_rep,
            &filled,
            &scores,
            &first_loading,
            &targets,
        )
    };

    let smoothed_rep: Array1<f64> = (0..n_voters)
        .map(|v| {
            (1.0 - input.alpha) * old_rep[v] + input.alpha * this_rep[v]
        })
        .collect();

    // Raw and final outcomes under the smoothed reputation.
    let mut decisions_raw = Array1::zeros(n_decisions);
    for d in 0..n_decisions {
        decisions_raw[d] = if input.is_binary[d] {
            weighted_column_mean(&smoothed_rep, &filled, d, na)
        } else {
            weighted_column_median(&smoothed_rep, &filled, d, na)
        };
    }
    let mut decisions_final = Array1::zeros(n_decisions);
    for d in 0..n_decisions {
        decisions_final[d] = if input.is_binary[d] {
            if decisions_raw[d] > 0.5 + 0.5 * input.tol {
                1.0
            } else if decisions_raw[d] < 0.5 - 0.5 * input.tol {
                0.0
            } else {
                // Too close to call: the undecided sentinel.
                0.5
            }
        } else {
            decisions_raw[d]
        };
    }

    // Participation accounting against the unfilled matrix.
    let mut na_row = Array1::zeros(n_voters);
    let mut partic_row = Array1::zeros(n_voters);
    for v in 0..n_voters {
        let missing =
            (0..n_decisions).filter(|&d| matrix[[v, d]] == na).count();
        na_row[v] = missing as f64;
        partic_row[v] = 1.0 - missing as f64 / n_decisions as f64;
    }
    let mut na_col = Array1::zeros(n_decisions);
    let mut partic_col = Array1::zeros(n_decisions);
    for d in 0..n_decisions {
        let mut missing = 0usize;
        let mut absent_weight = 0.0;
        for v in 0..n_voters {
            if matrix[[v, d]] == na {
                missing += 1;
                absent_weight += smoothed_rep[v];
            }
        }
        na_col[d] = missing as f64;
        partic_col[d] = 1.0 - absent_weight;
    }
    let frac_na = 1.0 - partic_col.sum() / n_decisions as f64;

    let mut partic_rel = partic_row.clone();
    normalize_abs(&mut partic_rel);
    let row_bonus: Array1<f64> = (0..n_voters)
        .map(|v| {
            frac_na * partic_rel[v] + (1.0 - frac_na) * smoothed_rep[v]
        })
        .collect();

    // A voter is certain on a decision if their (filled) vote landed on the
    // final value; certainty is the smoothed reputation mass that did.
    let mut certainty = Array1::zeros(n_decisions);
    for d in 0..n_decisions {
        let mut agreeing = 0.0;
        for v in 0..n_voters {
            if (filled[[v, d]] - decisions_final[d]).abs()
                < CERTAINTY_EPSILON
            {
                agreeing += smoothed_rep[v];
            }
        }
        certainty[d] = agreeing;
    }
    let mut consensus_reward = certainty.clone();
    normalize_abs(&mut consensus_reward);
    let mut partic_col_rel = partic_col.clone();
    normalize_abs(&mut partic_col_rel);
    let author_bonus: Array1<f64> = (0..n_decisions)
        .map(|d| {
            frac_na * partic_col_rel[d]
                + (1.0 - frac_na) * consensus_reward[d]
        })
        .collect();

    let output = VoteOutput {
        this_rep,
        smoothed_rep,
        na_row,
        partic_row,
        partic_rel,
        row_bonus,
        first_loading,
        decisions_raw,
        decisions_final,
        certainty,
        consensus_reward,
        na_col,
        partic_col,
        author_bonus,
    };
    for vector in [
        &output.this_rep,
        &output.smoothed_rep,
        &output.row_bonus,
        &output.first_loading,
        &output.decisions_raw,
        &output.decisions_final,
        &output.consensus_reward,
        &output.author_bonus,
    ] {
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(OutcomeError::NonFinite);
        }
    }
    Ok(output)
}

/// Re-rank reputation along the principal component. Both polarities of the
/// score vector are shifted to non-negative, their above-median excess is
/// halved, and the polarity whose normalised form lies nearest the
/// compliance vector wins.
fn rerank_reputation(
    old_rep: &Array1<f64>,
    filled: &Array2<f64>,
    scores: &Array1<f64>,
    first_loading: &Array1<f64>,
    targets: &Array1<f64>,
) -> Array1<f64> {
    let n_voters = scores.len();
    let n_decisions = first_loading.len();

    let min_score =
        scores.iter().copied().fold(f64::INFINITY, f64::min);
    let shift = min_score.abs();
    let mut scores_pos: Array1<f64> = scores.mapv(|s| s + shift);
    let max_score =
        scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut scores_neg: Array1<f64> = scores.mapv(|s| max_score - s);

    for oriented in [&mut scores_pos, &mut scores_neg] {
        let median = weighted_median(
            oriented.iter().copied().zip(old_rep.iter().copied()),
        );
        if median > 0.0 {
            for value in oriented.iter_mut() {
                if *value > median {
                    *value -= (*value - median) * 0.5;
                }
            }
        }
    }

    // Distance of each voter from the consensus targets, weighted by the
    // normalised inverse loadings: disagreeing on a low-loading (widely
    // agreed) decision counts for more.
    let mut mainstream = Array1::zeros(n_decisions);
    for d in 0..n_decisions {
        mainstream[d] = if first_loading[d] == 0.0 {
            0.0
        } else {
            1.0 / first_loading[d].abs()
        };
    }
    normalize_abs(&mut mainstream);
    let mut noncompliance = Array1::zeros(n_voters);
    for v in 0..n_voters {
        noncompliance[v] = (0..n_decisions)
            .map(|d| (filled[[v, d]] - targets[d]).abs() * mainstream[d])
            .sum();
    }
    let max_noncompliance = noncompliance
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let mut compliance =
        noncompliance.mapv(|x| max_noncompliance - x);
    normalize_abs(&mut compliance);

    let mut candidate_pos = scores_pos.clone();
    normalize_abs(&mut candidate_pos);
    let mut candidate_neg = scores_neg.clone();
    normalize_abs(&mut candidate_neg);
    let distance = |candidate: &Array1<f64>| -> f64 {
        candidate
            .iter()
            .zip(compliance.iter())
            .map(|(c, r)| (c - r) * (c - r))
            .sum()
    };

    let mut this_rep = if distance(&candidate_pos)
        <= distance(&candidate_neg)
    {
        scores_pos
    } else {
        scores_neg
    };
    normalize_abs(&mut this_rep);
    this_rep
}

/// First principal component of the reputation-weighted, column-centred
/// matrix: loadings (unit norm, one per decision) and per-voter scores.
/// Orientation is fixed so the scores project non-negatively onto old
/// reputation.
fn weighted_prin_comp(
    weights: &Array1<f64>,
    matrix: &Array2<f64>,
    cancel: &CancelToken,
) -> Result<(Array1<f64>, Array1<f64>), OutcomeError> {
    let (n_voters, n_decisions) = matrix.dim();

    // Centre each column on its reputation-weighted average.
    let mut centred = matrix.clone();
    for d in 0..n_decisions {
        let avg: f64 =
            (0..n_voters).map(|v| weights[v] * matrix[[v, d]]).sum();
        for v in 0..n_voters {
            centred[[v, d]] -= avg;
        }
    }

    // Weighted covariance. The unbiasing factor 1/(1 - sum w^2) is a
    // positive scalar and cannot change the dominant eigenvector, so a
    // degenerate weight vector just drops it.
    let weight_sq: f64 = weights.iter().map(|w| w * w).sum();
    let denom = 1.0 - weight_sq;
    let factor = if denom > 1e-12 { 1.0 / denom } else { 1.0 };
    let mut covariance = Array2::zeros((n_decisions, n_decisions));
    for i in 0..n_decisions {
        if cancel.is_cancelled() {
            return Err(OutcomeError::Cancelled);
        }
        for j in 0..=i {
            let sum: f64 = (0..n_voters)
                .map(|v| weights[v] * centred[[v, i]] * centred[[v, j]])
                .sum();
            covariance[[i, j]] = factor * sum;
            covariance[[j, i]] = factor * sum;
        }
    }

    // Dominant eigenvector by power iteration; the covariance matrix is
    // symmetric positive semi-definite.
    let mut loading = Array1::from_elem(
        n_decisions,
        1.0 / (n_decisions as f64).sqrt(),
    );
    for _ in 0..POWER_ITERATIONS_PER_DIM * n_decisions {
        if cancel.is_cancelled() {
            return Err(OutcomeError::Cancelled);
        }
        let next = covariance.dot(&loading);
        let norm = next.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm == 0.0 {
            // Zero covariance: every voter sits on the column averages.
            break;
        }
        let next = next.mapv(|x| x / norm);
        let delta: f64 = next
            .iter()
            .zip(loading.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        loading = next;
        if delta < POWER_TOLERANCE {
            break;
        }
    }

    let mut scores = centred.dot(&loading);
    if scores.dot(weights) < 0.0 {
        loading.mapv_inplace(|x| -x);
        scores.mapv_inplace(|x| -x);
    }
    if loading.iter().any(|x| !x.is_finite())
        || scores.iter().any(|x| !x.is_finite())
    {
        return Err(OutcomeError::NonFinite);
    }
    Ok((loading, scores))
}

/// Reputation-weighted mean of one column, skipping NA cells and
/// non-positive weights.
fn weighted_column_mean(
    weights: &Array1<f64>,
    matrix: &Array2<f64>,
    col: usize,
    na: f64,
) -> f64 {
    let mut sum = 0.0;
    let mut total = 0.0;
    for v in 0..matrix.nrows() {
        let weight = weights[v];
        if weight <= 0.0 || matrix[[v, col]] == na {
            continue;
        }
        sum += weight * matrix[[v, col]];
        total += weight;
    }
    if total > 0.0 { sum / total } else { 0.0 }
}

/// Reputation-weighted median of one column, skipping NA cells.
fn weighted_column_median(
    weights: &Array1<f64>,
    matrix: &Array2<f64>,
    col: usize,
    na: f64,
) -> f64 {
    weighted_median(
        (0..matrix.nrows())
            .filter(|&v| matrix[[v, col]] != na)
            .map(|v| (matrix[[v, col]], weights[v])),
    )
}

/// Weighted median: walk the values in increasing order until half the
/// weight is passed; an exact half-split averages the straddling values.
fn weighted_median(pairs: impl Iterator<Item = (f64, f64)>) -> f64 {
    let mut pairs: Vec<(f64, f64)> = pairs.collect();
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let half: f64 = pairs.iter().map(|(_, w)| w).sum::<f64>() / 2.0;
    let mut median = pairs[0].0;
    let mut sum = pairs[0].1;
    let mut i = 1;
    while i < pairs.len() && sum < half {
        median = pairs[i].0;
        sum += pairs[i].1;
        i += 1;
    }
    if i < pairs.len() && (sum - half).abs() < 1e-8 {
        median = 0.5 * (median + pairs[i].0);
    }
    median
}

/// Entries become `|x| / sum |x|`; an all-zero vector is left untouched.
fn normalize_abs(vector: &mut Array1<f64>) {
    vector.mapv_inplace(f64::abs);
    let sum = vector.sum();
    if sum > 0.0 {
        vector.mapv_inplace(|x| x / sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn run(input: &VoteInput) -> VoteOutput {
        process(input, &CancelToken::new()).unwrap()
    }

    fn binary_input(
        matrix: Array2<f64>,
        old_rep: Array1<f64>,
        alpha: f64,
        tol: f64,
    ) -> VoteInput {
        let n_decisions = matrix.ncols();
        VoteInput {
            matrix,
            old_rep,
            is_binary: vec![true; n_decisions],
            na: -1.0,
            alpha,
            tol,
        }
    }

    #[test]
    fn unanimous_voters_keep_their_reputation() {
        let input = binary_input(
            array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]],
            array![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
            0.1,
            0.02,
        );
        let output = run(&input);
        assert_eq!(output.decisions_final, array![1.0, 1.0]);
        assert_eq!(output.this_rep, input.old_rep);
        for (got, want) in
            output.smoothed_rep.iter().zip(input.old_rep.iter())
        {
            assert!((got - want).abs() < 1e-15);
        }
        for d in 0..2 {
            assert!((output.certainty[d] - 1.0).abs() < 1e-12);
            assert!((output.consensus_reward[d] - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn lone_dissenter_loses_reputation() {
        let input = binary_input(
            array![[1.0], [1.0], [0.0]],
            array![0.5, 0.25, 0.25],
            0.1,
            0.02,
        );
        let output = run(&input);

        // The two agreeing voters split this-period reputation.
        assert!((output.this_rep[0] - 0.5).abs() < 1e-12);
        assert!((output.this_rep[1] - 0.5).abs() < 1e-12);
        assert!(output.this_rep[2].abs() < 1e-12);
        assert!(output.this_rep[2] < 1.0 / 3.0);

        let expected_smoothed = [0.5, 0.275, 0.225];
        for (got, want) in
            output.smoothed_rep.iter().zip(expected_smoothed)
        {
            assert!((got - want).abs() < 1e-12);
        }

        let expected_raw = 0.5 + 0.275;
        assert!((output.decisions_raw[0] - expected_raw).abs() < 1e-9);
        assert_eq!(output.decisions_final[0], 1.0);

        // No abstentions, so the row bonus is the smoothed reputation and
        // the dissenter trails both peers.
        assert!(output.row_bonus[2] < output.row_bonus[1]);
        assert!(output.row_bonus[2] < output.row_bonus[0]);

        // Certainty counts only the agreeing reputation mass.
        assert!((output.certainty[0] - 0.775).abs() < 1e-9);
    }

    #[test]
    fn scaled_decision_resolves_to_weighted_median() {
        let input = VoteInput {
            matrix: array![[0.4], [0.5], [0.9]],
            old_rep: array![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
            is_binary: vec![false],
            na: -1.0,
            alpha: 0.2,
            tol: 0.02,
        };
        let output = run(&input);
        assert!((output.decisions_raw[0] - 0.5).abs() < 1e-12);
        assert_eq!(output.decisions_final[0], output.decisions_raw[0]);
        // The outlier at 0.9 ends the period with the least reputation.
        assert!(output.smoothed_rep[2] < output.smoothed_rep[0]);
        assert!(output.smoothed_rep[2] < output.smoothed_rep[1]);
    }

    #[test]
    fn na_cells_are_imputed_and_counted() {
        let na = -1.0;
        let input = binary_input(
            array![[1.0, na], [1.0, 1.0], [0.0, 1.0]],
            array![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
            0.1,
            0.02,
        );
        let output = run(&input);
        assert_eq!(output.na_row, array![1.0, 0.0, 0.0]);
        assert_eq!(output.na_col, array![0.0, 1.0]);
        assert_eq!(output.partic_row, array![0.5, 1.0, 1.0]);
        // The absent voter's smoothed reputation is missing from the
        // decision's participation.
        let expected =
            1.0 - output.smoothed_rep[0];
        assert!((output.partic_col[1] - expected).abs() < 1e-12);
        assert!(output.partic_col[1] < 1.0);
        // Abstention feeds the participation mix into both bonuses.
        assert!(output.row_bonus[0] < output.row_bonus[1]);
    }

    #[test]
    fn reputation_is_conserved() {
        let input = binary_input(
            array![
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 0.0]
            ],
            array![0.4, 0.3, 0.2, 0.1],
            0.3,
            0.02,
        );
        let output = run(&input);
        let total: f64 = output.smoothed_rep.sum();
        assert!((total - 1.0).abs() < 1e-9);
        let this_total: f64 = output.this_rep.sum();
        assert!((this_total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn first_loading_has_unit_norm() {
        let input = binary_input(
            array![[1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [1.0, 0.0]],
            array![0.25, 0.25, 0.25, 0.25],
            0.1,
            0.02,
        );
        let output = run(&input);
        let norm_sq: f64 =
            output.first_loading.iter().map(|x| x * x).sum();
        assert!((norm_sq - 1.0).abs() < 1e-9);
    }

    #[test]
    fn undecided_binary_lands_on_half() {
        // Two equal camps: raw sits at 0.5, inside the tolerance band.
        let input = binary_input(
            array![[1.0], [0.0]],
            array![0.5, 0.5],
            0.0,
            0.1,
        );
        let output = run(&input);
        assert!((output.decisions_raw[0] - 0.5).abs() < 1e-12);
        assert_eq!(output.decisions_final[0], 0.5);
    }

    #[test]
    fn deterministic_across_runs() {
        let input = binary_input(
            array![
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 0.0]
            ],
            array![0.4, 0.3, 0.2, 0.1],
            0.2,
            0.02,
        );
        let first = run(&input);
        let second = run(&input);
        for (a, b) in [
            (&first.this_rep, &second.this_rep),
            (&first.smoothed_rep, &second.smoothed_rep),
            (&first.row_bonus, &second.row_bonus),
            (&first.first_loading, &second.first_loading),
            (&first.decisions_raw, &second.decisions_raw),
            (&first.decisions_final, &second.decisions_final),
            (&first.author_bonus, &second.author_bonus),
        ] {
            for (x, y) in a.iter().zip(b.iter()) {
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
    }

    #[test]
    fn cancellation_is_surfaced() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let input = binary_input(
            array![[1.0], [0.0]],
            array![0.5, 0.5],
            0.1,
            0.02,
        );
        assert!(matches!(
            process(&input, &cancel),
            Err(OutcomeError::Cancelled)
        ));
    }

    #[test]
    fn dimension_mismatches_are_rejected() {
        let input = VoteInput {
            matrix: array![[1.0], [0.0]],
            old_rep: array![1.0],
            is_binary: vec![true],
            na: -1.0,
            alpha: 0.1,
            tol: 0.02,
        };
        assert!(matches!(
            process(&input, &CancelToken::new()),
            Err(OutcomeError::DimensionMismatch { .. })
        ));
    }
}
