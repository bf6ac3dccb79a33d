//! DeepHit ranking losses.
//!
//! For comparable pairs `(i, j)` the penalty is `exp(-R_ij / sigma)` with
//! `R_ij = F_i(T_i) - F_j(T_i)`: sample `i` should have accumulated more event
//! probability at its own event time than any sample still at risk then.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Ix2, Ix3, Zip};
use rayon::prelude::*;

use super::nll::check_competing;
use super::pmf::{cumsum_last_axis, one_hot, pmf_from_logits, pmf_from_logits_cr};
use super::{LossError, LossGradient, LossOutput, Reduction, check_labels, check_sigma};

/// `R_ij = F_i(T_i) - F_j(T_i)` where `F` is the cumulative `pmf` and `T_i` the bin
/// marked in row `i` of the one-hot matrix `y`.
pub fn diff_cdf_at_time_i(
    pmf: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
) -> Result<Array2<f64>, LossError> {
    if pmf.dim() != y.dim() {
        return Err(LossError::ShapeMismatch(format!(
            "pmf is {:?} but y is {:?}",
            pmf.dim(),
            y.dim()
        )));
    }
    let mut cdf = pmf.to_owned();
    cumsum_last_axis(&mut cdf);
    // cdf_at[a, b] = F_a(T_b)
    let cdf_at = cdf.dot(&y.t());
    let own = cdf_at.diag().to_owned();
    Ok(Array2::from_shape_fn(cdf_at.raw_dim(), |(i, j)| {
        own[i] - cdf_at[[j, i]]
    }))
}

/// Comparable-pair indicator: `1` when sample `i` had an event strictly before
/// sample `j`'s time, or at the same bin where `j` was censored.
///
/// Any non-zero event value counts as an event, so competing-risk codes can be
/// passed after a cast.
pub fn pair_rank_mat(
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, f64>,
) -> Result<Array2<f64>, LossError> {
    let n = idx_durations.len();
    if events.len() != n {
        return Err(LossError::ShapeMismatch(format!(
            "idx_durations has {n} entries but events has {}",
            events.len()
        )));
    }
    let mut mat = Array2::<f64>::zeros((n, n));
    mat.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .filter(|(i, _)| events[*i] != 0.0)
        .for_each(|(i, mut row)| {
            let di = idx_durations[i];
            for (j, cell) in row.iter_mut().enumerate() {
                let dj = idx_durations[j];
                if di < dj || (di == dj && events[j] == 0.0) {
                    *cell = 1.0;
                }
            }
        });
    Ok(mat)
}

fn check_rank_mat(rank_mat: ArrayView2<'_, f64>, batch: usize) -> Result<(), LossError> {
    if rank_mat.dim() != (batch, batch) {
        return Err(LossError::ShapeMismatch(format!(
            "rank_mat must be {batch}x{batch}, got {:?}",
            rank_mat.dim()
        )));
    }
    Ok(())
}

/// Pairwise penalties `rank_mat_ij * exp(-R_ij / sigma)`, rows restricted to
/// `rows` when a mask is given.
fn pair_penalties(
    pmf: ArrayView2<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    rank_mat: ArrayView2<'_, f64>,
    sigma: f64,
    rows: Option<&Array1<f64>>,
) -> Result<Array2<f64>, LossError> {
    let y = one_hot(idx_durations, pmf.ncols());
    let mut penalties = diff_cdf_at_time_i(pmf, y.view())?;
    Zip::from(&mut penalties)
        .and(rank_mat)
        .par_for_each(|p, &m| *p = m * (-*p / sigma).exp());
    if let Some(mask) = rows {
        penalties *= &mask.view().insert_axis(Axis(1));
    }
    Ok(penalties)
}

/// `d loss / d F_a(t)` from the already scaled pair penalties.
///
/// Each penalty lowers the loss through `F_i(T_i)` and raises it through
/// `F_j(T_i)`.
fn cdf_coefficients(
    weights: ArrayView2<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    width: usize,
    sigma: f64,
) -> Array2<f64> {
    let n = idx_durations.len();
    let mut coef = Array2::<f64>::zeros((n, width));
    coef.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(a, mut row)| {
            row[idx_durations[a]] -= weights.row(a).sum() / sigma;
            for (i, &w) in weights.column(a).iter().enumerate() {
                row[idx_durations[i]] += w / sigma;
            }
        });
    coef
}

/// `sum_{t >= k} coef[t]` for every `k`.
fn suffix_sums(coef: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut out = coef.to_owned();
    for k in (0..out.len().saturating_sub(1)).rev() {
        out[k] += out[k + 1];
    }
    out
}

/// DeepHit ranking loss for a single risk, `phi` shaped `[batch, K]`.
///
/// `events` only takes part in the shape checks: the comparable pairs are already
/// encoded in `rank_mat`.
pub fn rank_loss_deephit_single(
    phi: ArrayView2<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, f64>,
    rank_mat: ArrayView2<'_, f64>,
    sigma: f64,
    reduction: Reduction,
) -> Result<LossOutput, LossError> {
    let losses = rank_loss_deephit_single_per_sample(phi, idx_durations, events, rank_mat, sigma)?;
    Ok(reduction.apply(losses))
}

pub fn rank_loss_deephit_single_per_sample(
    phi: ArrayView2<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, f64>,
    rank_mat: ArrayView2<'_, f64>,
    sigma: f64,
) -> Result<Array1<f64>, LossError> {
    let (batch, bins) = phi.dim();
    check_labels(batch, bins, idx_durations, events.len())?;
    check_rank_mat(rank_mat, batch)?;
    check_sigma(sigma)?;

    let pmf = pmf_from_logits(phi);
    let penalties = pair_penalties(pmf.view(), idx_durations, rank_mat, sigma, None)?;
    Ok(penalties.sum_axis(Axis(1)) / batch as f64)
}

/// [`rank_loss_deephit_single`] value together with its gradient with respect to `phi`.
pub fn rank_loss_deephit_single_gradient(
    phi: ArrayView2<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, f64>,
    rank_mat: ArrayView2<'_, f64>,
    sigma: f64,
    reduction: Reduction,
) -> Result<LossGradient<Ix2>, LossError> {
    let (batch, bins) = phi.dim();
    check_labels(batch, bins, idx_durations, events.len())?;
    check_rank_mat(rank_mat, batch)?;
    check_sigma(sigma)?;
    let scale = reduction.gradient_scale(batch)?;

    let pmf = pmf_from_logits(phi);
    let penalties = pair_penalties(pmf.view(), idx_durations, rank_mat, sigma, None)?;
    let losses = penalties.sum_axis(Axis(1)) / batch as f64;
    let weights = penalties * (scale / batch as f64);
    let coef = cdf_coefficients(weights.view(), idx_durations, pmf.ncols(), sigma);

    let mut cdf = pmf.clone();
    cumsum_last_axis(&mut cdf);

    let mut gradient = Array2::<f64>::zeros(phi.raw_dim());
    gradient
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(a, mut grad)| {
            let coef_row = coef.row(a);
            let baseline = coef_row.dot(&cdf.row(a));
            let upstream = suffix_sums(coef_row);
            for (k, g) in grad.iter_mut().enumerate() {
                *g = pmf[[a, k]] * (upstream[k] - baseline);
            }
        });

    Ok(LossGradient {
        value: reduction.apply(losses).total(),
        gradient,
    })
}

/// DeepHit ranking loss for competing risks, `phi` shaped `[batch, R, K]`.
///
/// Risk `r` is ranked on its own cause-specific CDF from the joint PMF, using only
/// the rows of samples whose event code is `r + 1`; the risk terms are summed per
/// sample before the reduction.
pub fn rank_loss_deephit_cr(
    phi: ArrayView3<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, u32>,
    rank_mat: ArrayView2<'_, f64>,
    sigma: f64,
    reduction: Reduction,
) -> Result<LossOutput, LossError> {
    let losses = rank_loss_deephit_cr_per_sample(phi, idx_durations, events, rank_mat, sigma)?;
    Ok(reduction.apply(losses))
}

pub fn rank_loss_deephit_cr_per_sample(
    phi: ArrayView3<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, u32>,
    rank_mat: ArrayView2<'_, f64>,
    sigma: f64,
) -> Result<Array1<f64>, LossError> {
    let batch = phi.len_of(Axis(0));
    let penalties = competing_penalties(phi, idx_durations, events, rank_mat, sigma)?.1;
    let mut losses = Array1::<f64>::zeros(batch);
    for risk in &penalties {
        losses += &(risk.sum_axis(Axis(1)) / batch as f64);
    }
    Ok(losses)
}

/// Joint PMF and the masked pair penalties of every risk.
fn competing_penalties(
    phi: ArrayView3<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, u32>,
    rank_mat: ArrayView2<'_, f64>,
    sigma: f64,
) -> Result<(Array3<f64>, Vec<Array2<f64>>), LossError> {
    check_competing(phi, idx_durations, events)?;
    check_rank_mat(rank_mat, phi.len_of(Axis(0)))?;
    check_sigma(sigma)?;

    let pmf = pmf_from_logits_cr(phi);
    let penalties = (0..pmf.len_of(Axis(1)))
        .into_par_iter()
        .map(|risk| {
            let code = risk as u32 + 1;
            let mask = events.mapv(|e| if e == code { 1.0 } else { 0.0 });
            pair_penalties(
                pmf.index_axis(Axis(1), risk),
                idx_durations,
                rank_mat,
                sigma,
                Some(&mask),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((pmf, penalties))
}

/// [`rank_loss_deephit_cr`] value together with its gradient with respect to `phi`.
pub fn rank_loss_deephit_cr_gradient(
    phi: ArrayView3<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, u32>,
    rank_mat: ArrayView2<'_, f64>,
    sigma: f64,
    reduction: Reduction,
) -> Result<LossGradient<Ix3>, LossError> {
    let (batch, risks, bins) = phi.dim();
    let (pmf, penalties) = competing_penalties(phi, idx_durations, events, rank_mat, sigma)?;
    let scale = reduction.gradient_scale(batch)?;

    let mut losses = Array1::<f64>::zeros(batch);
    let mut coef = Array3::<f64>::zeros((batch, risks, bins));
    for (risk, risk_penalties) in penalties.into_iter().enumerate() {
        losses += &(risk_penalties.sum_axis(Axis(1)) / batch as f64);
        let weights = risk_penalties * (scale / batch as f64);
        coef.index_axis_mut(Axis(1), risk)
            .assign(&cdf_coefficients(weights.view(), idx_durations, bins, sigma));
    }

    let mut cdf = pmf.clone();
    cumsum_last_axis(&mut cdf);

    let mut gradient = Array3::<f64>::zeros(phi.raw_dim());
    gradient
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(a, mut grad)| {
            let coef_a = coef.index_axis(Axis(0), a);
            let baseline: f64 = Zip::from(&coef_a)
                .and(&cdf.index_axis(Axis(0), a))
                .fold(0.0, |acc, &c, &f| acc + c * f);
            for (risk, mut grad_risk) in grad.outer_iter_mut().enumerate() {
                let upstream = suffix_sums(coef_a.row(risk));
                for (k, g) in grad_risk.iter_mut().enumerate() {
                    *g = pmf[[a, risk, k]] * (upstream[k] - baseline);
                }
            }
        });

    Ok(LossGradient {
        value: reduction.apply(losses).total(),
        gradient,
    })
}
