use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Ix2, Ix3};

use super::pmf::{padded_partition, padded_shift};
use super::{LossError, LossGradient, LossOutput, Reduction, check_labels};

/// Floor added inside every logarithm.
pub const DEFAULT_EPSILON: f64 = 1e-7;

/// Negative log-likelihood of the PMF parametrization for a single risk.
///
/// `phi` is `[batch, K]`, `idx_durations` holds the discrete duration of every
/// sample and `events` is `1.0` for an observed event and `0.0` for a censoring.
/// Events contribute `-log f(idx)`, censorings `-log S(idx)`, where the PMF is the
/// softmax of `phi` with an extra zero logit appended.
pub fn nll_pmf(
    phi: ArrayView2<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, f64>,
    reduction: Reduction,
    epsilon: f64,
) -> Result<LossOutput, LossError> {
    let losses = nll_pmf_per_sample(phi, idx_durations, events, epsilon)?;
    Ok(reduction.apply(losses))
}

pub fn nll_pmf_per_sample(
    phi: ArrayView2<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, f64>,
    epsilon: f64,
) -> Result<Array1<f64>, LossError> {
    let (batch, bins) = phi.dim();
    check_labels(batch, bins, idx_durations, events.len())?;

    let losses: Vec<f64> = phi
        .axis_iter(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(i, row)| nll_pmf_row(row, idx_durations[i], events[i], epsilon))
        .collect();
    Ok(Array1::from(losses))
}

fn nll_pmf_row(row: ArrayView1<'_, f64>, idx: usize, event: f64, epsilon: f64) -> f64 {
    let gamma = padded_shift(row);
    let mut cumsum = 0.0;
    let mut cumsum_at_idx = 0.0;
    for (k, &v) in row.iter().enumerate() {
        cumsum += (v - gamma).exp();
        if k == idx {
            cumsum_at_idx = cumsum;
        }
    }
    let sum = cumsum + (-gamma).exp();

    // Cumulative sums can drift below zero, hence the clamps before each log.
    let part1 = (row[idx] - gamma) * event;
    let part2 = -(sum.max(0.0) + epsilon).ln();
    let part3 = ((sum - cumsum_at_idx).max(0.0) + epsilon).ln() * (1.0 - event);
    -(part1 + part2 + part3)
}

/// [`nll_pmf`] value together with its gradient with respect to `phi`.
pub fn nll_pmf_gradient(
    phi: ArrayView2<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, f64>,
    reduction: Reduction,
    epsilon: f64,
) -> Result<LossGradient<Ix2>, LossError> {
    let losses = nll_pmf_per_sample(phi, idx_durations, events, epsilon)?;
    let scale = reduction.gradient_scale(phi.nrows())?;

    let mut gradient = Array2::<f64>::zeros(phi.raw_dim());
    gradient
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut grad)| {
            let row = phi.row(i);
            let idx = idx_durations[i];
            let event = events[i];
            let gamma = padded_shift(row);
            let exps = row.mapv(|v| (v - gamma).exp());
            let pad = (-gamma).exp();
            let total = exps.sum() + pad;
            let tail = (exps.iter().skip(idx + 1).sum::<f64>() + pad).max(f64::MIN_POSITIVE);
            for (k, g) in grad.iter_mut().enumerate() {
                let mut value = exps[k] / total;
                if k == idx {
                    value -= event;
                }
                if k > idx {
                    value -= (1.0 - event) * exps[k] / tail;
                }
                *g = scale * value;
            }
        });

    Ok(LossGradient {
        value: reduction.apply(losses).total(),
        gradient,
    })
}

/// Negative log-likelihood for competing risks with a PMF parametrization.
///
/// `phi` is `[batch, R, K]` and `events` holds `0` for censored samples and
/// `1..=R` for the observed risk. All `R * K` logits of a sample share one softmax
/// (risks compete for the same probability mass); censored samples contribute
/// `-log(1 - sum_r F_r(idx))`.
pub fn nll_pmf_cr(
    phi: ArrayView3<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, u32>,
    reduction: Reduction,
    epsilon: f64,
) -> Result<LossOutput, LossError> {
    let losses = nll_pmf_cr_per_sample(phi, idx_durations, events, epsilon)?;
    Ok(reduction.apply(losses))
}

pub fn nll_pmf_cr_per_sample(
    phi: ArrayView3<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, u32>,
    epsilon: f64,
) -> Result<Array1<f64>, LossError> {
    check_competing(phi, idx_durations, events)?;

    let losses: Vec<f64> = phi
        .axis_iter(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(i, logits)| {
            let idx = idx_durations[i];
            let gamma = padded_shift(logits.view());
            let total = padded_partition(logits.view(), gamma);
            let log_lik = match events[i] {
                0 => {
                    let cdf: f64 = logits
                        .outer_iter()
                        .map(|risk| {
                            risk.iter()
                                .take(idx + 1)
                                .map(|&v| (v - gamma).exp() / total)
                                .sum::<f64>()
                        })
                        .sum();
                    ((1.0 - cdf).max(0.0) + epsilon).ln()
                }
                event => {
                    let pmf = (logits[[event as usize - 1, idx]] - gamma).exp() / total;
                    (pmf.max(0.0) + epsilon).ln()
                }
            };
            -log_lik
        })
        .collect();
    Ok(Array1::from(losses))
}

/// [`nll_pmf_cr`] value together with its gradient with respect to `phi`.
pub fn nll_pmf_cr_gradient(
    phi: ArrayView3<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, u32>,
    reduction: Reduction,
    epsilon: f64,
) -> Result<LossGradient<Ix3>, LossError> {
    let losses = nll_pmf_cr_per_sample(phi, idx_durations, events, epsilon)?;
    let scale = reduction.gradient_scale(phi.len_of(Axis(0)))?;

    let mut gradient = Array3::<f64>::zeros(phi.raw_dim());
    gradient
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut grad)| {
            let logits = phi.index_axis(Axis(0), i);
            let idx = idx_durations[i];
            let gamma = padded_shift(logits);
            let exps = logits.mapv(|v| (v - gamma).exp());
            let pad = (-gamma).exp();
            let total = exps.sum() + pad;
            match events[i] {
                0 => {
                    let beyond: f64 = exps
                        .outer_iter()
                        .map(|risk| risk.iter().skip(idx + 1).sum::<f64>())
                        .sum();
                    let tail = (beyond + pad).max(f64::MIN_POSITIVE);
                    for ((r, k), g) in grad.indexed_iter_mut() {
                        let mut value = exps[[r, k]] / total;
                        if k > idx {
                            value -= exps[[r, k]] / tail;
                        }
                        *g = scale * value;
                    }
                }
                event => {
                    grad.zip_mut_with(&exps, |g, &e| *g = scale * e / total);
                    grad[[event as usize - 1, idx]] -= scale;
                }
            }
        });

    Ok(LossGradient {
        value: reduction.apply(losses).total(),
        gradient,
    })
}

pub(crate) fn check_competing(
    phi: ArrayView3<'_, f64>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, u32>,
) -> Result<(), LossError> {
    let (batch, risks, bins) = phi.dim();
    check_labels(batch, bins, idx_durations, events.len())?;
    if risks == 0 {
        return Err(LossError::ShapeMismatch(
            "phi must have at least one risk".to_string(),
        ));
    }
    if let Some(&event) = events.iter().find(|&&event| event as usize > risks) {
        return Err(LossError::EventOutOfRange { event, risks });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};

    fn numeric_gradient<D: ndarray::Dimension>(
        phi: &Array<f64, D>,
        loss: impl Fn(&Array<f64, D>) -> f64,
    ) -> Array<f64, D> {
        let h = 1e-6;
        let mut grad = Array::zeros(phi.raw_dim());
        for (pos, g) in grad.iter_mut().enumerate() {
            let mut plus = phi.clone();
            let mut minus = phi.clone();
            plus.as_slice_mut().unwrap()[pos] += h;
            minus.as_slice_mut().unwrap()[pos] -= h;
            *g = (loss(&plus) - loss(&minus)) / (2.0 * h);
        }
        grad
    }

    #[test]
    fn uniform_logits_match_hand_computation() {
        // Three bins plus padding, uniform PMF of 1/4.
        let phi = Array2::<f64>::zeros((2, 3));
        let idx = array![1, 2];
        let events = array![1.0, 0.0];
        let losses =
            nll_pmf_per_sample(phi.view(), idx.view(), events.view(), DEFAULT_EPSILON).unwrap();
        assert_abs_diff_eq!(losses[0], 4.0f64.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(losses[1], 4.0f64.ln(), epsilon = 1e-6);
    }

    #[test]
    fn confident_correct_prediction_approaches_zero() {
        let phi = array![[-30.0, 60.0, -30.0]];
        let loss = nll_pmf(
            phi.view(),
            array![1].view(),
            array![1.0].view(),
            Reduction::Mean,
            DEFAULT_EPSILON,
        )
        .unwrap()
        .total();
        assert!(loss >= 0.0);
        assert!(loss < 1e-6);
    }

    #[test]
    fn large_logits_stay_finite() {
        let phi = array![[1000.0, -1000.0], [-1000.0, 1000.0]];
        let losses = nll_pmf_per_sample(
            phi.view(),
            array![1, 0].view(),
            array![1.0, 0.0].view(),
            DEFAULT_EPSILON,
        )
        .unwrap();
        assert!(losses.iter().all(|v| v.is_finite()));
        // Censored at bin 0 while all mass sits in bin 1: survival is ~1.
        assert_abs_diff_eq!(losses[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn rejects_undersized_output() {
        let phi = Array2::<f64>::zeros((1, 2));
        let err = nll_pmf(
            phi.view(),
            array![2].view(),
            array![1.0].view(),
            Reduction::Mean,
            DEFAULT_EPSILON,
        )
        .unwrap_err();
        assert!(matches!(err, LossError::IndexOutOfRange { index: 2, bins: 2 }));
    }

    #[test]
    fn single_risk_competing_matches_plain_nll() {
        let phi = array![[0.3, -1.2, 0.8, 0.1], [1.5, 0.2, -0.4, -2.0], [0.0, 0.5, 0.5, 1.0]];
        let idx = array![2, 0, 3];
        let codes = array![1u32, 0, 1];
        let indicator = codes.mapv(|c| c as f64);
        let plain =
            nll_pmf_per_sample(phi.view(), idx.view(), indicator.view(), DEFAULT_EPSILON).unwrap();
        let phi3 = phi.clone().insert_axis(Axis(1));
        let competing =
            nll_pmf_cr_per_sample(phi3.view(), idx.view(), codes.view(), DEFAULT_EPSILON).unwrap();
        for (a, b) in plain.iter().zip(competing.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn competing_event_codes_are_checked() {
        let phi = Array3::<f64>::zeros((1, 2, 3));
        let err = nll_pmf_cr(
            phi.view(),
            array![0].view(),
            array![3].view(),
            Reduction::Sum,
            DEFAULT_EPSILON,
        )
        .unwrap_err();
        assert!(matches!(err, LossError::EventOutOfRange { event: 3, risks: 2 }));
    }

    #[test]
    fn competing_censoring_uses_all_risks() {
        // Two risks, two bins, uniform: five logits in the softmax.
        let phi = Array3::<f64>::zeros((1, 2, 2));
        let loss = nll_pmf_cr(
            phi.view(),
            array![0].view(),
            array![0].view(),
            Reduction::Sum,
            DEFAULT_EPSILON,
        )
        .unwrap()
        .total();
        assert_abs_diff_eq!(loss, -(3.0f64 / 5.0).ln(), epsilon = 1e-6);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let phi = array![[0.3, -1.2, 0.8], [1.5, 0.2, -0.4], [0.0, 0.5, 0.5], [-0.7, 0.9, 0.1]];
        let idx = array![2, 0, 1, 1];
        let events = array![1.0, 0.0, 0.0, 1.0];
        for reduction in [Reduction::Mean, Reduction::Sum] {
            let analytic =
                nll_pmf_gradient(phi.view(), idx.view(), events.view(), reduction, 0.0).unwrap();
            let numeric = numeric_gradient(&phi, |p| {
                nll_pmf(p.view(), idx.view(), events.view(), reduction, 0.0)
                    .unwrap()
                    .total()
            });
            for (a, n) in analytic.gradient.iter().zip(numeric.iter()) {
                assert_abs_diff_eq!(a, n, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn competing_gradient_matches_finite_differences() {
        let phi = array![
            [[0.3, -1.2, 0.8], [0.1, 0.4, -0.3]],
            [[1.5, 0.2, -0.4], [-1.0, 0.0, 0.6]],
            [[0.0, 0.5, 0.5], [0.2, -0.2, 0.9]]
        ];
        let idx = array![2, 0, 1];
        let events = array![2u32, 0, 1];
        let analytic =
            nll_pmf_cr_gradient(phi.view(), idx.view(), events.view(), Reduction::Mean, 0.0)
                .unwrap();
        let numeric = numeric_gradient(&phi, |p| {
            nll_pmf_cr(p.view(), idx.view(), events.view(), Reduction::Mean, 0.0)
                .unwrap()
                .total()
        });
        for (a, n) in analytic.gradient.iter().zip(numeric.iter()) {
            assert_abs_diff_eq!(a, n, epsilon = 1e-6);
        }
    }

    #[test]
    fn gradient_requires_scalar_reduction() {
        let phi = Array2::<f64>::zeros((1, 2));
        let err = nll_pmf_gradient(
            phi.view(),
            array![0].view(),
            array![1.0].view(),
            Reduction::None,
            DEFAULT_EPSILON,
        )
        .unwrap_err();
        assert!(matches!(err, LossError::GradientRequiresScalar));
    }
}
