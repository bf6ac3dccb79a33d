use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use survloss::config::LossConfig;
use survloss::loss::{
    CompetingRiskBatch, DEFAULT_EPSILON, SingleRiskBatch, nll_pmf_cr, nll_pmf_per_sample,
    pair_rank_mat,
};
use survloss::{
    DeepHitLoss, DeepHitSingleLoss, LossError, NllPmfLoss, Reduction, SurvivalLoss,
};

struct SyntheticBatch {
    phi: Array3<f64>,
    idx_durations: Array1<usize>,
    events: Array1<u32>,
}

fn synthetic_batch(seed: u64, batch: usize, risks: usize, bins: usize) -> SyntheticBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    let phi = Array3::from_shape_fn((batch, risks, bins), |_| rng.sample::<f64, _>(StandardNormal));
    let idx_durations = Array1::from_shape_fn(batch, |_| rng.gen_range(0..bins));
    let events = Array1::from_shape_fn(batch, |_| rng.gen_range(0..=risks as u32));
    SyntheticBatch {
        phi,
        idx_durations,
        events,
    }
}

fn central_difference<D: ndarray::Dimension>(
    phi: &ndarray::Array<f64, D>,
    position: usize,
    loss: impl Fn(&ndarray::Array<f64, D>) -> f64,
) -> f64 {
    let h = 1e-6;
    let mut plus = phi.clone();
    let mut minus = phi.clone();
    plus.as_slice_mut().expect("contiguous")[position] += h;
    minus.as_slice_mut().expect("contiguous")[position] -= h;
    (loss(&plus) - loss(&minus)) / (2.0 * h)
}

#[test]
fn single_risk_deephit_matches_competing_with_one_risk() {
    let data = synthetic_batch(7, 32, 1, 6);
    let phi2: Array2<f64> = data.phi.index_axis(Axis(1), 0).to_owned();
    let indicator = data.events.mapv(f64::from);

    let single = DeepHitSingleLoss::new(0.3, 0.1, Reduction::Mean).expect("loss");
    let competing = DeepHitLoss::new(0.3, 0.1, Reduction::Mean).expect("loss");
    let a = single
        .forward(&SingleRiskBatch::new(
            phi2.view(),
            data.idx_durations.view(),
            indicator.view(),
        ))
        .expect("single");
    let b = competing
        .forward(&CompetingRiskBatch::new(
            data.phi.view(),
            data.idx_durations.view(),
            data.events.view(),
        ))
        .expect("competing");
    assert_abs_diff_eq!(a.total(), b.total(), epsilon = 1e-5);
}

#[test]
fn competing_nll_with_one_risk_matches_single_risk() {
    let data = synthetic_batch(11, 40, 1, 5);
    let phi2 = data.phi.index_axis(Axis(1), 0).to_owned();
    let single = nll_pmf_per_sample(
        phi2.view(),
        data.idx_durations.view(),
        data.events.mapv(f64::from).view(),
        DEFAULT_EPSILON,
    )
    .expect("single");
    let competing = nll_pmf_cr(
        data.phi.view(),
        data.idx_durations.view(),
        data.events.view(),
        Reduction::None,
        DEFAULT_EPSILON,
    )
    .expect("competing");
    let competing = competing.per_sample().expect("per-sample output");
    for (a, b) in single.iter().zip(competing.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-5);
    }
}

#[test]
fn losses_are_non_negative_and_finite_on_random_batches() {
    for seed in 0..5 {
        let data = synthetic_batch(seed, 24, 3, 7);
        let loss = DeepHitLoss::new(0.5, 0.2, Reduction::None).expect("loss");
        let values = loss
            .per_sample(&CompetingRiskBatch::new(
                data.phi.view(),
                data.idx_durations.view(),
                data.events.view(),
            ))
            .expect("per-sample");
        assert!(values.iter().all(|v| v.is_finite() && *v >= 0.0));
    }
}

#[test]
fn gradients_agree_with_central_differences() {
    let data = synthetic_batch(3, 12, 2, 4);
    let batch = CompetingRiskBatch::new(
        data.phi.view(),
        data.idx_durations.view(),
        data.events.view(),
    );
    let loss = LossConfig {
        alpha: 0.25,
        sigma: 0.5,
        reduction: Reduction::Sum,
        epsilon: 0.0,
    }
    .deephit()
    .expect("config");
    let analytic = loss.value_and_gradient(&batch).expect("gradient");
    assert_abs_diff_eq!(
        analytic.value,
        loss.forward(&batch).expect("forward").total(),
        epsilon = 1e-10
    );

    for position in [0, 5, 17, 30, 47, 95] {
        let numeric = central_difference(&data.phi, position, |phi| {
            loss.forward(&CompetingRiskBatch::new(
                phi.view(),
                data.idx_durations.view(),
                data.events.view(),
            ))
            .expect("forward")
            .total()
        });
        let got = analytic.gradient.as_slice().expect("contiguous")[position];
        assert_abs_diff_eq!(got, numeric, epsilon = 1e-5);
    }
}

#[test]
fn undersized_network_output_is_reported() {
    let data = synthetic_batch(5, 8, 1, 3);
    let phi2 = data.phi.index_axis(Axis(1), 0).to_owned();
    let mut idx = data.idx_durations.clone();
    idx[2] = 3;
    let indicator = data.events.mapv(f64::from);
    let err = NllPmfLoss::default()
        .forward(&SingleRiskBatch::new(phi2.view(), idx.view(), indicator.view()))
        .unwrap_err();
    assert!(matches!(err, LossError::IndexOutOfRange { index: 3, bins: 3 }));
}

#[test]
fn loss_modules_are_shareable_across_threads() {
    let data = synthetic_batch(9, 16, 1, 5);
    let phi2 = data.phi.index_axis(Axis(1), 0).to_owned();
    let indicator = data.events.mapv(f64::from);
    let rank_mat = pair_rank_mat(data.idx_durations.view(), indicator.view()).expect("pairs");
    let loss = DeepHitSingleLoss::new(0.5, 0.1, Reduction::Mean).expect("loss");
    let batch = SingleRiskBatch::new(phi2.view(), data.idx_durations.view(), indicator.view())
        .with_rank_mat(rank_mat.view());
    let expected = loss.forward(&batch).expect("forward").total();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| loss.forward(&batch).expect("forward").total()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("thread"), expected);
        }
    });
}
