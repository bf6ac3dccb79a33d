//! Configured loss objects. Each one fixes its hyperparameters at construction and
//! is then evaluated on borrowed batches, so a single instance can be shared
//! between threads.

use ndarray::{Array1, ArrayView1, ArrayView2, ArrayView3, CowArray, Dimension, Ix2, Ix3};

use super::nll::{
    DEFAULT_EPSILON, nll_pmf_cr_gradient, nll_pmf_cr_per_sample, nll_pmf_gradient,
    nll_pmf_per_sample,
};
use super::rank::{
    pair_rank_mat, rank_loss_deephit_cr_gradient, rank_loss_deephit_cr_per_sample,
    rank_loss_deephit_single_gradient, rank_loss_deephit_single_per_sample,
};
use super::{LossError, LossGradient, LossOutput, Reduction, check_sigma};

/// Common interface of the survival losses.
pub trait SurvivalLoss: Send + Sync {
    type Batch<'a>;
    /// Dimensionality of `phi` and therefore of the gradient.
    type Dim: Dimension;

    fn reduction(&self) -> Reduction;

    /// Unreduced loss, one value per sample.
    fn per_sample(&self, batch: &Self::Batch<'_>) -> Result<Array1<f64>, LossError>;

    fn forward(&self, batch: &Self::Batch<'_>) -> Result<LossOutput, LossError> {
        Ok(self.reduction().apply(self.per_sample(batch)?))
    }

    /// Reduced loss and its gradient with respect to `phi`.
    fn value_and_gradient(
        &self,
        batch: &Self::Batch<'_>,
    ) -> Result<LossGradient<Self::Dim>, LossError>;
}

/// Network output and discrete labels for a single-risk batch.
#[derive(Debug, Clone, Copy)]
pub struct SingleRiskBatch<'a> {
    /// `[batch, K]`
    pub phi: ArrayView2<'a, f64>,
    pub idx_durations: ArrayView1<'a, usize>,
    /// `1.0` for events, `0.0` for censorings.
    pub events: ArrayView1<'a, f64>,
    /// Comparable pairs; derived with [`pair_rank_mat`] when absent.
    pub rank_mat: Option<ArrayView2<'a, f64>>,
}

impl<'a> SingleRiskBatch<'a> {
    pub fn new(
        phi: ArrayView2<'a, f64>,
        idx_durations: ArrayView1<'a, usize>,
        events: ArrayView1<'a, f64>,
    ) -> Self {
        Self {
            phi,
            idx_durations,
            events,
            rank_mat: None,
        }
    }

    pub fn with_rank_mat(mut self, rank_mat: ArrayView2<'a, f64>) -> Self {
        self.rank_mat = Some(rank_mat);
        self
    }
}

/// Network output and discrete labels for a competing-risks batch.
#[derive(Debug, Clone, Copy)]
pub struct CompetingRiskBatch<'a> {
    /// `[batch, R, K]`
    pub phi: ArrayView3<'a, f64>,
    pub idx_durations: ArrayView1<'a, usize>,
    /// `0` for censored, `1..=R` for the observed risk.
    pub events: ArrayView1<'a, u32>,
    pub rank_mat: Option<ArrayView2<'a, f64>>,
}

impl<'a> CompetingRiskBatch<'a> {
    pub fn new(
        phi: ArrayView3<'a, f64>,
        idx_durations: ArrayView1<'a, usize>,
        events: ArrayView1<'a, u32>,
    ) -> Self {
        Self {
            phi,
            idx_durations,
            events,
            rank_mat: None,
        }
    }

    pub fn with_rank_mat(mut self, rank_mat: ArrayView2<'a, f64>) -> Self {
        self.rank_mat = Some(rank_mat);
        self
    }
}

fn check_epsilon(epsilon: f64) -> Result<f64, LossError> {
    if epsilon.is_finite() && epsilon >= 0.0 {
        Ok(epsilon)
    } else {
        Err(LossError::InvalidHyperparameter {
            name: "epsilon",
            value: epsilon,
        })
    }
}

/// The batch's own comparable-pair matrix, or one derived from its labels.
fn rank_mat_or_derived<'a>(
    given: Option<ArrayView2<'a, f64>>,
    idx_durations: ArrayView1<'_, usize>,
    events: ArrayView1<'_, f64>,
) -> Result<CowArray<'a, f64, Ix2>, LossError> {
    match given {
        Some(rank_mat) => Ok(CowArray::from(rank_mat)),
        None => Ok(CowArray::from(pair_rank_mat(idx_durations, events)?)),
    }
}

fn check_alpha(alpha: f64) -> Result<(), LossError> {
    if (0.0..=1.0).contains(&alpha) {
        Ok(())
    } else {
        Err(LossError::InvalidHyperparameter {
            name: "alpha",
            value: alpha,
        })
    }
}

/// Negative log-likelihood of the PMF parametrization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NllPmfLoss {
    reduction: Reduction,
    epsilon: f64,
}

impl Default for NllPmfLoss {
    fn default() -> Self {
        Self::new(Reduction::Mean)
    }
}

impl NllPmfLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self {
            reduction,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self, LossError> {
        self.epsilon = check_epsilon(epsilon)?;
        Ok(self)
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }
}

impl SurvivalLoss for NllPmfLoss {
    type Batch<'a> = SingleRiskBatch<'a>;
    type Dim = Ix2;

    fn reduction(&self) -> Reduction {
        self.reduction
    }

    fn per_sample(&self, batch: &SingleRiskBatch<'_>) -> Result<Array1<f64>, LossError> {
        nll_pmf_per_sample(batch.phi, batch.idx_durations, batch.events, self.epsilon)
    }

    fn value_and_gradient(
        &self,
        batch: &SingleRiskBatch<'_>,
    ) -> Result<LossGradient<Ix2>, LossError> {
        nll_pmf_gradient(
            batch.phi,
            batch.idx_durations,
            batch.events,
            self.reduction,
            self.epsilon,
        )
    }
}

/// DeepHit for a single risk: `alpha * nll_pmf + (1 - alpha) * rank_loss`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeepHitSingleLoss {
    alpha: f64,
    sigma: f64,
    reduction: Reduction,
    epsilon: f64,
}

impl DeepHitSingleLoss {
    pub fn new(alpha: f64, sigma: f64, reduction: Reduction) -> Result<Self, LossError> {
        check_alpha(alpha)?;
        check_sigma(sigma)?;
        log::debug!("DeepHit single-risk loss with alpha={alpha}, sigma={sigma}, reduction={reduction}");
        Ok(Self {
            alpha,
            sigma,
            reduction,
            epsilon: DEFAULT_EPSILON,
        })
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self, LossError> {
        self.epsilon = check_epsilon(epsilon)?;
        Ok(self)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl SurvivalLoss for DeepHitSingleLoss {
    type Batch<'a> = SingleRiskBatch<'a>;
    type Dim = Ix2;

    fn reduction(&self) -> Reduction {
        self.reduction
    }

    fn per_sample(&self, batch: &SingleRiskBatch<'_>) -> Result<Array1<f64>, LossError> {
        let nll =
            nll_pmf_per_sample(batch.phi, batch.idx_durations, batch.events, self.epsilon)?;
        let rank_mat = rank_mat_or_derived(batch.rank_mat, batch.idx_durations, batch.events)?;
        let rank = rank_loss_deephit_single_per_sample(
            batch.phi,
            batch.idx_durations,
            batch.events,
            rank_mat.view(),
            self.sigma,
        )?;
        Ok(nll * self.alpha + rank * (1.0 - self.alpha))
    }

    fn value_and_gradient(
        &self,
        batch: &SingleRiskBatch<'_>,
    ) -> Result<LossGradient<Ix2>, LossError> {
        let nll = nll_pmf_gradient(
            batch.phi,
            batch.idx_durations,
            batch.events,
            self.reduction,
            self.epsilon,
        )?;
        let rank_mat = rank_mat_or_derived(batch.rank_mat, batch.idx_durations, batch.events)?;
        let rank = rank_loss_deephit_single_gradient(
            batch.phi,
            batch.idx_durations,
            batch.events,
            rank_mat.view(),
            self.sigma,
            self.reduction,
        )?;
        Ok(blend(self.alpha, nll, rank))
    }
}

/// DeepHit for competing risks: `alpha * nll_pmf_cr + (1 - alpha) * rank_loss_cr`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeepHitLoss {
    alpha: f64,
    sigma: f64,
    reduction: Reduction,
    epsilon: f64,
}

impl DeepHitLoss {
    pub fn new(alpha: f64, sigma: f64, reduction: Reduction) -> Result<Self, LossError> {
        check_alpha(alpha)?;
        check_sigma(sigma)?;
        log::debug!("DeepHit competing-risk loss with alpha={alpha}, sigma={sigma}, reduction={reduction}");
        Ok(Self {
            alpha,
            sigma,
            reduction,
            epsilon: DEFAULT_EPSILON,
        })
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self, LossError> {
        self.epsilon = check_epsilon(epsilon)?;
        Ok(self)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl SurvivalLoss for DeepHitLoss {
    type Batch<'a> = CompetingRiskBatch<'a>;
    type Dim = Ix3;

    fn reduction(&self) -> Reduction {
        self.reduction
    }

    fn per_sample(&self, batch: &CompetingRiskBatch<'_>) -> Result<Array1<f64>, LossError> {
        let nll =
            nll_pmf_cr_per_sample(batch.phi, batch.idx_durations, batch.events, self.epsilon)?;
        let indicator = batch.events.mapv(f64::from);
        let rank_mat = rank_mat_or_derived(batch.rank_mat, batch.idx_durations, indicator.view())?;
        let rank = rank_loss_deephit_cr_per_sample(
            batch.phi,
            batch.idx_durations,
            batch.events,
            rank_mat.view(),
            self.sigma,
        )?;
        Ok(nll * self.alpha + rank * (1.0 - self.alpha))
    }

    fn value_and_gradient(
        &self,
        batch: &CompetingRiskBatch<'_>,
    ) -> Result<LossGradient<Ix3>, LossError> {
        let nll = nll_pmf_cr_gradient(
            batch.phi,
            batch.idx_durations,
            batch.events,
            self.reduction,
            self.epsilon,
        )?;
        let indicator = batch.events.mapv(f64::from);
        let rank_mat = rank_mat_or_derived(batch.rank_mat, batch.idx_durations, indicator.view())?;
        let rank = rank_loss_deephit_cr_gradient(
            batch.phi,
            batch.idx_durations,
            batch.events,
            rank_mat.view(),
            self.sigma,
            self.reduction,
        )?;
        Ok(blend(self.alpha, nll, rank))
    }
}

fn blend<D: Dimension>(alpha: f64, nll: LossGradient<D>, rank: LossGradient<D>) -> LossGradient<D> {
    LossGradient {
        value: alpha * nll.value + (1.0 - alpha) * rank.value,
        gradient: nll.gradient * alpha + rank.gradient * (1.0 - alpha),
    }
}
