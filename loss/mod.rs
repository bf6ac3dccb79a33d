//! Discrete-time survival losses over PMF parametrized network outputs.
//!
//! `phi` is the raw network output, `[batch, K]` for a single risk and
//! `[batch, R, K]` for competing risks. The losses own the normalization: a zero
//! logit is appended before the softmax so that probability mass can remain
//! beyond the last bin.

pub mod modules;
pub mod nll;
pub mod pmf;
pub mod rank;

use ndarray::{Array, Array1, ArrayView1, Dimension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use modules::{
    CompetingRiskBatch, DeepHitLoss, DeepHitSingleLoss, NllPmfLoss, SingleRiskBatch, SurvivalLoss,
};
pub use nll::{
    DEFAULT_EPSILON, nll_pmf, nll_pmf_cr, nll_pmf_cr_gradient, nll_pmf_cr_per_sample,
    nll_pmf_gradient, nll_pmf_per_sample,
};
pub use pmf::{PadSide, pad_col, pmf_from_logits, pmf_from_logits_cr};
pub use rank::{
    diff_cdf_at_time_i, pair_rank_mat, rank_loss_deephit_cr, rank_loss_deephit_cr_gradient,
    rank_loss_deephit_cr_per_sample, rank_loss_deephit_single, rank_loss_deephit_single_gradient,
    rank_loss_deephit_single_per_sample,
};

#[derive(Debug, Error)]
pub enum LossError {
    #[error("'{0}' is not a valid reduction; use 'none', 'mean' or 'sum'")]
    InvalidReduction(String),
    #[error("invalid {name} = {value}")]
    InvalidHyperparameter { name: &'static str, value: f64 },
    #[error(
        "duration index {index} is out of range for {bins} output bins; the network output is probably too small"
    )]
    IndexOutOfRange { index: usize, bins: usize },
    #[error("event code {event} is out of range for {risks} competing risks")]
    EventOutOfRange { event: u32, risks: usize },
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("loss batch is empty")]
    EmptyBatch,
    #[error("gradients are only defined for the 'mean' and 'sum' reductions")]
    GradientRequiresScalar,
}

/// How per-sample losses are collapsed into the returned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    None,
    #[default]
    Mean,
    Sum,
}

impl Reduction {
    pub fn apply(self, losses: Array1<f64>) -> LossOutput {
        match self {
            Reduction::None => LossOutput::PerSample(losses),
            Reduction::Mean => LossOutput::Scalar(losses.mean().unwrap_or(0.0)),
            Reduction::Sum => LossOutput::Scalar(losses.sum()),
        }
    }

    /// Weight of each per-sample loss in the reduced scalar.
    pub(crate) fn gradient_scale(self, batch: usize) -> Result<f64, LossError> {
        match self {
            Reduction::None => Err(LossError::GradientRequiresScalar),
            Reduction::Mean => Ok(1.0 / batch as f64),
            Reduction::Sum => Ok(1.0),
        }
    }
}

impl FromStr for Reduction {
    type Err = LossError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Reduction::None),
            "mean" => Ok(Reduction::Mean),
            "sum" => Ok(Reduction::Sum),
            other => Err(LossError::InvalidReduction(other.to_string())),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reduction::None => "none",
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
        };
        f.write_str(name)
    }
}

/// A reduced loss: the per-sample vector for [`Reduction::None`], a scalar otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum LossOutput {
    PerSample(Array1<f64>),
    Scalar(f64),
}

impl LossOutput {
    pub fn scalar(&self) -> Option<f64> {
        match self {
            LossOutput::Scalar(value) => Some(*value),
            LossOutput::PerSample(_) => None,
        }
    }

    pub fn per_sample(&self) -> Option<&Array1<f64>> {
        match self {
            LossOutput::PerSample(values) => Some(values),
            LossOutput::Scalar(_) => None,
        }
    }

    /// The scalar, or the sum of the per-sample losses.
    pub fn total(&self) -> f64 {
        match self {
            LossOutput::Scalar(value) => *value,
            LossOutput::PerSample(values) => values.sum(),
        }
    }
}

/// Reduced loss value together with its gradient with respect to `phi`.
#[derive(Debug, Clone, PartialEq)]
pub struct LossGradient<D: Dimension> {
    pub value: f64,
    pub gradient: Array<f64, D>,
}

pub(crate) fn check_sigma(sigma: f64) -> Result<(), LossError> {
    if sigma.is_finite() && sigma > 0.0 {
        Ok(())
    } else {
        Err(LossError::InvalidHyperparameter {
            name: "sigma",
            value: sigma,
        })
    }
}

/// Batch length, bin count and index range checks shared by every loss.
pub(crate) fn check_labels(
    batch: usize,
    bins: usize,
    idx_durations: ArrayView1<'_, usize>,
    events: usize,
) -> Result<(), LossError> {
    if batch == 0 {
        return Err(LossError::EmptyBatch);
    }
    if bins == 0 {
        return Err(LossError::ShapeMismatch(
            "phi must have at least one duration bin".to_string(),
        ));
    }
    if idx_durations.len() != batch || events != batch {
        return Err(LossError::ShapeMismatch(format!(
            "phi has {batch} rows but idx_durations has {} and events has {events}",
            idx_durations.len()
        )));
    }
    if let Some(&index) = idx_durations.iter().max() {
        if index >= bins {
            return Err(LossError::IndexOutOfRange { index, bins });
        }
    }
    Ok(())
}
