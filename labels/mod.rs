//! Label transforms: fitted, stateful wrappers that turn raw `(duration, event)`
//! pairs into the targets a network is trained on.

pub mod cox_time;
pub mod discrete;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::discretize::DiscretizationError;

pub use cox_time::{CoxTimeLabelTransform, DurationScaler, InverseDurationMap};
pub use discrete::DiscreteLabelTransform;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{0} was called before fit")]
    NotFitted(&'static str),
    #[error("discretization failed: {0}")]
    Discretization(#[from] DiscretizationError),
    #[error("duration {0} is not a finite non-negative value")]
    InvalidDuration(f64),
    #[error("durations and events differ in length: {durations} vs {events}")]
    LengthMismatch { durations: usize, events: usize },
    #[error("duration vector must have at least one element")]
    EmptyDurations,
    #[error("scaled duration {0} was not produced from the training data")]
    UnseenScaledDuration(f64),
}

/// Explicit fit state of a label transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitState<T> {
    Unfit,
    Fitted(T),
}

impl<T> Default for FitState<T> {
    fn default() -> Self {
        FitState::Unfit
    }
}

impl<T> FitState<T> {
    /// The fitted parameters, or a state error naming the offending call.
    pub fn fitted(&self, operation: &'static str) -> Result<&T, TransformError> {
        match self {
            FitState::Fitted(params) => Ok(params),
            FitState::Unfit => Err(TransformError::NotFitted(operation)),
        }
    }

    #[inline]
    pub fn is_fitted(&self) -> bool {
        matches!(self, FitState::Fitted(_))
    }
}

/// Discretized targets: one bin index and one event code per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteLabels {
    pub idx_durations: Array1<usize>,
    /// `0` for censored, otherwise the event type (always `1` for single risk).
    pub events: Array1<u32>,
}

impl DiscreteLabels {
    /// Float `1.0`/`0.0` event indicator as consumed by the single-risk losses.
    pub fn event_indicator(&self) -> Array1<f64> {
        self.events.mapv(|code| if code != 0 { 1.0 } else { 0.0 })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.idx_durations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.idx_durations.is_empty()
    }
}
