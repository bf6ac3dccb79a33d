//! Continuous-to-discrete time machinery: cut points and index assignment.

pub mod cuts;
pub mod index;
pub mod kaplan_meier;

use thiserror::Error;

pub use cuts::{CutSpec, make_cuts};
pub use index::{IndexDiscretizer, OverflowPolicy};
pub use kaplan_meier::{KaplanMeier, kaplan_meier};

/// Errors raised while building cut points or assigning duration bins.
#[derive(Debug, Error)]
pub enum DiscretizationError {
    #[error("duration vector must have at least one element")]
    EmptyDurations,
    #[error("durations and events differ in length: {durations} vs {events}")]
    LengthMismatch { durations: usize, events: usize },
    #[error("duration {0} is not finite")]
    NonFiniteDuration(f64),
    #[error("duration {0} is negative")]
    NegativeDuration(f64),
    #[error("cut points must be finite and strictly increasing (violated at position {position})")]
    InvalidCuts { position: usize },
    #[error("at least two cut points are required, got {0}")]
    TooFewCuts(usize),
    #[error("number of bins must be positive")]
    ZeroBins,
    #[error("quantile cuts need at least one event; every sample is censored")]
    NoEvents,
    #[error("degenerate cut grid: {0}")]
    DegenerateCuts(String),
}

/// Shared validation of a `(durations, events)` pair.
pub(crate) fn check_inputs(
    durations: ndarray::ArrayView1<'_, f64>,
    events: ndarray::ArrayView1<'_, u32>,
) -> Result<(), DiscretizationError> {
    if durations.is_empty() {
        return Err(DiscretizationError::EmptyDurations);
    }
    if durations.len() != events.len() {
        return Err(DiscretizationError::LengthMismatch {
            durations: durations.len(),
            events: events.len(),
        });
    }
    if let Some(&bad) = durations.iter().find(|value| !value.is_finite()) {
        return Err(DiscretizationError::NonFiniteDuration(bad));
    }
    if let Some(&bad) = durations.iter().find(|&&value| value < 0.0) {
        return Err(DiscretizationError::NegativeDuration(bad));
    }
    Ok(())
}
