use itertools::Itertools;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use super::kaplan_meier::kaplan_meier;
use super::{DiscretizationError, check_inputs};

// Absorbs rounding in the product-limit estimate when matching survival levels.
const LEVEL_TOLERANCE: f64 = 1e-12;

/// How the cut points of the discretization grid are chosen.
///
/// `Equidistant(k)` and `Quantile(k)` both describe `k` bins (`k + 1` cut points),
/// learned from training data. `Explicit` carries a fixed grid and bypasses fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutSpec {
    Equidistant(usize),
    /// Cuts at equally spaced levels of the Kaplan-Meier survival curve, so every
    /// bin carries roughly the same share of events.
    Quantile(usize),
    Explicit(Vec<f64>),
}

impl CutSpec {
    /// Whether the grid is fixed up front and `fit` has nothing to learn.
    #[inline]
    pub fn is_predefined(&self) -> bool {
        matches!(self, CutSpec::Explicit(_))
    }
}

impl Default for CutSpec {
    fn default() -> Self {
        CutSpec::Equidistant(20)
    }
}

/// Computes the cut points for `spec` from training durations and event codes.
///
/// Learned grids start at `min` and end at or beyond the largest duration.
pub fn make_cuts(
    spec: &CutSpec,
    durations: ArrayView1<'_, f64>,
    events: ArrayView1<'_, u32>,
    min: f64,
) -> Result<Array1<f64>, DiscretizationError> {
    let cuts = match spec {
        CutSpec::Explicit(values) => Array1::from(values.clone()),
        CutSpec::Equidistant(bins) => {
            check_inputs(durations, events)?;
            cuts_equidistant(max_duration(durations), *bins, min)?
        }
        CutSpec::Quantile(bins) => {
            check_inputs(durations, events)?;
            cuts_quantiles(durations, events, *bins, min)?
        }
    };
    validate_cuts(cuts.view())?;
    Ok(cuts)
}

/// Rejects grids that are too short, non-finite or not strictly increasing.
pub fn validate_cuts(cuts: ArrayView1<'_, f64>) -> Result<(), DiscretizationError> {
    if cuts.len() < 2 {
        return Err(DiscretizationError::TooFewCuts(cuts.len()));
    }
    if let Some(position) = cuts.iter().position(|value| !value.is_finite()) {
        return Err(DiscretizationError::InvalidCuts { position });
    }
    if let Some((position, _)) = cuts
        .iter()
        .tuple_windows()
        .find_position(|(left, right)| left >= right)
    {
        return Err(DiscretizationError::InvalidCuts {
            position: position + 1,
        });
    }
    Ok(())
}

fn max_duration(durations: ArrayView1<'_, f64>) -> f64 {
    durations.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn cuts_equidistant(max: f64, bins: usize, min: f64) -> Result<Array1<f64>, DiscretizationError> {
    if bins == 0 {
        return Err(DiscretizationError::ZeroBins);
    }
    if !(max > min) {
        return Err(DiscretizationError::DegenerateCuts(format!(
            "largest duration {max} does not exceed the grid start {min}"
        )));
    }
    let mut cuts = Array1::linspace(min, max, bins + 1);
    // linspace can land a hair below the end point.
    cuts[bins] = max;
    Ok(cuts)
}

fn cuts_quantiles(
    durations: ArrayView1<'_, f64>,
    events: ArrayView1<'_, u32>,
    bins: usize,
    min: f64,
) -> Result<Array1<f64>, DiscretizationError> {
    if bins == 0 {
        return Err(DiscretizationError::ZeroBins);
    }
    let km = kaplan_meier(durations, events)?;
    if km.num_events == 0 {
        return Err(DiscretizationError::NoEvents);
    }

    let lowest = km.min_survival();
    let levels = Array1::linspace(lowest, 1.0, bins + 1);
    let survival = km.survival.to_vec();

    // The top level (S = 1) is the grid start itself.
    let mut cuts: Vec<f64> = levels
        .iter()
        .take(bins)
        .map(|&level| {
            let idx = survival.partition_point(|&s| s > level + LEVEL_TOLERANCE);
            km.times[idx.min(survival.len() - 1)]
        })
        .filter(|&t| t > min)
        .collect();
    cuts.push(min);
    cuts.sort_by(f64::total_cmp);
    let mut cuts: Vec<f64> = cuts.into_iter().dedup().collect();

    if cuts.len() < 2 {
        return Err(DiscretizationError::DegenerateCuts(format!(
            "quantile grid collapsed to {} distinct point(s)",
            cuts.len()
        )));
    }
    if cuts.len() != bins + 1 {
        log::warn!(
            "Quantile cuts are not unique; continuing with {} bins instead of {}",
            cuts.len() - 1,
            bins
        );
    }

    let largest = max_duration(durations);
    if let Some(last) = cuts.last_mut() {
        if *last < largest {
            *last = largest;
        }
    }
    Ok(Array1::from(cuts))
}
