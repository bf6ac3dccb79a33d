use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use super::{FitState, TransformError};

/// Standardization of (optionally log-transformed) durations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationScaler {
    pub mean: f64,
    /// Population standard deviation, or `1.0` when scaling is disabled or the
    /// training durations are constant.
    pub scale: f64,
}

impl DurationScaler {
    fn fit(values: &Array1<f64>, with_mean: bool, with_std: bool) -> Self {
        let n = values.len() as f64;
        let mean = values.sum() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let std = variance.sqrt();
        Self {
            mean: if with_mean { mean } else { 0.0 },
            scale: if with_std && std > 0.0 { std } else { 1.0 },
        }
    }

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        // Adding zero folds -0.0 into +0.0 so lookups by bit pattern agree.
        (value - self.mean) / self.scale + 0.0
    }
}

/// Exact lookup from a transformed training duration back to its original value.
///
/// Only values produced from the training data resolve; the map is a point lookup,
/// not an inverse function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverseDurationMap {
    /// `(scaled, original)` pairs sorted by the scaled value, keys unique.
    pairs: Vec<(f64, f64)>,
}

impl InverseDurationMap {
    fn from_pairs(mut pairs: Vec<(f64, f64)>) -> Self {
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        pairs.dedup_by(|a, b| a.0.total_cmp(&b.0).is_eq());
        Self { pairs }
    }

    pub fn get(&self, scaled: f64) -> Option<f64> {
        let key = scaled + 0.0;
        self.pairs
            .binary_search_by(|(stored, _)| stored.total_cmp(&key))
            .ok()
            .map(|pos| self.pairs[pos].1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoxTimeParams {
    pub scaler: DurationScaler,
    pub inverse: InverseDurationMap,
}

/// Continuous-time label transform for Cox-Time style models: durations are
/// optionally `log1p`-transformed and then standardized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoxTimeLabelTransform {
    log_duration: bool,
    with_mean: bool,
    with_std: bool,
    #[serde(default)]
    state: FitState<CoxTimeParams>,
}

impl Default for CoxTimeLabelTransform {
    fn default() -> Self {
        Self::new(false, true, true)
    }
}

impl CoxTimeLabelTransform {
    pub fn new(log_duration: bool, with_mean: bool, with_std: bool) -> Self {
        Self {
            log_duration,
            with_mean,
            with_std,
            state: FitState::Unfit,
        }
    }

    #[inline]
    pub fn is_fitted(&self) -> bool {
        self.state.is_fitted()
    }

    pub fn fit(
        &mut self,
        durations: ArrayView1<'_, f64>,
        events: ArrayView1<'_, f64>,
    ) -> Result<&mut Self, TransformError> {
        self.fit_transform(durations, events)?;
        Ok(self)
    }

    pub fn fit_transform(
        &mut self,
        durations: ArrayView1<'_, f64>,
        events: ArrayView1<'_, f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), TransformError> {
        check_inputs(durations, events)?;
        let raw = self.pre_scale(durations);
        let scaler = DurationScaler::fit(&raw, self.with_mean, self.with_std);
        let scaled = raw.mapv(|value| scaler.apply(value));

        let inverse = InverseDurationMap::from_pairs(
            scaled
                .iter()
                .copied()
                .zip(durations.iter().copied())
                .collect(),
        );
        log::info!(
            "Fitted duration scaler (mean={}, scale={}) with {} distinct training durations",
            scaler.mean,
            scaler.scale,
            inverse.len()
        );
        self.state = FitState::Fitted(CoxTimeParams { scaler, inverse });
        Ok((scaled, events.to_owned()))
    }

    pub fn transform(
        &self,
        durations: ArrayView1<'_, f64>,
        events: ArrayView1<'_, f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), TransformError> {
        let params = self.state.fitted("transform")?;
        check_inputs(durations, events)?;
        let scaled = self
            .pre_scale(durations)
            .mapv(|value| params.scaler.apply(value));
        Ok((scaled, events.to_owned()))
    }

    /// Maps transformed training durations back to their original values, e.g. to
    /// index survival predictions in original time units.
    pub fn map_scaled_to_orig(
        &self,
        scaled: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, TransformError> {
        let params = self.state.fitted("map_scaled_to_orig")?;
        scaled
            .iter()
            .map(|&value| {
                params
                    .inverse
                    .get(value)
                    .ok_or(TransformError::UnseenScaledDuration(value))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Array1::from)
    }

    /// Non-failing single-value form of [`map_scaled_to_orig`](Self::map_scaled_to_orig).
    pub fn lookup_orig(&self, scaled: f64) -> Result<Option<f64>, TransformError> {
        Ok(self.state.fitted("lookup_orig")?.inverse.get(scaled))
    }

    pub fn scaler(&self) -> Result<&DurationScaler, TransformError> {
        Ok(&self.state.fitted("scaler")?.scaler)
    }

    fn pre_scale(&self, durations: ArrayView1<'_, f64>) -> Array1<f64> {
        if self.log_duration {
            durations.mapv(f64::ln_1p)
        } else {
            durations.to_owned()
        }
    }
}

fn check_inputs(
    durations: ArrayView1<'_, f64>,
    events: ArrayView1<'_, f64>,
) -> Result<(), TransformError> {
    if durations.is_empty() {
        return Err(TransformError::EmptyDurations);
    }
    if durations.len() != events.len() {
        return Err(TransformError::LengthMismatch {
            durations: durations.len(),
            events: events.len(),
        });
    }
    match durations
        .iter()
        .find(|value| !value.is_finite() || **value < 0.0)
    {
        Some(&bad) => Err(TransformError::InvalidDuration(bad)),
        None => Ok(()),
    }
}
