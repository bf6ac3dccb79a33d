use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use super::{DiscreteLabels, FitState, TransformError};
use crate::discretize::{CutSpec, IndexDiscretizer, OverflowPolicy, make_cuts};

/// Discretizes continuous `(duration, event)` pairs onto a grid of cut points.
///
/// The grid is either learned from the training data on [`fit`](Self::fit) or
/// supplied up front through [`CutSpec::Explicit`], in which case the transform is
/// usable immediately and `fit` leaves it untouched. Censorings move to the left
/// cut point of their bin and events to the right one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteLabelTransform {
    spec: CutSpec,
    min: f64,
    #[serde(default)]
    overflow: OverflowPolicy,
    #[serde(default)]
    state: FitState<IndexDiscretizer>,
}

impl DiscreteLabelTransform {
    /// `min` is the start of a learned grid (usually `0.0`).
    pub fn new(spec: CutSpec, min: f64) -> Result<Self, TransformError> {
        let state = match &spec {
            CutSpec::Explicit(values) => {
                FitState::Fitted(IndexDiscretizer::new(Array1::from(values.clone()))?)
            }
            CutSpec::Equidistant(_) | CutSpec::Quantile(_) => FitState::Unfit,
        };
        Ok(Self {
            spec,
            min,
            overflow: OverflowPolicy::default(),
            state,
        })
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self.state = match std::mem::take(&mut self.state) {
            FitState::Fitted(disc) => FitState::Fitted(disc.with_overflow_policy(policy)),
            FitState::Unfit => FitState::Unfit,
        };
        self
    }

    #[inline]
    pub fn spec(&self) -> &CutSpec {
        &self.spec
    }

    #[inline]
    pub fn is_fitted(&self) -> bool {
        self.state.is_fitted()
    }

    pub fn fit(
        &mut self,
        durations: ArrayView1<'_, f64>,
        events: ArrayView1<'_, u32>,
    ) -> Result<&mut Self, TransformError> {
        if self.spec.is_predefined() {
            log::warn!("fit called with predefined cut points; leaving the grid unchanged");
            return Ok(self);
        }
        let cuts = make_cuts(&self.spec, durations, events, self.min)?;
        log::info!(
            "Fitted {} duration bins over [{}, {}]",
            cuts.len() - 1,
            cuts[0],
            cuts[cuts.len() - 1]
        );
        log::debug!("Cut points: {:?}", cuts.as_slice());
        let disc = IndexDiscretizer::new(cuts)?.with_overflow_policy(self.overflow);
        self.state = FitState::Fitted(disc);
        Ok(self)
    }

    pub fn fit_transform(
        &mut self,
        durations: ArrayView1<'_, f64>,
        events: ArrayView1<'_, u32>,
    ) -> Result<DiscreteLabels, TransformError> {
        self.fit(durations, events)?;
        self.transform(durations, events)
    }

    pub fn transform(
        &self,
        durations: ArrayView1<'_, f64>,
        events: ArrayView1<'_, u32>,
    ) -> Result<DiscreteLabels, TransformError> {
        let disc = self.state.fitted("transform")?;
        let (idx_durations, events) = disc.transform(durations, events)?;
        Ok(DiscreteLabels {
            idx_durations,
            events,
        })
    }

    pub fn cuts(&self) -> Result<ArrayView1<'_, f64>, TransformError> {
        Ok(self.state.fitted("cuts")?.cuts())
    }

    /// Output width a network needs for these labels.
    pub fn out_features(&self) -> Result<usize, TransformError> {
        Ok(self.state.fitted("out_features")?.num_bins())
    }

    /// Original-time coordinate of every output column.
    pub fn duration_index(&self) -> Result<Array1<f64>, TransformError> {
        Ok(self.state.fitted("duration_index")?.duration_index())
    }

    pub fn discretizer(&self) -> Result<&IndexDiscretizer, TransformError> {
        self.state.fitted("discretizer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretize::DiscretizationError;
    use ndarray::array;

    #[test]
    fn transform_before_fit_is_a_state_error() {
        let labtrans = DiscreteLabelTransform::new(CutSpec::Equidistant(4), 0.0).unwrap();
        let err = labtrans
            .transform(array![1.0].view(), array![1].view())
            .unwrap_err();
        assert!(matches!(err, TransformError::NotFitted("transform")));
        assert!(matches!(
            labtrans.out_features(),
            Err(TransformError::NotFitted(_))
        ));
    }

    #[test]
    fn predefined_cuts_skip_fit() {
        let mut labtrans =
            DiscreteLabelTransform::new(CutSpec::Explicit(vec![0.0, 5.0, 10.0]), 0.0).unwrap();
        assert!(labtrans.is_fitted());
        labtrans
            .fit(array![100.0, 200.0].view(), array![1, 1].view())
            .unwrap();
        assert_eq!(labtrans.cuts().unwrap(), array![0.0, 5.0, 10.0]);
        let labels = labtrans
            .transform(array![4.0, 6.0].view(), array![1, 0].view())
            .unwrap();
        assert_eq!(labels.idx_durations, array![0, 1]);
    }

    #[test]
    fn invalid_predefined_cuts_fail_at_construction() {
        let err = DiscreteLabelTransform::new(CutSpec::Explicit(vec![2.0, 1.0]), 0.0).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Discretization(DiscretizationError::InvalidCuts { position: 1 })
        ));
    }

    #[test]
    fn overflow_policy_reaches_fitted_grid() {
        let mut labtrans = DiscreteLabelTransform::new(CutSpec::Equidistant(2), 0.0)
            .unwrap()
            .with_overflow_policy(OverflowPolicy::CensorAtHorizon);
        labtrans
            .fit(array![1.0, 2.0].view(), array![1, 1].view())
            .unwrap();
        let labels = labtrans
            .transform(array![5.0].view(), array![1].view())
            .unwrap();
        assert_eq!(labels.idx_durations, array![1]);
        assert_eq!(labels.events, array![0]);
        assert_eq!(labels.event_indicator(), array![0.0]);
    }
}
