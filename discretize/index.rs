use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

use super::cuts::validate_cuts;
use super::{DiscretizationError, check_inputs};

/// What happens to an event observed after the last cut point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the event and place it in the last bin.
    #[default]
    KeepEvent,
    /// Treat the sample as censored in the last bin.
    CensorAtHorizon,
}

/// Maps `(duration, event)` pairs onto the bins of a fixed grid when censoring
/// times are unknown beyond their observed value.
///
/// Bin `i` is `[cuts[i], cuts[i + 1])`. Censorings are rounded down (the bin whose
/// left edge is at or below the duration) and events are rounded up (the bin whose
/// right edge is at or above it), so the same raw time may land in different bins
/// depending on whether the sample is censored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredGrid")]
pub struct IndexDiscretizer {
    cuts: Vec<f64>,
    overflow: OverflowPolicy,
}

/// Serialized form of [`IndexDiscretizer`]; loading goes through the same checks
/// as [`IndexDiscretizer::new`].
#[derive(Deserialize)]
struct StoredGrid {
    cuts: Vec<f64>,
    #[serde(default)]
    overflow: OverflowPolicy,
}

impl TryFrom<StoredGrid> for IndexDiscretizer {
    type Error = DiscretizationError;

    fn try_from(stored: StoredGrid) -> Result<Self, Self::Error> {
        Ok(IndexDiscretizer::new(Array1::from(stored.cuts))?.with_overflow_policy(stored.overflow))
    }
}

impl IndexDiscretizer {
    pub fn new(cuts: Array1<f64>) -> Result<Self, DiscretizationError> {
        validate_cuts(cuts.view())?;
        Ok(Self {
            cuts: cuts.to_vec(),
            overflow: OverflowPolicy::default(),
        })
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    #[inline]
    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    #[inline]
    pub fn cuts(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(&self.cuts[..])
    }

    /// Number of bins `K`, i.e. the width the model output must have.
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.cuts.len() - 1
    }

    /// `(left, right)` edges of bin `idx`.
    pub fn bin_edges(&self, idx: usize) -> Option<(f64, f64)> {
        if idx < self.num_bins() {
            Some((self.cuts[idx], self.cuts[idx + 1]))
        } else {
            None
        }
    }

    /// Time attached to each output column: the right edge of the bin, which is
    /// where events inside the bin were rounded to.
    pub fn duration_index(&self) -> Array1<f64> {
        Array1::from(self.cuts[1..].to_vec())
    }

    /// Bin and adjusted event code for a single sample.
    pub fn assign(&self, duration: f64, event: u32) -> (usize, u32) {
        let last = self.num_bins() - 1;
        if event == 0 {
            let upto = self.cuts.partition_point(|&cut| cut <= duration);
            return (upto.saturating_sub(1).min(last), 0);
        }
        let below = self.cuts.partition_point(|&cut| cut < duration);
        if below > last + 1 {
            return match self.overflow {
                OverflowPolicy::KeepEvent => (last, event),
                OverflowPolicy::CensorAtHorizon => (last, 0),
            };
        }
        (below.saturating_sub(1), event)
    }

    #[inline]
    fn overflows(&self, duration: f64, event: u32) -> bool {
        event != 0 && duration > self.cuts[self.cuts.len() - 1]
    }

    /// Discretizes a batch, returning `(idx_durations, events)`.
    pub fn transform(
        &self,
        durations: ArrayView1<'_, f64>,
        events: ArrayView1<'_, u32>,
    ) -> Result<(Array1<usize>, Array1<u32>), DiscretizationError> {
        check_inputs(durations, events)?;
        let n = durations.len();
        let mut idx_durations = Array1::<usize>::zeros(n);
        let mut adjusted = Array1::<u32>::zeros(n);

        Zip::from(&mut idx_durations)
            .and(&mut adjusted)
            .and(durations)
            .and(events)
            .par_for_each(|idx, event_out, &duration, &event| {
                let (bin, code) = self.assign(duration, event);
                *idx = bin;
                *event_out = code;
            });

        let overflowing = durations
            .iter()
            .zip(events.iter())
            .filter(|&(&duration, &event)| self.overflows(duration, event))
            .count();
        if overflowing > 0 {
            log::debug!(
                "{} event(s) fall beyond the last cut {}; policy {:?}",
                overflowing,
                self.cuts[self.cuts.len() - 1],
                self.overflow
            );
        }

        Ok((idx_durations, adjusted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn grid() -> IndexDiscretizer {
        IndexDiscretizer::new(array![0.0, 1.0, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn censorings_round_down_events_round_up() {
        let disc = grid();
        assert_eq!(disc.assign(1.5, 0), (1, 0));
        assert_eq!(disc.assign(1.5, 1), (1, 1));
        assert_eq!(disc.assign(1.0, 0), (1, 0));
        assert_eq!(disc.assign(1.0, 1), (0, 1));
        assert_eq!(disc.assign(0.0, 1), (0, 1));
        assert_eq!(disc.assign(0.0, 0), (0, 0));
    }

    #[test]
    fn last_cut_and_overflow() {
        let disc = grid();
        assert_eq!(disc.assign(3.0, 0), (2, 0));
        assert_eq!(disc.assign(3.0, 2), (2, 2));
        assert_eq!(disc.assign(7.5, 0), (2, 0));
        assert_eq!(disc.assign(7.5, 2), (2, 2));

        let censoring = grid().with_overflow_policy(OverflowPolicy::CensorAtHorizon);
        assert_eq!(censoring.assign(7.5, 2), (2, 0));
        assert_eq!(censoring.assign(3.0, 2), (2, 2));
    }

    #[test]
    fn durations_below_grid_clamp_to_first_bin() {
        let disc = IndexDiscretizer::new(array![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(disc.assign(0.5, 0), (0, 0));
        assert_eq!(disc.assign(0.5, 1), (0, 1));
    }

    #[test]
    fn batch_transform_keeps_event_types() {
        let disc = grid();
        let (idx, events) = disc
            .transform(array![0.5, 2.5, 2.5, 9.0].view(), array![3, 0, 1, 0].view())
            .unwrap();
        assert_eq!(idx, array![0, 2, 2, 2]);
        assert_eq!(events, array![3, 0, 1, 0]);
    }

    #[test]
    fn edges_and_duration_index() {
        let disc = grid();
        assert_eq!(disc.num_bins(), 3);
        assert_eq!(disc.bin_edges(1), Some((1.0, 2.0)));
        assert_eq!(disc.bin_edges(3), None);
        assert_eq!(disc.duration_index(), array![1.0, 2.0, 3.0]);
    }

    #[test]
    fn stored_grids_are_validated_on_load() {
        let disc = grid().with_overflow_policy(OverflowPolicy::CensorAtHorizon);
        let json = serde_json::to_string(&disc).unwrap();
        let restored: IndexDiscretizer = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, disc);

        for bad in [
            r#"{"cuts":[1.0]}"#,
            r#"{"cuts":[]}"#,
            r#"{"cuts":[3.0,1.0,2.0]}"#,
        ] {
            assert!(serde_json::from_str::<IndexDiscretizer>(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn negative_durations_are_rejected() {
        assert!(matches!(
            grid().transform(array![1.0, -0.5].view(), array![1, 0].view()),
            Err(DiscretizationError::NegativeDuration(v)) if v == -0.5
        ));
    }

    #[test]
    fn transform_validates_lengths() {
        let disc = grid();
        assert!(matches!(
            disc.transform(array![1.0, 2.0].view(), array![1].view()),
            Err(DiscretizationError::LengthMismatch { .. })
        ));
    }
}
