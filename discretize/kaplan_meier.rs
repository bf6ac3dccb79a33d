use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use super::{DiscretizationError, check_inputs};

/// Product-limit survival estimate evaluated at the distinct observed durations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KaplanMeier {
    /// Distinct durations in ascending order.
    pub times: Array1<f64>,
    /// `S(t)` just after each entry of `times`; non-increasing.
    pub survival: Array1<f64>,
    pub num_events: usize,
}

impl KaplanMeier {
    #[inline]
    pub fn min_survival(&self) -> f64 {
        self.survival.iter().copied().fold(1.0, f64::min)
    }
}

/// Kaplan-Meier estimate from right-censored data. Any non-zero event code counts
/// as an event, so competing risks are pooled.
pub fn kaplan_meier(
    durations: ArrayView1<'_, f64>,
    events: ArrayView1<'_, u32>,
) -> Result<KaplanMeier, DiscretizationError> {
    check_inputs(durations, events)?;

    let mut order: Vec<usize> = (0..durations.len()).collect();
    order.sort_by(|&a, &b| durations[a].total_cmp(&durations[b]));

    let mut times = Vec::new();
    let mut survival = Vec::new();
    let mut at_risk = durations.len();
    let mut current = 1.0;
    let mut num_events = 0usize;

    let mut pos = 0usize;
    while pos < order.len() {
        let t = durations[order[pos]];
        let mut removed = 0usize;
        let mut deaths = 0usize;
        while pos < order.len() && durations[order[pos]] == t {
            if events[order[pos]] != 0 {
                deaths += 1;
            }
            removed += 1;
            pos += 1;
        }
        if deaths > 0 {
            current *= 1.0 - deaths as f64 / at_risk as f64;
        }
        num_events += deaths;
        times.push(t);
        survival.push(current);
        at_risk -= removed;
    }

    Ok(KaplanMeier {
        times: Array1::from(times),
        survival: Array1::from(survival),
        num_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn matches_hand_computed_curve() {
        let durations = array![3.0, 1.0, 2.0, 2.0, 4.0];
        let events = array![1, 1, 0, 1, 0];
        let km = kaplan_meier(durations.view(), events.view()).unwrap();
        assert_eq!(km.times, array![1.0, 2.0, 3.0, 4.0]);
        // 5 at risk at t=1, 4 at t=2 (one event), 2 at t=3.
        assert_abs_diff_eq!(km.survival[0], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(km.survival[1], 0.8 * 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(km.survival[2], 0.8 * 0.75 * 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(km.survival[3], km.survival[2], epsilon = 1e-12);
        assert_eq!(km.num_events, 3);
    }

    #[test]
    fn curve_reaches_zero_when_last_sample_is_an_event() {
        let km = kaplan_meier(array![1.0, 2.0].view(), array![1, 1].view()).unwrap();
        assert_abs_diff_eq!(km.survival[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(km.min_survival(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn competing_codes_are_pooled() {
        let km = kaplan_meier(array![1.0, 2.0].view(), array![2, 0].view()).unwrap();
        assert_abs_diff_eq!(km.survival[0], 0.5, epsilon = 1e-12);
        assert_eq!(km.num_events, 1);
    }
}
