use chrono::TimeDelta;

use crate::analyzers::types::{RollingPoint, RollingSeries};
use crate::config::Reducer;
use crate::observation::ObservationStore;
use crate::variable::Variable;

/// Trailing-window reduction of `variable` over the store.
///
/// The window for the observation at `t` is `(t - window_hours, t]` in elapsed
/// time, so a gapped series never stretches the window over extra rows.
/// Absent values are skipped; a window without any sample yields `None`, so a
/// zero-hour window produces an all-absent series.
pub fn roll(
    store: &ObservationStore,
    variable: Variable,
    window_hours: u32,
    reducer: Reducer,
) -> RollingSeries {
    RollingSeries {
        variable,
        window_hours,
        reducer,
        points: roll_with(store, variable, window_hours, |values| reducer.apply(values)),
    }
}

/// Like [`roll`] with a caller-supplied reduction. `reduce` only sees non-empty slices.
pub fn roll_with<F>(
    store: &ObservationStore,
    variable: Variable,
    window_hours: u32,
    reduce: F,
) -> Vec<RollingPoint>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let observations = store.observations();
    let span = TimeDelta::hours(i64::from(window_hours));

    let mut points = Vec::with_capacity(observations.len());
    let mut window = Vec::new();
    let mut start = 0;

    for (i, current) in observations.iter().enumerate() {
        let floor = current.timestamp - span;
        while start <= i && observations[start].timestamp <= floor {
            start += 1;
        }

        window.clear();
        window.extend(observations[start..=i].iter().filter_map(|o| o.value(variable)));

        let value = if window.is_empty() {
            None
        } else {
            reduce(&window)
        };

        points.push(RollingPoint {
            timestamp: current.timestamp,
            value,
            samples: window.len(),
        });
    }

    points
}
