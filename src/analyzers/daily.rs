use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::analyzers::types::{DailyBucket, DailySummary, RollingSeries, SummaryStats};
use crate::observation::ObservationStore;
use crate::variable::Variable;

/// Groups observations by their calendar date in `timezone`, ascending.
///
/// Each bucket carries raw statistics for every requested variable and, when a
/// rolling series is supplied for it, the same statistics over the rolled
/// points of that day (e.g. the daily mean of 8-hour means). Days without any
/// observation produce no bucket.
pub fn bucket_by_day(
    store: &ObservationStore,
    timezone: Tz,
    variables: &BTreeSet<Variable>,
    rolled: &BTreeMap<Variable, RollingSeries>,
) -> Vec<DailyBucket> {
    let local = store.localize(timezone);

    let mut days: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (i, obs) in local.observations().iter().enumerate() {
        days.entry(local.local_date(obs.timestamp)).or_default().push(i);
    }

    let rolled_by_day: BTreeMap<Variable, BTreeMap<NaiveDate, Vec<f64>>> = rolled
        .iter()
        .filter(|(variable, _)| variables.contains(*variable))
        .map(|(variable, series)| (*variable, rolled_values_by_day(&local, series)))
        .collect();

    days.into_iter()
        .map(|(date, indices)| {
            let summaries = variables
                .iter()
                .map(|variable| {
                    let raw: Vec<f64> = indices
                        .iter()
                        .filter_map(|i| local.observations()[*i].value(*variable))
                        .collect();

                    let rolling = rolled_by_day.get(variable).map(|by_day| {
                        by_day
                            .get(&date)
                            .map(|values| SummaryStats::from_values(values))
                            .unwrap_or_default()
                    });

                    let summary = DailySummary {
                        raw: SummaryStats::from_values(&raw),
                        rolling,
                    };
                    (*variable, summary)
                })
                .collect();

            DailyBucket {
                date,
                observations: indices.len(),
                variables: summaries,
            }
        })
        .collect()
}

fn rolled_values_by_day(
    local: &ObservationStore,
    series: &RollingSeries,
) -> BTreeMap<NaiveDate, Vec<f64>> {
    let mut by_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for point in &series.points {
        if let Some(value) = point.value {
            by_day
                .entry(local.local_date(point.timestamp))
                .or_default()
                .push(value);
        }
    }
    by_day
}
