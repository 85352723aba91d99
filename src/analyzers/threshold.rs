//! Guideline threshold evaluation.
//!
//! Every evaluation is a stateless scan: each qualifying entry yields its own
//! flag. There is no hysteresis or debounce, so a value oscillating around a
//! threshold is flagged on every sample that breaches it.

use crate::analyzers::types::{DailyBucket, ExceedanceFlag, Period, RollingSeries};
use crate::config::{Guideline, Statistic};
use crate::variable::Variable;

/// Flags every entry whose value breaches `guideline`. Absent values never flag.
pub fn evaluate<I>(variable: Variable, entries: I, guideline: &Guideline) -> Vec<ExceedanceFlag>
where
    I: IntoIterator<Item = (Period, Option<f64>)>,
{
    entries
        .into_iter()
        .filter_map(|(period, value)| {
            let observed = value?;
            guideline
                .comparator
                .exceeds(observed, guideline.value)
                .then(|| ExceedanceFlag {
                    variable,
                    period,
                    statistic: guideline.statistic,
                    observed,
                    threshold: guideline.value,
                    comparator: guideline.comparator,
                    label: guideline.label.clone(),
                })
        })
        .collect()
}

/// Hourly flags over a rolling series.
pub fn evaluate_rolling(series: &RollingSeries, guideline: &Guideline) -> Vec<ExceedanceFlag> {
    let entries = series
        .points
        .iter()
        .map(|p| (Period::Hour(p.timestamp), p.value));
    evaluate(series.variable, entries, guideline)
}

/// Daily flags for the statistic named by `guideline`.
pub fn evaluate_daily(
    buckets: &[DailyBucket],
    variable: Variable,
    guideline: &Guideline,
) -> Vec<ExceedanceFlag> {
    let entries = buckets
        .iter()
        .map(|b| (Period::Day(b.date), b.statistic(variable, guideline.statistic)));
    evaluate(variable, entries, guideline)
}

/// Routes a guideline to the hourly or daily evaluator.
pub fn evaluate_guideline(
    variable: Variable,
    guideline: &Guideline,
    series: Option<&RollingSeries>,
    buckets: &[DailyBucket],
) -> Vec<ExceedanceFlag> {
    match guideline.statistic {
        Statistic::Rolling => series
            .map(|s| evaluate_rolling(s, guideline))
            .unwrap_or_default(),
        _ => evaluate_daily(buckets, variable, guideline),
    }
}
