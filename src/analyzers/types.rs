//! Data types produced by the aggregation pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::{Comparator, Reducer, Statistic};
use crate::variable::Variable;

/// One entry of a [`RollingSeries`], aligned with an observation timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingPoint {
    pub timestamp: DateTime<Utc>,
    /// `None` when no sample of the variable falls inside the window.
    pub value: Option<f64>,
    /// Number of present samples that contributed to `value`.
    pub samples: usize,
}

impl RollingPoint {
    /// Share of the window's nominal hours that held a sample, capped at 1.0.
    pub fn coverage(&self, window_hours: u32) -> f64 {
        if window_hours == 0 {
            return 0.0;
        }
        (self.samples as f64 / window_hours as f64).min(1.0)
    }
}

/// Trailing-window reduction of one variable, index-aligned with its store.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingSeries {
    pub variable: Variable,
    pub window_hours: u32,
    pub reducer: Reducer,
    pub points: Vec<RollingPoint>,
}

impl RollingSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn value_at(&self, timestamp: DateTime<Utc>) -> Option<f64> {
        self.points
            .binary_search_by_key(&timestamp, |p| p.timestamp)
            .ok()
            .and_then(|i| self.points[i].value)
    }

    /// A copy where windows below `min_coverage` are treated as absent.
    pub fn masked(&self, min_coverage: f64) -> RollingSeries {
        let points = self
            .points
            .iter()
            .map(|p| {
                if p.coverage(self.window_hours) < min_coverage {
                    RollingPoint { value: None, ..*p }
                } else {
                    *p
                }
            })
            .collect();

        RollingSeries {
            variable: self.variable,
            window_hours: self.window_hours,
            reducer: self.reducer,
            points,
        }
    }
}

/// Count, mean, min and max over the present values of one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SummaryStats {
    pub samples: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl SummaryStats {
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            samples: values.len(),
            mean: Reducer::Mean.apply(values),
            min: Reducer::Min.apply(values),
            max: Reducer::Max.apply(values),
        }
    }
}

/// Raw and rolled statistics for one variable on one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DailySummary {
    pub raw: SummaryStats,
    /// `None` when no rolling series was computed for the variable.
    pub rolling: Option<SummaryStats>,
}

/// All observations whose local calendar date is `date`.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub observations: usize,
    pub variables: BTreeMap<Variable, DailySummary>,
}

impl DailyBucket {
    /// The daily value a guideline statistic refers to. `None` for [`Statistic::Rolling`].
    pub fn statistic(&self, variable: Variable, statistic: Statistic) -> Option<f64> {
        let summary = self.variables.get(&variable)?;
        match statistic {
            Statistic::Rolling => None,
            Statistic::DailyMean => summary.raw.mean,
            Statistic::DailyMax => summary.raw.max,
            Statistic::DailyRollingMean => summary.rolling.and_then(|r| r.mean),
            Statistic::DailyRollingMax => summary.rolling.and_then(|r| r.max),
        }
    }
}

/// The span an exceedance refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Period {
    Hour(DateTime<Utc>),
    Day(NaiveDate),
}

/// A value that breached a guideline.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceedanceFlag {
    pub variable: Variable,
    pub period: Period,
    pub statistic: Statistic,
    pub observed: f64,
    pub threshold: f64,
    pub comparator: Comparator,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(h: u32, value: Option<f64>, samples: usize) -> RollingPoint {
        RollingPoint {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap(),
            value,
            samples,
        }
    }

    #[test]
    fn test_coverage() {
        assert_eq!(point(0, Some(1.0), 6).coverage(8), 0.75);
        assert_eq!(point(0, Some(1.0), 10).coverage(8), 1.0);
        assert_eq!(point(0, None, 0).coverage(8), 0.0);
    }

    #[test]
    fn test_masked_drops_under_covered_points() {
        let series = RollingSeries {
            variable: Variable::Ozone,
            window_hours: 8,
            reducer: Reducer::Mean,
            points: vec![point(0, Some(1.0), 1), point(1, Some(2.0), 6)],
        };

        let masked = series.masked(0.75);
        assert_eq!(masked.points[0].value, None);
        assert_eq!(masked.points[0].samples, 1);
        assert_eq!(masked.points[1].value, Some(2.0));
        assert_eq!(masked.window_hours, 8);
        assert_eq!(series.points[0].value, Some(1.0));
    }

    #[test]
    fn test_summary_of_empty_day() {
        let stats = SummaryStats::from_values(&[]);
        assert_eq!(stats.samples, 0);
        assert_eq!(stats.mean, None);
        assert_eq!(stats.max, None);
    }

    #[test]
    fn test_bucket_statistic_lookup() {
        let mut variables = BTreeMap::new();
        variables.insert(
            Variable::NitrogenDioxide,
            DailySummary {
                raw: SummaryStats::from_values(&[10.0, 30.0]),
                rolling: Some(SummaryStats::from_values(&[40.0, 50.0])),
            },
        );
        let bucket = DailyBucket {
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            observations: 2,
            variables,
        };

        let no2 = Variable::NitrogenDioxide;
        assert_eq!(bucket.statistic(no2, Statistic::DailyMean), Some(20.0));
        assert_eq!(bucket.statistic(no2, Statistic::DailyMax), Some(30.0));
        assert_eq!(bucket.statistic(no2, Statistic::DailyRollingMean), Some(45.0));
        assert_eq!(bucket.statistic(no2, Statistic::DailyRollingMax), Some(50.0));
        assert_eq!(bucket.statistic(no2, Statistic::Rolling), None);
        assert_eq!(bucket.statistic(Variable::Ozone, Statistic::DailyMean), None);
    }
}
