//! Pipeline configuration.
//!
//! [`RawConfig`] mirrors the JSON config file (every field optional) and is
//! validated into a [`PipelineConfig`] before any aggregation runs:
//!
//! ```json
//! {
//!   "latitude": -1.45,
//!   "longitude": 36.66,
//!   "timezone": "Africa/Nairobi",
//!   "variables": ["ozone", "pm2_5"],
//!   "rolling_windows": { "ozone": { "hours": 8, "reducer": "mean" } },
//!   "thresholds": {
//!     "pm2_5": [{ "statistic": "daily_mean", "value": 15.0, "comparator": ">", "label": "WHO daily mean" }]
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::variable::Variable;

pub const DEFAULT_LATITUDE: f64 = -1.45;
pub const DEFAULT_LONGITUDE: f64 = 36.66;
pub const DEFAULT_TIMEZONE: &str = "Africa/Nairobi";

/// Reduction applied over the samples of one rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Max,
    Min,
}

impl Reducer {
    /// Reduces a non-empty slice. Returns `None` for an empty one.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let reduced = match self {
            Reducer::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Reducer::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reducer::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        };
        Some(reduced)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reducer::Mean => "mean",
            Reducer::Max => "max",
            Reducer::Min => "min",
        }
    }
}

impl FromStr for Reducer {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "avg" | "average" => Ok(Reducer::Mean),
            "max" => Ok(Reducer::Max),
            "min" => Ok(Reducer::Min),
            _ => Err(ConfigurationError::InvalidReducer(s.to_string())),
        }
    }
}

/// How an observed value is compared against a guideline value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparator {
    #[default]
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl Comparator {
    /// `true` when `observed` breaches `threshold` under this comparator.
    pub fn exceeds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Comparator::Greater => observed > threshold,
            Comparator::GreaterOrEqual => observed >= threshold,
            Comparator::Less => observed < threshold,
            Comparator::LessOrEqual => observed <= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::Less => "<",
            Comparator::LessOrEqual => "<=",
        }
    }
}

impl FromStr for Comparator {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" => Ok(Comparator::Greater),
            ">=" | "ge" => Ok(Comparator::GreaterOrEqual),
            "<" | "lt" => Ok(Comparator::Less),
            "<=" | "le" => Ok(Comparator::LessOrEqual),
            _ => Err(ConfigurationError::InvalidComparator(s.to_string())),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// The derived value a guideline is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Statistic {
    /// Each hourly point of the rolling series.
    Rolling,
    DailyMean,
    DailyMax,
    /// Daily mean of the rolling series points.
    DailyRollingMean,
    DailyRollingMax,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Rolling => "rolling",
            Statistic::DailyMean => "daily_mean",
            Statistic::DailyMax => "daily_max",
            Statistic::DailyRollingMean => "daily_rolling_mean",
            Statistic::DailyRollingMax => "daily_rolling_max",
        }
    }

    pub fn is_daily(&self) -> bool {
        !matches!(self, Statistic::Rolling)
    }
}

impl FromStr for Statistic {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "rolling" => Ok(Statistic::Rolling),
            "daily_mean" => Ok(Statistic::DailyMean),
            "daily_max" => Ok(Statistic::DailyMax),
            "daily_rolling_mean" => Ok(Statistic::DailyRollingMean),
            "daily_rolling_max" => Ok(Statistic::DailyRollingMax),
            _ => Err(ConfigurationError::InvalidStatistic(s.to_string())),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trailing window length and reduction for one variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingWindow {
    pub hours: u32,
    pub reducer: Reducer,
    /// Optional completeness cutoff applied after rolling; `None` keeps every
    /// window with at least one sample.
    pub min_coverage: Option<f64>,
}

impl RollingWindow {
    pub fn new(hours: u32, reducer: Reducer) -> Self {
        Self {
            hours,
            reducer,
            min_coverage: None,
        }
    }
}

/// A guideline threshold, e.g. "WHO daily mean, PM2.5 > 15 µg/m³".
#[derive(Debug, Clone, PartialEq)]
pub struct Guideline {
    pub statistic: Statistic,
    pub value: f64,
    pub comparator: Comparator,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Validated configuration shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub location: Location,
    pub timezone: Tz,
    pub variables: BTreeSet<Variable>,
    pub rolling_windows: BTreeMap<Variable, RollingWindow>,
    pub thresholds: BTreeMap<Variable, Vec<Guideline>>,
}

impl PipelineConfig {
    /// Loads and validates a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        RawConfig::load(path)?.validate()
    }

    /// Re-checks the invariants [`RawConfig::validate`] establishes, for configs
    /// assembled or edited through the public fields.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        let Location {
            latitude,
            longitude,
        } = self.location;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(ConfigurationError::InvalidLocation {
                latitude,
                longitude,
            });
        }
        if self.variables.is_empty() {
            return Err(ConfigurationError::NoVariables);
        }

        for (variable, window) in &self.rolling_windows {
            if window.hours == 0 {
                return Err(ConfigurationError::InvalidWindow {
                    variable: variable.to_string(),
                    hours: 0,
                });
            }
            if let Some(value) = window.min_coverage {
                if !(value > 0.0 && value <= 1.0) {
                    return Err(ConfigurationError::InvalidCoverage {
                        variable: variable.to_string(),
                        value,
                    });
                }
            }
        }

        for (variable, guidelines) in &self.thresholds {
            if let Some(guideline) = guidelines.iter().find(|g| !g.value.is_finite()) {
                return Err(ConfigurationError::InvalidThreshold {
                    variable: variable.to_string(),
                    label: guideline.label.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn window(&self, variable: Variable) -> RollingWindow {
        self.rolling_windows
            .get(&variable)
            .copied()
            .unwrap_or_else(|| variable.default_window())
    }

    pub fn guidelines(&self, variable: Variable) -> &[Guideline] {
        self.thresholds
            .get(&variable)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let variables: BTreeSet<Variable> = [Variable::Ozone, Variable::Pm2_5].into();
        Self {
            location: Location {
                latitude: DEFAULT_LATITUDE,
                longitude: DEFAULT_LONGITUDE,
            },
            timezone: chrono_tz::Africa::Nairobi,
            rolling_windows: variables.iter().map(|v| (*v, v.default_window())).collect(),
            thresholds: variables
                .iter()
                .map(|v| (*v, v.default_guidelines()))
                .collect(),
            variables,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawWindow {
    pub hours: i64,
    pub reducer: Option<String>,
    pub min_coverage: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawGuideline {
    pub statistic: Option<String>,
    pub value: f64,
    pub comparator: Option<String>,
    pub label: Option<String>,
}

/// Unvalidated config as read from disk; CLI flags are layered onto it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub rolling_windows: BTreeMap<String, RawWindow>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<RawGuideline>>,
}

impl RawConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Io(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    /// Fails fast on the first problem found.
    ///
    /// Variables without an explicit window or threshold list get
    /// [`Variable::default_window`] and [`Variable::default_guidelines`].
    pub fn validate(self) -> Result<PipelineConfig, ConfigurationError> {
        let latitude = self.latitude.unwrap_or(DEFAULT_LATITUDE);
        let longitude = self.longitude.unwrap_or(DEFAULT_LONGITUDE);
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(ConfigurationError::InvalidLocation {
                latitude,
                longitude,
            });
        }

        let tz_name = self.timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE);
        let timezone: Tz = tz_name
            .parse()
            .map_err(|_| ConfigurationError::UnknownTimezone(tz_name.to_string()))?;

        let variables: BTreeSet<Variable> = match &self.variables {
            Some(names) => names
                .iter()
                .map(|n| n.parse())
                .collect::<Result<_, _>>()?,
            None => [Variable::Ozone, Variable::Pm2_5].into(),
        };
        if variables.is_empty() {
            return Err(ConfigurationError::NoVariables);
        }

        let mut rolling_windows = BTreeMap::new();
        for (name, raw) in &self.rolling_windows {
            let variable = requested(name, &variables)?;
            rolling_windows.insert(variable, raw.to_window(variable)?);
        }

        let mut thresholds = BTreeMap::new();
        for (name, raws) in &self.thresholds {
            let variable = requested(name, &variables)?;
            let guidelines = raws
                .iter()
                .map(|raw| raw.to_guideline(variable))
                .collect::<Result<Vec<_>, _>>()?;
            thresholds.insert(variable, guidelines);
        }

        for variable in &variables {
            rolling_windows
                .entry(*variable)
                .or_insert_with(|| variable.default_window());
            thresholds
                .entry(*variable)
                .or_insert_with(|| variable.default_guidelines());
        }

        let config = PipelineConfig {
            location: Location {
                latitude,
                longitude,
            },
            timezone,
            variables,
            rolling_windows,
            thresholds,
        };
        config.check()?;
        Ok(config)
    }
}

fn requested(name: &str, variables: &BTreeSet<Variable>) -> Result<Variable, ConfigurationError> {
    let variable: Variable = name.parse()?;
    if !variables.contains(&variable) {
        return Err(ConfigurationError::NotRequested(variable.to_string()));
    }
    Ok(variable)
}

impl RawWindow {
    fn to_window(&self, variable: Variable) -> Result<RollingWindow, ConfigurationError> {
        let hours = u32::try_from(self.hours)
            .ok()
            .filter(|h| *h > 0)
            .ok_or_else(|| ConfigurationError::InvalidWindow {
                variable: variable.to_string(),
                hours: self.hours,
            })?;

        let reducer = match &self.reducer {
            Some(name) => name.parse()?,
            None => variable.default_window().reducer,
        };

        if let Some(value) = self.min_coverage {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigurationError::InvalidCoverage {
                    variable: variable.to_string(),
                    value,
                });
            }
        }

        Ok(RollingWindow {
            hours,
            reducer,
            min_coverage: self.min_coverage,
        })
    }
}

impl RawGuideline {
    fn to_guideline(&self, variable: Variable) -> Result<Guideline, ConfigurationError> {
        let statistic = match &self.statistic {
            Some(name) => name.parse()?,
            None => Statistic::Rolling,
        };
        let comparator = match &self.comparator {
            Some(symbol) => symbol.parse()?,
            None => Comparator::default(),
        };
        let label = self.label.clone().unwrap_or_else(|| {
            format!("{variable} {statistic} {comparator} {}", self.value)
        });

        if !self.value.is_finite() {
            return Err(ConfigurationError::InvalidThreshold {
                variable: variable.to_string(),
                label,
            });
        }

        Ok(Guideline {
            statistic,
            value: self.value,
            comparator,
            label,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<PipelineConfig, ConfigurationError> {
        let raw: RawConfig = serde_json::from_str(json).unwrap();
        raw.validate()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("{}").unwrap();

        assert_eq!(config.timezone, chrono_tz::Africa::Nairobi);
        assert_eq!(config.location.latitude, DEFAULT_LATITUDE);
        assert_eq!(
            config.variables,
            BTreeSet::from([Variable::Ozone, Variable::Pm2_5])
        );
        assert_eq!(config.window(Variable::Ozone).hours, 8);
        assert_eq!(config.guidelines(Variable::Pm2_5)[0].value, 15.0);
    }

    #[test]
    fn test_default_matches_empty_raw_config() {
        let from_raw = RawConfig::default().validate().unwrap();
        let default = PipelineConfig::default();

        assert_eq!(from_raw.variables, default.variables);
        assert_eq!(from_raw.rolling_windows, default.rolling_windows);
        assert_eq!(from_raw.thresholds, default.thresholds);
    }

    #[test]
    fn test_explicit_windows_and_thresholds() {
        let config = parse(
            r#"{
                "timezone": "Europe/Berlin",
                "variables": ["nitrogen_dioxide"],
                "rolling_windows": {"nitrogen_dioxide": {"hours": 1, "reducer": "max", "min_coverage": 0.75}},
                "thresholds": {"nitrogen_dioxide": [{"statistic": "daily_max", "value": 25.0, "comparator": ">="}]}
            }"#,
        )
        .unwrap();

        let window = config.window(Variable::NitrogenDioxide);
        assert_eq!(window.hours, 1);
        assert_eq!(window.reducer, Reducer::Max);
        assert_eq!(window.min_coverage, Some(0.75));

        let guideline = &config.guidelines(Variable::NitrogenDioxide)[0];
        assert_eq!(guideline.statistic, Statistic::DailyMax);
        assert_eq!(guideline.comparator, Comparator::GreaterOrEqual);
        assert_eq!(guideline.label, "nitrogen_dioxide daily_max >= 25");
    }

    #[test]
    fn test_unknown_variable_fails() {
        let err = parse(r#"{"variables": ["ozone", "radon"]}"#).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownVariable("radon".to_string()));
    }

    #[test]
    fn test_non_positive_window_fails() {
        let err = parse(r#"{"rolling_windows": {"ozone": {"hours": 0}}}"#).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidWindow { hours: 0, .. }));

        let err = parse(r#"{"rolling_windows": {"ozone": {"hours": -8}}}"#).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidWindow { hours: -8, .. }));
    }

    #[test]
    fn test_check_catches_edited_fields() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.check(), Ok(()));

        config
            .rolling_windows
            .insert(Variable::Ozone, RollingWindow::new(0, Reducer::Mean));
        assert_eq!(
            config.check(),
            Err(ConfigurationError::InvalidWindow {
                variable: "ozone".to_string(),
                hours: 0,
            })
        );

        let mut config = PipelineConfig::default();
        config.rolling_windows.insert(
            Variable::Pm2_5,
            RollingWindow {
                min_coverage: Some(1.5),
                ..Variable::Pm2_5.default_window()
            },
        );
        assert!(matches!(
            config.check(),
            Err(ConfigurationError::InvalidCoverage { .. })
        ));

        let mut config = PipelineConfig::default();
        config.thresholds.get_mut(&Variable::Pm2_5).unwrap()[0].value = f64::NAN;
        assert!(matches!(
            config.check(),
            Err(ConfigurationError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_malformed_comparator_fails() {
        let err = parse(r#"{"thresholds": {"ozone": [{"value": 100.0, "comparator": "=>"}]}}"#)
            .unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidComparator("=>".to_string()));
    }

    #[test]
    fn test_unknown_timezone_fails() {
        let err = parse(r#"{"timezone": "Mars/Olympus"}"#).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownTimezone("Mars/Olympus".to_string())
        );
    }

    #[test]
    fn test_window_for_unrequested_variable_fails() {
        let err = parse(r#"{"rolling_windows": {"pm10": {"hours": 24}}}"#).unwrap_err();
        assert_eq!(err, ConfigurationError::NotRequested("pm10".to_string()));
    }

    #[test]
    fn test_empty_variable_set_fails() {
        assert_eq!(
            parse(r#"{"variables": []}"#).unwrap_err(),
            ConfigurationError::NoVariables
        );
    }

    #[test]
    fn test_coverage_out_of_range_fails() {
        let err = parse(r#"{"rolling_windows": {"ozone": {"hours": 8, "min_coverage": 1.5}}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidCoverage { .. }));
    }

    #[test]
    fn test_comparator_directions() {
        assert!(Comparator::Greater.exceeds(20.0, 15.0));
        assert!(!Comparator::Greater.exceeds(15.0, 15.0));
        assert!(Comparator::GreaterOrEqual.exceeds(15.0, 15.0));
        assert!(Comparator::Less.exceeds(10.0, 15.0));
        assert!(!Comparator::LessOrEqual.exceeds(15.1, 15.0));
    }

    #[test]
    fn test_reducers() {
        let values = [3.0, 1.0, 2.0];
        assert_eq!(Reducer::Mean.apply(&values), Some(2.0));
        assert_eq!(Reducer::Max.apply(&values), Some(3.0));
        assert_eq!(Reducer::Min.apply(&values), Some(1.0));
        assert_eq!(Reducer::Mean.apply(&[]), None);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = PipelineConfig::load("/nonexistent/air_quality.json").unwrap_err();
        assert!(matches!(err, ConfigurationError::Io(_)));
    }
}
