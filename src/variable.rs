//! Air-quality variables reported by the provider and their guideline defaults.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::config::{Comparator, Guideline, Reducer, RollingWindow, Statistic};
use crate::error::ConfigurationError;

/// Concentration unit shared by every supported variable.
pub const UNIT: &str = "µg/m³";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Variable {
    #[serde(rename = "ozone")]
    Ozone,
    #[serde(rename = "pm2_5")]
    Pm2_5,
    #[serde(rename = "pm10")]
    Pm10,
    #[serde(rename = "nitrogen_dioxide")]
    NitrogenDioxide,
    #[serde(rename = "sulphur_dioxide")]
    SulphurDioxide,
    #[serde(rename = "carbon_monoxide")]
    CarbonMonoxide,
}

impl Variable {
    pub const ALL: [Variable; 6] = [
        Variable::Ozone,
        Variable::Pm2_5,
        Variable::Pm10,
        Variable::NitrogenDioxide,
        Variable::SulphurDioxide,
        Variable::CarbonMonoxide,
    ];

    /// Provider column name, also used in config files and output tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            Variable::Ozone => "ozone",
            Variable::Pm2_5 => "pm2_5",
            Variable::Pm10 => "pm10",
            Variable::NitrogenDioxide => "nitrogen_dioxide",
            Variable::SulphurDioxide => "sulphur_dioxide",
            Variable::CarbonMonoxide => "carbon_monoxide",
        }
    }

    pub fn unit(&self) -> &'static str {
        UNIT
    }

    /// Regulatory averaging period used when the config names none.
    ///
    /// | Variable          | Window | Reducer |
    /// |-------------------|--------|---------|
    /// | ozone             | 8 h    | mean    |
    /// | carbon_monoxide   | 8 h    | mean    |
    /// | nitrogen_dioxide  | 24 h   | max     |
    /// | pm2_5, pm10, SO2  | 24 h   | mean    |
    pub fn default_window(&self) -> RollingWindow {
        match self {
            Variable::Ozone | Variable::CarbonMonoxide => RollingWindow::new(8, Reducer::Mean),
            Variable::NitrogenDioxide => RollingWindow::new(24, Reducer::Max),
            Variable::Pm2_5 | Variable::Pm10 | Variable::SulphurDioxide => {
                RollingWindow::new(24, Reducer::Mean)
            }
        }
    }

    /// Guideline thresholds used when the config names none.
    pub fn default_guidelines(&self) -> Vec<Guideline> {
        let gt = |statistic, value, label: &str| Guideline {
            statistic,
            value,
            comparator: Comparator::Greater,
            label: label.to_string(),
        };

        match self {
            Variable::Ozone => vec![gt(Statistic::Rolling, 100.0, "WHO 8-hr mean")],
            Variable::Pm2_5 => vec![gt(Statistic::DailyMean, 15.0, "WHO daily mean")],
            Variable::Pm10 => vec![gt(Statistic::DailyMean, 45.0, "WHO daily mean")],
            Variable::NitrogenDioxide => vec![
                gt(Statistic::DailyMax, 20.0, "NO2 daily max"),
                gt(
                    Statistic::DailyRollingMean,
                    40.0,
                    "NO2 24-hr rolling max, daily mean",
                ),
            ],
            Variable::SulphurDioxide => vec![gt(Statistic::DailyMean, 40.0, "WHO daily mean")],
            Variable::CarbonMonoxide => vec![gt(Statistic::DailyMean, 4000.0, "WHO daily mean")],
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variable {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variable::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim())
            .ok_or_else(|| ConfigurationError::UnknownVariable(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_names() {
        assert_eq!("ozone".parse::<Variable>(), Ok(Variable::Ozone));
        assert_eq!("pm2_5".parse::<Variable>(), Ok(Variable::Pm2_5));
        assert_eq!(
            "nitrogen_dioxide".parse::<Variable>(),
            Ok(Variable::NitrogenDioxide)
        );
    }

    #[test]
    fn test_parse_unknown_name() {
        assert_eq!(
            "benzene".parse::<Variable>(),
            Err(ConfigurationError::UnknownVariable("benzene".to_string()))
        );
    }

    #[test]
    fn test_names_round_trip_for_all_variables() {
        for v in Variable::ALL {
            assert_eq!(v.as_str().parse::<Variable>(), Ok(v));
            assert_eq!(v.unit(), UNIT);
        }
    }

    #[test]
    fn test_default_windows() {
        assert_eq!(Variable::Ozone.default_window().hours, 8);
        assert_eq!(Variable::Ozone.default_window().reducer, Reducer::Mean);
        assert_eq!(Variable::NitrogenDioxide.default_window().hours, 24);
        assert_eq!(Variable::NitrogenDioxide.default_window().reducer, Reducer::Max);
    }

    #[test]
    fn test_default_pm25_guideline() {
        let guidelines = Variable::Pm2_5.default_guidelines();
        assert_eq!(guidelines.len(), 1);
        assert_eq!(guidelines[0].statistic, Statistic::DailyMean);
        assert_eq!(guidelines[0].value, 15.0);
        assert_eq!(guidelines[0].comparator, Comparator::Greater);
    }
}
