//! Raw provider records and the ordered, deduplicated observation store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MalformedRecordError, UnsortedInputError};
use crate::variable::Variable;

/// Timestamp as delivered by a provider: Unix seconds or RFC 3339 text.
///
/// Any other JSON value is kept as `Other` so that ingestion can drop the
/// single record instead of the whole response failing to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(i64),
    Text(String),
    Other(serde_json::Value),
}

/// Concentration as delivered by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

/// One unvalidated row: a timestamp plus any number of named values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub values: BTreeMap<String, Option<RawValue>>,
}

impl RawRecord {
    pub fn new(timestamp: RawTimestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, name: &str, value: Option<f64>) -> Self {
        self.values
            .insert(name.to_string(), value.map(RawValue::Number));
        self
    }
}

/// A validated hourly observation. Absent variables are simply not in `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<Variable, f64>,
}

impl Observation {
    pub fn value(&self, variable: Variable) -> Option<f64> {
        self.values.get(&variable).copied()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Reject the batch instead of sorting it unless timestamps strictly increase.
    pub require_sorted: bool,
}

/// Result of an ingestion: the store plus every record that had to be dropped.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub store: ObservationStore,
    pub dropped: Vec<MalformedRecordError>,
}

/// Observations sorted by timestamp with unique timestamps.
///
/// Cloning and [`localize`](ObservationStore::localize) share the underlying
/// observations; only the timezone used for bucketing and display differs.
#[derive(Debug, Clone)]
pub struct ObservationStore {
    observations: Arc<[Observation]>,
    timezone: Tz,
}

impl ObservationStore {
    /// Parses, sorts and merges a batch of raw records.
    ///
    /// Records sharing a timestamp are merged: later present values overwrite
    /// earlier ones for the same variable, later absent values do not erase.
    ///
    /// # Errors
    ///
    /// Only [`UnsortedInputError`], and only with `require_sorted`. Malformed
    /// records are dropped and listed in [`Ingested::dropped`].
    pub fn ingest<I>(records: I, options: IngestOptions) -> Result<Ingested, UnsortedInputError>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut merged: BTreeMap<DateTime<Utc>, BTreeMap<Variable, f64>> = BTreeMap::new();
        let mut dropped = Vec::new();
        let mut previous: Option<DateTime<Utc>> = None;

        for (index, record) in records.into_iter().enumerate() {
            let (timestamp, values) = match parse_record(index, &record) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(index, reason = %e.reason, "Dropping malformed record");
                    dropped.push(e);
                    continue;
                }
            };

            if options.require_sorted {
                if let Some(previous) = previous.filter(|p| timestamp <= *p) {
                    return Err(UnsortedInputError {
                        index,
                        timestamp,
                        previous,
                    });
                }
            }
            previous = Some(timestamp);

            merged.entry(timestamp).or_default().extend(values);
        }

        let observations: Vec<Observation> = merged
            .into_iter()
            .map(|(timestamp, values)| Observation { timestamp, values })
            .collect();

        debug!(
            observations = observations.len(),
            dropped = dropped.len(),
            "Ingested observation batch"
        );

        Ok(Ingested {
            store: ObservationStore {
                observations: observations.into(),
                timezone: Tz::UTC,
            },
            dropped,
        })
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.observations.first().map(|o| o.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.observations.last().map(|o| o.timestamp)
    }

    /// Observations with `start <= timestamp < end`.
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[Observation] {
        let lo = self.observations.partition_point(|o| o.timestamp < start);
        let hi = self.observations.partition_point(|o| o.timestamp < end);
        &self.observations[lo..hi.max(lo)]
    }

    /// One column: every timestamp with the variable's value, if present.
    pub fn variable(
        &self,
        variable: Variable,
    ) -> impl Iterator<Item = (DateTime<Utc>, Option<f64>)> + '_ {
        self.observations
            .iter()
            .map(move |o| (o.timestamp, o.value(variable)))
    }

    /// A view of the same observations bucketed and displayed in `timezone`.
    pub fn localize(&self, timezone: Tz) -> ObservationStore {
        ObservationStore {
            observations: Arc::clone(&self.observations),
            timezone,
        }
    }

    /// Calendar date of `timestamp` in this store's timezone.
    pub fn local_date(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.timezone).date_naive()
    }
}

impl PartialEq for ObservationStore {
    fn eq(&self, other: &Self) -> bool {
        self.timezone == other.timezone && self.observations == other.observations
    }
}

fn parse_record(
    index: usize,
    record: &RawRecord,
) -> Result<(DateTime<Utc>, BTreeMap<Variable, f64>), MalformedRecordError> {
    let malformed = |reason: String| MalformedRecordError { index, reason };

    let timestamp = match &record.timestamp {
        None => return Err(malformed("missing timestamp".to_string())),
        Some(raw) => parse_timestamp(raw).map_err(malformed)?,
    };

    let mut values = BTreeMap::new();
    for (name, raw) in &record.values {
        let Ok(variable) = name.parse::<Variable>() else {
            debug!(index, name = %name, "Ignoring unknown variable");
            continue;
        };
        if let Some(value) = parse_value(raw.as_ref())
            .map_err(|e| malformed(format!("{e} for {name}")))?
        {
            values.insert(variable, value);
        }
    }

    Ok((timestamp, values))
}

fn parse_timestamp(raw: &RawTimestamp) -> Result<DateTime<Utc>, String> {
    match raw {
        RawTimestamp::Epoch(secs) => DateTime::from_timestamp(*secs, 0)
            .ok_or_else(|| format!("epoch {secs} out of range")),
        RawTimestamp::Text(text) => match DateTime::parse_from_rfc3339(text.trim()) {
            Ok(zoned) => Ok(zoned.with_timezone(&Utc)),
            Err(_) if is_naive(text.trim()) => {
                Err(format!("timestamp '{text}' carries no UTC offset"))
            }
            Err(e) => Err(format!("unparseable timestamp '{text}': {e}")),
        },
        RawTimestamp::Other(value) => Err(format!("unsupported timestamp {value}")),
    }
}

fn is_naive(text: &str) -> bool {
    ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .any(|fmt| NaiveDateTime::parse_from_str(text, fmt).is_ok())
}

/// Non-finite and empty values count as absent, text that is not a number is an error.
fn parse_value(raw: Option<&RawValue>) -> Result<Option<f64>, String> {
    let value = match raw {
        None => return Ok(None),
        Some(RawValue::Number(n)) => *n,
        Some(RawValue::Text(text)) if text.trim().is_empty() => return Ok(None),
        Some(RawValue::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("unparseable value '{text}'"))?,
        Some(RawValue::Other(value)) => return Err(format!("unsupported value {value}")),
    };
    Ok(value.is_finite().then_some(value))
}
