//! JSON parser for Open-Meteo air-quality responses.

use std::collections::BTreeMap;

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use serde::Deserialize;

use crate::fetch::{Segment, SourceError};
use crate::observation::{RawRecord, RawTimestamp, RawValue};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    utc_offset_seconds: Option<i32>,
    hourly: Option<HourlyBlock>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<Option<RawTimestamp>>,
    #[serde(flatten)]
    columns: BTreeMap<String, Vec<Option<RawValue>>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Many(Vec<ApiResponse>),
    One(ApiResponse),
}

/// Decodes an Open-Meteo response body into one [`Segment`] per response object.
///
/// A body may hold a single object or an array of them. Local ISO times
/// without offset are pinned to the response's `utc_offset_seconds`; a
/// missing `hourly` block yields an empty segment.
///
/// # Errors
///
/// [`SourceError::Parse`] for malformed JSON, [`SourceError::Provider`] when the
/// body is an Open-Meteo error object.
pub fn parse_response(bytes: &[u8]) -> Result<Vec<Segment>, SourceError> {
    let payload: Payload =
        serde_json::from_slice(bytes).map_err(|e| SourceError::Parse(e.to_string()))?;

    let responses = match payload {
        Payload::Many(many) => many,
        Payload::One(one) => vec![one],
    };

    responses.into_iter().map(to_segment).collect()
}

fn to_segment(response: ApiResponse) -> Result<Segment, SourceError> {
    if response.error {
        return Err(SourceError::Provider(
            response.reason.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let Some(hourly) = response.hourly else {
        return Ok(Segment::default());
    };

    let offset = response
        .utc_offset_seconds
        .and_then(FixedOffset::east_opt);

    let records = hourly
        .time
        .iter()
        .enumerate()
        .map(|(i, time)| RawRecord {
            timestamp: time.clone().map(|t| pin_offset(t, offset)),
            values: hourly
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.get(i).cloned().flatten()))
                .collect(),
        })
        .collect();

    Ok(Segment { records })
}

/// Turns `2025-01-01T00:00` into RFC 3339 using the response offset. Anything
/// else is passed through for the ingester to judge.
fn pin_offset(timestamp: RawTimestamp, offset: Option<FixedOffset>) -> RawTimestamp {
    let (RawTimestamp::Text(text), Some(offset)) = (&timestamp, offset) else {
        return timestamp;
    };

    ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|zoned| RawTimestamp::Text(zoned.to_rfc3339()))
        .unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{IngestOptions, ObservationStore};

    #[test]
    fn test_parse_unixtime_response() {
        let body = br#"{
            "latitude": -1.5, "longitude": 36.7, "utc_offset_seconds": 0,
            "hourly_units": {"time": "unixtime", "ozone": "ug/m3"},
            "hourly": {"time": [1735689600, 1735693200], "ozone": [50.0, null], "pm2_5": [12, 13.5]}
        }"#;

        let segments = parse_response(body).unwrap();

        assert_eq!(segments.len(), 1);
        let records = &segments[0].records;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, Some(RawTimestamp::Epoch(1735689600)));
        assert_eq!(records[0].values["ozone"], Some(RawValue::Number(50.0)));
        assert_eq!(records[1].values["ozone"], None);
        assert_eq!(records[1].values["pm2_5"], Some(RawValue::Number(13.5)));
    }

    #[test]
    fn test_parse_array_of_responses_keeps_segments() {
        let body = br#"[
            {"hourly": {"time": [0], "ozone": [1.0]}},
            {"hourly": {"time": [3600, 7200], "ozone": [2.0, 3.0]}}
        ]"#;

        let segments = parse_response(body).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].records.len(), 2);
    }

    #[test]
    fn test_local_iso_times_get_response_offset() {
        let body = br#"{"utc_offset_seconds": 10800,
            "hourly": {"time": ["2025-01-01T00:00"], "ozone": [1.0]}}"#;

        let segments = parse_response(body).unwrap();

        assert_eq!(
            segments[0].records[0].timestamp,
            Some(RawTimestamp::Text("2025-01-01T00:00:00+03:00".to_string()))
        );
    }

    #[test]
    fn test_short_columns_pad_with_absent() {
        let body = br#"{"hourly": {"time": [0, 3600], "ozone": [1.0]}}"#;

        let segments = parse_response(body).unwrap();

        assert_eq!(segments[0].records[1].values["ozone"], None);
    }

    #[test]
    fn test_bad_timestamp_drops_only_its_record() {
        let body = br#"{"hourly": {"time": [1735689600, 1735693200.5, 1735696800], "ozone": [1, 2, 3]}}"#;

        let segments = parse_response(body).unwrap();
        let records = segments.into_iter().flat_map(|s| s.records);
        let ingested = ObservationStore::ingest(records, IngestOptions::default()).unwrap();

        assert_eq!(ingested.store.len(), 2);
        assert_eq!(ingested.dropped.len(), 1);
        assert_eq!(ingested.dropped[0].index, 1);
    }

    #[test]
    fn test_non_numeric_value_drops_only_its_record() {
        let body = br#"{"hourly": {"time": [0, 3600, 7200], "ozone": [1.0, true, 3.0]}}"#;

        let segments = parse_response(body).unwrap();
        assert_eq!(
            segments[0].records[1].values["ozone"],
            Some(RawValue::Other(serde_json::Value::Bool(true)))
        );

        let ingested = ObservationStore::ingest(
            segments.into_iter().flat_map(|s| s.records),
            IngestOptions::default(),
        )
        .unwrap();
        assert_eq!(ingested.store.len(), 2);
        assert_eq!(ingested.dropped.len(), 1);
        assert!(ingested.dropped[0].reason.contains("ozone"));
    }

    #[test]
    fn test_missing_hourly_block_is_empty_segment() {
        let segments = parse_response(br#"{"latitude": 0.0}"#).unwrap();
        assert_eq!(segments, vec![Segment::default()]);
    }

    #[test]
    fn test_provider_error_object() {
        let body = br#"{"error": true, "reason": "Cannot initialize WeatherVariable from invalid String value pm25"}"#;

        let err = parse_response(body).unwrap_err();
        assert!(matches!(err, SourceError::Provider(reason) if reason.contains("pm25")));
    }

    #[test]
    fn test_invalid_json() {
        let err = parse_response(b"not json").unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }
}
