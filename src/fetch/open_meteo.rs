use async_trait::async_trait;
use tracing::{debug, info};

use super::client::HttpClient;
use super::source::{DataSource, ObservationRequest, Segment, SourceError};
use crate::parser::parse_response;
use crate::variable::Variable;

pub const DEFAULT_BASE_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

/// Open-Meteo air-quality API as a [`DataSource`].
///
/// Always asks for Unix timestamps in GMT so every record carries an
/// unambiguous instant; local-day bucketing happens in the pipeline.
pub struct OpenMeteoSource<C> {
    client: C,
    base_url: String,
}

impl<C: HttpClient> OpenMeteoSource<C> {
    pub fn new(client: C) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: C, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }

    pub fn request_url(&self, request: &ObservationRequest) -> Result<reqwest::Url, SourceError> {
        if request.start_date > request.end_date {
            return Err(SourceError::Request(format!(
                "start date {} is after end date {}",
                request.start_date, request.end_date
            )));
        }

        let hourly: Vec<&str> = request.variables.iter().map(Variable::as_str).collect();
        let params = [
            ("latitude", request.location.latitude.to_string()),
            ("longitude", request.location.longitude.to_string()),
            ("hourly", hourly.join(",")),
            ("start_date", request.start_date.to_string()),
            ("end_date", request.end_date.to_string()),
            ("timeformat", "unixtime".to_string()),
            ("timezone", "GMT".to_string()),
        ];

        reqwest::Url::parse_with_params(&self.base_url, &params)
            .map_err(|e| SourceError::Request(e.to_string()))
    }
}

#[async_trait]
impl<C: HttpClient> DataSource for OpenMeteoSource<C> {
    #[tracing::instrument(skip(self, request), fields(start = %request.start_date, end = %request.end_date))]
    async fn fetch(&self, request: &ObservationRequest) -> Result<Vec<Segment>, SourceError> {
        let url = self.request_url(request)?;
        debug!(url = %url, "Requesting air-quality data");

        let req = reqwest::Request::new(reqwest::Method::GET, url);
        let resp = self.client.execute(req).await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        let segments = parse_response(&bytes)?;

        info!(
            segments = segments.len(),
            records = segments.iter().map(|s| s.records.len()).sum::<usize>(),
            "Air-quality data received"
        );
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Location;
    use crate::fetch::BasicClient;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn request(start: (i32, u32, u32), end: (i32, u32, u32)) -> ObservationRequest {
        ObservationRequest {
            location: Location {
                latitude: -1.45,
                longitude: 36.66,
            },
            variables: BTreeSet::from([Variable::Ozone, Variable::Pm2_5]),
            start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
        }
    }

    #[test]
    fn test_request_url_carries_all_parameters() {
        let source = OpenMeteoSource::new(BasicClient::new());
        let url = source
            .request_url(&request((2025, 1, 1), (2025, 8, 20)))
            .unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(name, _)| name == k)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(url.host_str(), Some("air-quality-api.open-meteo.com"));
        assert_eq!(get("latitude"), Some("-1.45"));
        assert_eq!(get("longitude"), Some("36.66"));
        assert_eq!(get("hourly"), Some("ozone,pm2_5"));
        assert_eq!(get("start_date"), Some("2025-01-01"));
        assert_eq!(get("end_date"), Some("2025-08-20"));
        assert_eq!(get("timeformat"), Some("unixtime"));
    }

    #[test]
    fn test_reversed_date_range_is_rejected() {
        let source = OpenMeteoSource::new(BasicClient::new());
        let err = source
            .request_url(&request((2025, 2, 1), (2025, 1, 1)))
            .unwrap_err();

        assert!(matches!(err, SourceError::Request(_)));
    }
}
