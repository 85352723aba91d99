//! The data-source capability the pipeline pulls observations from.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Location;
use crate::observation::RawRecord;
use crate::variable::Variable;

/// Hourly observations for one point over an inclusive date range.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRequest {
    pub location: Location,
    pub variables: BTreeSet<Variable>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ObservationRequest {
    /// Identity of the request, used as cache key.
    pub fn cache_key(&self) -> String {
        let variables: Vec<&str> = self.variables.iter().map(Variable::as_str).collect();
        format!(
            "{:.4},{:.4}|{}|{}..{}",
            self.location.latitude,
            self.location.longitude,
            variables.join(","),
            self.start_date,
            self.end_date
        )
    }
}

/// One response unit from a provider. Segments are concatenated in order before ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub records: Vec<RawRecord>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider rejected request: {0}")]
    Provider(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    Request(String),
}

impl SourceError {
    /// Transport failures, timeouts, 429 and 5xx are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Http(_) | SourceError::Timeout => true,
            SourceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Http(err.to_string())
        }
    }
}

/// Anything that can return raw observations for a request.
///
/// Implementations may be composed: [`CachedSource`](super::CachedSource) and
/// [`RetryingSource`](super::RetryingSource) wrap another source.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, request: &ObservationRequest) -> Result<Vec<Segment>, SourceError>;
}

#[async_trait]
impl<S: DataSource + ?Sized> DataSource for Box<S> {
    async fn fetch(&self, request: &ObservationRequest) -> Result<Vec<Segment>, SourceError> {
        (**self).fetch(request).await
    }
}

#[async_trait]
impl<S: DataSource + ?Sized> DataSource for std::sync::Arc<S> {
    async fn fetch(&self, request: &ObservationRequest) -> Result<Vec<Segment>, SourceError> {
        (**self).fetch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_identifies_request() {
        let request = ObservationRequest {
            location: Location {
                latitude: -1.45,
                longitude: 36.66,
            },
            variables: BTreeSet::from([Variable::Pm2_5, Variable::Ozone]),
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 8, 20).unwrap(),
        };

        assert_eq!(
            request.cache_key(),
            "-1.4500,36.6600|ozone,pm2_5|2025-01-01..2025-08-20"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SourceError::Timeout.is_retryable());
        assert!(SourceError::Http("reset".into()).is_retryable());
        assert!(
            SourceError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            SourceError::Status {
                status: 429,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !SourceError::Status {
                status: 400,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!SourceError::Parse("bad json".into()).is_retryable());
    }
}
