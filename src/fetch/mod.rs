//! Data acquisition: the [`DataSource`] capability, the Open-Meteo provider
//! and the cache / retry decorators layered around it.

mod basic;
mod cache;
mod client;
mod open_meteo;
mod retry;
mod source;
pub mod auth;

pub use basic::BasicClient;
pub use cache::CachedSource;
pub use client::HttpClient;
pub use open_meteo::{DEFAULT_BASE_URL, OpenMeteoSource};
pub use retry::RetryingSource;
pub use source::{DataSource, ObservationRequest, Segment, SourceError};

use anyhow::Result;

/// Raw GET of `url`, used for saved responses and ad-hoc endpoints.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}
