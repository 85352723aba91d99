use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes a prepared HTTP request. Decorators wrap an inner client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
