use async_trait::async_trait;
use reqwest::{Request, Response};

/// Transport used for postal-reference downloads. Wrapping it lets callers
/// swap in clients with different timeouts or middleware.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
