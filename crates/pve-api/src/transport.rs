use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::{Params, Result};

/// Authenticated request surface consumed by the orchestrator.
///
/// `Session` is the HTTP implementation; tests substitute a scripted one.
/// Implementations attach credentials themselves and map non-2xx replies to
/// `Error::Api`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a request, optionally with a urlencoded form body, and return the raw body.
    async fn request(&self, method: Method, path: &str, form: Option<&Params>) -> Result<String>;

    /// GET `path` and decode the body as a generic JSON document.
    async fn get_json(&self, path: &str) -> Result<Value> {
        let body = self.request(Method::GET, path, None).await?;
        crate::decode(&body)
    }

    async fn post(&self, path: &str, form: Option<&Params>) -> Result<String> {
        self.request(Method::POST, path, form).await
    }

    async fn put(&self, path: &str, form: Option<&Params>) -> Result<String> {
        self.request(Method::PUT, path, form).await
    }

    async fn delete(&self, path: &str) -> Result<String> {
        self.request(Method::DELETE, path, None).await
    }
}
