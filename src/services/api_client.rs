use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::errors::{LauncherError, Result};

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: String, access_token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(6))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url,
            access_token,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.api_base_url.clone(),
            config.access_token.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Builds a request against the API, attaching the bearer token when one is configured.
    pub fn request_builder(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, self.url(path));
        match self.access_token.as_deref() {
            Some(token) if !token.trim().is_empty() => request.bearer_auth(token),
            _ => request,
        }
    }

    /// POSTs `body` as JSON and decodes a JSON reply.
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: B) -> Result<T> {
        let request = self.request_builder(Method::POST, path).json(&body);
        let response = ensure_success(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }
}

pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(LauncherError::Http(format!(
        "HTTP {}: {}",
        status.as_u16(),
        text
    )))
}
