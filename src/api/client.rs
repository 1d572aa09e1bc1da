//! HTTP client for the GroupTech REST API
//!
//! Wraps reqwest::Client with base URL resolution and status checking.

use std::path::Path;

use anyhow::{bail, Context, Result};
use url::Url;

use crate::config::Config;

/// REST client bound to one backend base URL.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    /// Build a client from the configured base URL.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.api_base()?))
    }

    /// Resolve an API path (with optional query string) against the base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).with_context(|| format!("Invalid API URL {}", joined))
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, url.as_str()).await
    }

    pub async fn post_form(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        tracing::debug!("POST (multipart) {}", url);

        let resp = self
            .http
            .post(url.clone())
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, url.as_str()).await
    }

    pub async fn patch(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        tracing::debug!("PATCH {}", url);

        let resp = self
            .http
            .patch(url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("PATCH {} failed", url))?;

        check_response(resp, url.as_str()).await
    }

    pub async fn delete(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        tracing::debug!("DELETE {}", url);

        let resp = self
            .http
            .delete(url.clone())
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", url))?;

        check_response(resp, url.as_str()).await
    }
}

/// Multipart part for a local file.
pub async fn file_part(path: &Path, name: &str, mime: &str) -> Result<reqwest::multipart::Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    reqwest::multipart::Part::bytes(bytes)
        .file_name(name.to_string())
        .mime_str(mime)
        .context("Invalid MIME type")
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        bail!("404 Not Found for {}", url);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let client = ApiClient::new(Url::parse("http://localhost:5000/api/").unwrap());
        assert_eq!(
            client.url("/channels/5/messages").unwrap().as_str(),
            "http://localhost:5000/api/channels/5/messages"
        );
        assert_eq!(
            client
                .url("private_messages?user_id=1&target_user_id=2")
                .unwrap()
                .query(),
            Some("user_id=1&target_user_id=2")
        );
    }
}
