//! HTTP client for the relay backend
//!
//! Thin wrapper over reqwest that attaches the project API key and the user's
//! access token. Used by the directory and the telemetry collector.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CoreError, CoreResult};

/// API client for the relay backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(
        base_url: &str,
        api_key: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> CoreResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token,
        })
    }

    /// Build URL for endpoint
    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Attach API key and bearer token
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    /// Make authenticated GET request
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> CoreResult<T> {
        let request = self.authorize(self.client.get(self.url(endpoint)));
        let response = self.check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Make authenticated POST request and parse the JSON answer
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        prefer: Option<&str>,
    ) -> CoreResult<T> {
        let response = self.send_post(endpoint, body, prefer).await?;
        Ok(response.json().await?)
    }

    /// Make authenticated POST request, ignoring the response body
    pub async fn post_no_content<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        prefer: Option<&str>,
    ) -> CoreResult<()> {
        self.send_post(endpoint, body, prefer).await?;
        Ok(())
    }

    /// Make authenticated PATCH request, ignoring the response body
    pub async fn patch<B: Serialize + ?Sized>(&self, endpoint: &str, body: &B) -> CoreResult<()> {
        let request = self.authorize(self.client.patch(self.url(endpoint)).json(body));
        self.check_status(request.send().await?).await?;
        Ok(())
    }

    /// Make authenticated DELETE request
    pub async fn delete(&self, endpoint: &str) -> CoreResult<()> {
        let request = self.authorize(self.client.delete(self.url(endpoint)));
        self.check_status(request.send().await?).await?;
        Ok(())
    }

    async fn send_post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        prefer: Option<&str>,
    ) -> CoreResult<Response> {
        let mut request = self.authorize(self.client.post(self.url(endpoint)).json(body));

        if let Some(prefer) = prefer {
            request = request.header("Prefer", prefer);
        }

        self.check_status(request.send().await?).await
    }

    /// Map non-success statuses to errors
    async fn check_status(&self, response: Response) -> CoreResult<Response> {
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CoreError::Directory("access token rejected".to_string()));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Directory(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}
