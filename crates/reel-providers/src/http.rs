//! HTTP transport shared by the adapters.

use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::adapter::ByteStream;
use crate::config::EndpointConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::metrics::record_provider_request;

#[derive(Clone)]
pub(crate) struct ProviderHttp {
    client: Client,
    endpoint: EndpointConfig,
    provider: &'static str,
}

impl ProviderHttp {
    pub(crate) fn new(provider: &'static str, endpoint: EndpointConfig, timeout: Duration) -> ProviderResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .user_agent(concat!("reel-providers/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            provider,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if self.endpoint.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.endpoint.api_key)
        }
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> ProviderResult<Response> {
        let start = Instant::now();
        let result = request.send().await;
        let status = result.as_ref().map(|r| r.status().as_u16()).unwrap_or(0);
        record_provider_request(self.provider, operation, status, start.elapsed());

        let response = result.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ProviderError::transient(e.to_string())
            } else {
                ProviderError::Http(e)
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        debug!(provider = self.provider, operation, status, body = %body, "Provider request failed");
        Err(ProviderError::from_status(status, body))
    }

    pub(crate) async fn post_json<B, R>(&self, operation: &'static str, path: &str, body: &B) -> ProviderResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.authorized(self.client.post(self.url(path)).json(body));
        let response = self.send(operation, request).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(format!("{} response: {}", operation, e)))
    }

    pub(crate) async fn get_json<R: DeserializeOwned>(&self, operation: &'static str, path: &str) -> ProviderResult<R> {
        let request = self.authorized(self.client.get(self.url(path)));
        let response = self.send(operation, request).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(format!("{} response: {}", operation, e)))
    }

    /// Stream a result. Relative locators resolve against the base URL;
    /// credentials are only sent to the provider's own host.
    pub(crate) async fn stream(&self, locator: &str) -> ProviderResult<ByteStream> {
        let url = if locator.starts_with("http://") || locator.starts_with("https://") {
            locator.to_string()
        } else {
            self.url(locator)
        };

        let same_host = url::Url::parse(&url)
            .ok()
            .zip(url::Url::parse(&self.endpoint.base_url).ok())
            .map(|(a, b)| a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default())
            .unwrap_or(false);

        let request = self.client.get(&url);
        let request = if same_host { self.authorized(request) } else { request };
        let response = self.send("fetch", request).await?;

        Ok(Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map(|bytes| bytes.to_vec()).map_err(|e| ProviderError::transient(e.to_string()))
        })))
    }
}
