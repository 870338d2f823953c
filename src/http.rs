//! HTTP client utilities shared by provider adapter implementations.

use reqwest::{Client, RequestBuilder};

use crate::options::HttpOptions;
use crate::provider::ProviderError;

/// Build a configured HTTP client from transport options.
pub fn build_http_client(options: &HttpOptions) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(t) = options.timeout {
        builder = builder.timeout(t);
    }
    if let Some(proxy_url) = &options.proxy {
        if let Ok(p) = reqwest::Proxy::all(proxy_url) {
            builder = builder.proxy(p);
        }
    }

    builder.build()
}

/// Add extra headers to a request if specified in transport options.
pub fn add_extra_headers(mut request: RequestBuilder, options: &HttpOptions) -> RequestBuilder {
    if let Some(h) = &options.headers {
        for (key, value) in h {
            request = request.header(key, value);
        }
    }
    request
}

/// Extension trait for RequestBuilder that logs the request body.
pub trait RequestBuilderExt {
    /// Set JSON request body and log it. Returns the RequestBuilder for chaining.
    fn json_logged<T: serde::Serialize + ?Sized>(self, json: &T) -> Self;
}

impl RequestBuilderExt for RequestBuilder {
    fn json_logged<T: serde::Serialize + ?Sized>(self, json: &T) -> Self {
        if let Ok(req_body) = serde_json::to_string_pretty(json) {
            tracing::debug!("API request body ({} bytes):\n{}", req_body.len(), req_body);
        }

        self.json(json)
    }
}

/// Extension trait for Response that logs the response body.
#[async_trait::async_trait]
pub trait ResponseExt {
    /// Parse response as JSON and log it. Consumes the response.
    async fn json_logged<T: serde::de::DeserializeOwned>(self) -> Result<T, ProviderError>;
}

#[async_trait::async_trait]
impl ResponseExt for reqwest::Response {
    async fn json_logged<T: serde::de::DeserializeOwned>(self) -> Result<T, ProviderError> {
        let bytes = self.bytes().await?;

        if let Ok(text) = std::str::from_utf8(&bytes) {
            tracing::debug!("API response ({} bytes):\n{}", text.len(), text);
        }

        serde_json::from_slice(&bytes).map_err(ProviderError::from)
    }
}
