//! Desktop HTTP transport over reqwest.
//!
//! A pooled reqwest client behind the [`HttpClient`] trait. Transport errors
//! and retryable statuses (5xx, 429) are retried with the policy's backoff;
//! any other status is handed back to the caller to interpret.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Statuses worth another attempt: server errors and throttling.
fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(10)
            .user_agent("field-collection-core/0.1.0")
            .build()
            .expect("Failed to build HTTP client");

        Self { client }
    }

    /// Wrap a caller-configured reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// One attempt: send the request and collect the full response body.
    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(describe_send_error)?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Body read failed: {e}")))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn describe_send_error(error: reqwest::Error) -> BridgeError {
    let detail = if error.is_timeout() {
        "Request timed out".to_string()
    } else if error.is_connect() {
        format!("Connection failed: {error}")
    } else {
        error.to_string()
    };
    BridgeError::OperationFailed(detail)
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, RetryPolicy::default())
            .await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let mut attempt = 1u32;
        loop {
            let outcome = self.send_once(&request).await;

            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status),
                Err(_) => true,
            };
            if !retryable || attempt >= policy.max_attempts {
                return outcome;
            }

            match &outcome {
                Ok(response) => warn!(
                    url = %request.url,
                    status = response.status,
                    attempt,
                    "Server asked for another attempt"
                ),
                Err(error) => warn!(url = %request.url, %error, attempt, "Send failed"),
            }

            let delay = policy.delay_for(attempt);
            debug!(delay_ms = delay.as_millis() as u64, "Backing off before retry");
            sleep(delay).await;
            attempt += 1;
        }
    }
}
