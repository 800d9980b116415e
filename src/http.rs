use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Which failures are worth sending the request again for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Transport failures, 5xx and 429.
    Always,
    /// Only failures where the server cannot have acted on the request:
    /// connection errors and 429. Used for POSTs that start billable work.
    IfNotAccepted,
}

impl Retry {
    fn status(self, status: StatusCode) -> bool {
        match self {
            Retry::Always => status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            Retry::IfNotAccepted => status == StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn transport(self, error: &reqwest::Error) -> bool {
        match self {
            Retry::Always => true,
            Retry::IfNotAccepted => error.is_connect(),
        }
    }
}

/// JSON-over-HTTP with bearer auth. Failures allowed by the call's `Retry`
/// policy are retried with exponential back-off (1s, 2s, 4s, ...); anything
/// else is handed back to the caller as-is.
#[derive(Clone)]
pub struct JsonHttp {
    client: Client,
    max_retries: u32,
}

impl JsonHttp {
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, max_retries })
    }

    pub async fn post(&self, url: &str, token: &str, body: &Value) -> Result<Response, reqwest::Error> {
        self.post_with(Retry::Always, url, token, body).await
    }

    pub async fn post_with(
        &self,
        retry: Retry,
        url: &str,
        token: &str,
        body: &Value,
    ) -> Result<Response, reqwest::Error> {
        self.send_with_retry(retry, url, || self.client.post(url).bearer_auth(token).json(body))
            .await
    }

    pub async fn get(&self, url: &str, token: &str) -> Result<Response, reqwest::Error> {
        self.send_with_retry(Retry::Always, url, || self.client.get(url).bearer_auth(token))
            .await
    }

    async fn send_with_retry<F>(&self, retry: Retry, url: &str, build: F) -> Result<Response, reqwest::Error>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);

        loop {
            attempt += 1;
            match build().send().await {
                Ok(resp) => {
                    if !retry.status(resp.status()) || attempt > self.max_retries {
                        return Ok(resp);
                    }
                    warn!(
                        url,
                        status = %resp.status(),
                        attempt,
                        "retryable HTTP status, backing off {:?}",
                        backoff
                    );
                }
                Err(e) => {
                    if !retry.transport(&e) || attempt > self.max_retries {
                        return Err(e);
                    }
                    warn!(url, attempt, error = %e, "HTTP transport error, backing off {:?}", backoff);
                }
            }

            sleep(backoff).await;
            backoff *= 2;
        }
    }
}

/// Pull a readable error out of a non-success response body.
pub async fn error_text(resp: Response) -> String {
    let status = resp.status();
    match resp.text().await {
        Ok(body) if !body.trim().is_empty() => format!("HTTP {}: {}", status, body.trim()),
        _ => format!("HTTP {}", status),
    }
}
