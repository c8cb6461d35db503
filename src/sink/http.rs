use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::ScoreSink;
use crate::error::SinkError;

/// Webhook sink: POSTs each message as a JSON body.
pub struct HttpSink {
    url: String,
    client: Client,
    auth: Option<String>, // base64 encoded user:pass
    timeout: Duration,
}

impl HttpSink {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            client: Client::new(),
            auth: None,
            timeout,
        }
    }

    pub fn with_basic_auth(mut self, user: &str, pass: &str) -> Self {
        use base64::{Engine, engine::general_purpose::STANDARD};
        self.auth = Some(STANDARD.encode(format!("{user}:{pass}")));
        self
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, &self.url).timeout(self.timeout);
        if let Some(auth) = &self.auth {
            req = req.header("Authorization", format!("Basic {auth}"));
        }
        req
    }
}

/// 5xx and 429 are worth retrying; other 4xx will fail the same way again.
pub fn classify_status(status: StatusCode) -> Result<(), SinkError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(SinkError::Transient(format!("HTTP {status}")))
    } else {
        Err(SinkError::Permanent(format!("HTTP {status}")))
    }
}

fn classify_error(err: reqwest::Error) -> SinkError {
    if err.is_builder() {
        SinkError::Permanent(format!("HTTP error: {err}"))
    } else {
        SinkError::Transient(format!("HTTP error: {err}"))
    }
}

#[async_trait]
impl ScoreSink for HttpSink {
    async fn ping(&self) -> Result<(), SinkError> {
        // Any HTTP answer means the endpoint is reachable.
        self.request(reqwest::Method::HEAD)
            .send()
            .await
            .map(|_| ())
            .map_err(classify_error)
    }

    async fn send(&self, key: &str, payload: &[u8]) -> Result<(), SinkError> {
        let resp = self
            .request(reqwest::Method::POST)
            .header("Content-Type", "application/json")
            .header("X-Partition-Key", key)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(classify_error)?;
        classify_status(resp.status())
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}
