//! Outbound HTTP transport for webhook attempts.
//!
//! A transport never fails: every problem on the wire is folded into the
//! returned [`TransportOutcome`] so the dispatcher can classify and record it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::{redirect, Client};

use domain::models::AttemptErrorType;

/// A signed request ready to go on the wire.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    /// Header pairs in send order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

/// Why an attempt did not produce a readable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: AttemptErrorType,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: AttemptErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What happened on the wire.
#[derive(Debug, Clone, Default)]
pub struct TransportOutcome {
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub failure: Option<TransportFailure>,
    pub elapsed: Duration,
}

#[async_trait::async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> TransportOutcome;
}

/// Transport backed by a shared `reqwest` client.
///
/// Redirects are never followed: a 3xx is reported as-is. All headers,
/// including `User-Agent`, come from the request.
pub struct HttpTransport {
    client: Client,
    body_limit: usize,
}

impl HttpTransport {
    pub fn new(body_limit: usize) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client, body_limit })
    }
}

fn classify_send_error(e: &reqwest::Error, timeout: Duration) -> TransportFailure {
    if e.is_timeout() {
        TransportFailure::new(
            AttemptErrorType::Timeout,
            format!("Request timed out after {}ms", timeout.as_millis()),
        )
    } else if e.is_connect() {
        TransportFailure::new(
            AttemptErrorType::ConnectionError,
            format!("Connection failed: {}", e),
        )
    } else {
        TransportFailure::new(
            AttemptErrorType::ConnectionError,
            format!("Request error: {}", e),
        )
    }
}

/// Reads at most `limit` bytes of body. Larger bodies are rejected.
async fn read_limited(
    mut response: reqwest::Response,
    limit: usize,
    timeout: Duration,
) -> Result<Vec<u8>, TransportFailure> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(TransportFailure::new(
                AttemptErrorType::InvalidResponse,
                format!("Response body too large ({} bytes, max {})", len, limit),
            ));
        }
    }

    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if body.len() + chunk.len() > limit {
                    return Err(TransportFailure::new(
                        AttemptErrorType::InvalidResponse,
                        format!("Response body exceeded {} byte limit", limit),
                    ));
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => return Ok(body),
            Err(e) if e.is_timeout() => {
                return Err(TransportFailure::new(
                    AttemptErrorType::Timeout,
                    format!("Response body timed out after {}ms", timeout.as_millis()),
                ))
            }
            Err(e) => {
                return Err(TransportFailure::new(
                    AttemptErrorType::InvalidResponse,
                    format!("Failed to read response body: {}", e),
                ))
            }
        }
    }
}

#[async_trait::async_trait]
impl WebhookTransport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> TransportOutcome {
        let start = Instant::now();

        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                return TransportOutcome {
                    failure: Some(classify_send_error(&e, request.timeout)),
                    elapsed: start.elapsed(),
                    ..Default::default()
                }
            }
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let (body, failure) = match read_limited(response, self.body_limit, request.timeout).await {
            Ok(bytes) if bytes.is_empty() => (None, None),
            Ok(bytes) => (Some(String::from_utf8_lossy(&bytes).into_owned()), None),
            Err(failure) => (None, Some(failure)),
        };

        TransportOutcome {
            status: Some(status),
            headers,
            body,
            failure,
            elapsed: start.elapsed(),
        }
    }
}
