//! Delivery attempt domain model.
//!
//! Attempts are append-only: one row per HTTP call, numbered 1..N per delivery.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failure classification for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptErrorType {
    /// The call exceeded the endpoint's timeout.
    Timeout,
    /// DNS, TCP or TLS failure before a response arrived.
    ConnectionError,
    /// A non-2xx status was returned.
    HttpError,
    /// The response could not be read, or was larger than allowed.
    InvalidResponse,
}

impl AttemptErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptErrorType::Timeout => "timeout",
            AttemptErrorType::ConnectionError => "connection_error",
            AttemptErrorType::HttpError => "http_error",
            AttemptErrorType::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for AttemptErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(AttemptErrorType::Timeout),
            "connection_error" => Ok(AttemptErrorType::ConnectionError),
            "http_error" => Ok(AttemptErrorType::HttpError),
            "invalid_response" => Ok(AttemptErrorType::InvalidResponse),
            other => Err(format!("Unknown attempt error type: {}", other)),
        }
    }
}

/// One concrete HTTP call made while trying to fulfil a delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Attempt {
    pub id: i64,
    pub attempt_id: Uuid,
    pub delivery_id: Uuid,
    pub attempt_number: i32,
    pub request_url: String,
    pub request_headers: HashMap<String, String>,
    pub response_status: Option<i32>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<String>,
    pub response_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub error_type: Option<AttemptErrorType>,
    pub attempted_at: DateTime<Utc>,
}

/// An attempt ready to be appended.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub attempt_id: Uuid,
    pub delivery_id: Uuid,
    pub attempt_number: i32,
    pub request_url: String,
    pub request_headers: HashMap<String, String>,
    pub response_status: Option<i32>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<String>,
    pub response_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub error_type: Option<AttemptErrorType>,
    pub attempted_at: DateTime<Utc>,
}

/// Response payload for an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AttemptResponse {
    pub attempt_id: Uuid,
    pub attempt_number: i32,
    pub request_url: String,
    pub request_headers: HashMap<String, String>,
    pub response_status: Option<i32>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<String>,
    pub response_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub error_type: Option<AttemptErrorType>,
    pub attempted_at: DateTime<Utc>,
}

impl From<Attempt> for AttemptResponse {
    fn from(a: Attempt) -> Self {
        Self {
            attempt_id: a.attempt_id,
            attempt_number: a.attempt_number,
            request_url: a.request_url,
            request_headers: a.request_headers,
            response_status: a.response_status,
            response_headers: a.response_headers,
            response_body: a.response_body,
            response_time_ms: a.response_time_ms,
            success: a.success,
            error_message: a.error_message,
            error_type: a.error_type,
            attempted_at: a.attempted_at,
        }
    }
}

/// Response for listing the attempts of a delivery, in attempt order.
#[derive(Debug, Clone, Serialize)]
pub struct ListAttemptsResponse {
    pub delivery_id: Uuid,
    pub attempts: Vec<AttemptResponse>,
}

/// Result of a synchronous test send. Nothing about it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSendResponse {
    pub endpoint_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub response_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<AttemptErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
