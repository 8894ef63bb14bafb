//! Common validation utilities.

use std::collections::HashMap;
use validator::{ValidateUrl, ValidationError};

lazy_static::lazy_static! {
    /// Dotted lowercase event names such as `order.placed` or `customer.address_updated`.
    static ref EVENT_TYPE_REGEX: regex::Regex =
        regex::Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$").unwrap();

    /// RFC 7230 header field name token.
    static ref HEADER_NAME_REGEX: regex::Regex =
        regex::Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").unwrap();
}

/// Maximum length of an event type name.
pub const MAX_EVENT_TYPE_LENGTH: usize = 100;

/// Header names the delivery pipeline sets itself; endpoints may not override them.
pub const RESERVED_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "host",
    "user-agent",
    "x-webhook-id",
    "x-webhook-event",
    "x-webhook-attempt",
    "x-webhook-signature",
    "x-webhook-timestamp",
];

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates that a URL is a well-formed absolute http(s) URL with a host.
///
/// Plain `http://` is accepted only when `allow_insecure` is set (dev/test mode).
pub fn validate_endpoint_url(url: &str, allow_insecure: bool) -> Result<(), ValidationError> {
    if !ValidateUrl::validate_url(url) {
        return Err(error("url_invalid", "URL is not a valid URL"));
    }

    let rest = if let Some(rest) = url.strip_prefix("https://") {
        rest
    } else if let Some(rest) = url.strip_prefix("http://") {
        if !allow_insecure {
            return Err(error("https_required", "URL must use HTTPS protocol"));
        }
        rest
    } else {
        return Err(error(
            "absolute_url_required",
            "URL must be an absolute http(s) URL",
        ));
    };

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || host.starts_with(':') || host.contains(char::is_whitespace) {
        return Err(error("url_host_required", "URL must include a host"));
    }

    Ok(())
}

/// Validates a single subscribed event type name.
pub fn validate_event_type(event_type: &str) -> Result<(), ValidationError> {
    if event_type.len() > MAX_EVENT_TYPE_LENGTH || !EVENT_TYPE_REGEX.is_match(event_type) {
        return Err(error(
            "event_type_format",
            "Event types must be dotted lowercase names such as order.placed",
        ));
    }
    Ok(())
}

/// Validates a subscription list: non-empty, each entry well-formed.
pub fn validate_event_types(events: &[String]) -> Result<(), ValidationError> {
    if events.is_empty() {
        return Err(error(
            "events_required",
            "At least one event type must be subscribed",
        ));
    }
    events.iter().try_for_each(|e| validate_event_type(e))
}

/// Validates static endpoint headers: well-formed names, printable values,
/// and no overrides of reserved delivery headers.
pub fn validate_static_headers(headers: &HashMap<String, String>) -> Result<(), ValidationError> {
    for (name, value) in headers {
        if !HEADER_NAME_REGEX.is_match(name) {
            return Err(error("header_name_invalid", "Invalid header name"));
        }
        if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            return Err(error(
                "header_reserved",
                "Header is set by the delivery pipeline and cannot be overridden",
            ));
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(error("header_value_invalid", "Invalid header value"));
        }
    }
    Ok(())
}
