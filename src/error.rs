// Client-side API error taxonomy
use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Field name -> messages, as returned by a 422 response
pub type FieldErrors = HashMap<String, Vec<String>>;

/// Every failure a request can end in. Cloneable so coalesced callers can
/// all receive the same outcome.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    // Transport failure before any response (DNS, refused, timeout)
    #[error("Network error: {0}")]
    Network(String),

    // 401
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // 403
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    // 404
    #[error("Not found: {message}")]
    NotFound { message: String },

    // 422
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field_errors: FieldErrors,
    },

    // 5xx
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    // Any other non-2xx
    #[error("Request failed ({status}): {message}")]
    Request { status: u16, message: String },

    // Local short-circuit, no network call was made
    #[error(
        "Request to {endpoint} blocked after {failures} failures, retry in {}s",
        .retry_after.as_secs()
    )]
    Blocked {
        endpoint: String,
        failures: u32,
        retry_after: Duration,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Token store error: {0}")]
    Storage(String),
}

impl ApiError {
    /// Classify a non-2xx response by status, pulling the message and any
    /// field errors out of the body.
    pub fn from_response(status: u16, body: &Value) -> Self {
        let message = response_message(body).unwrap_or_else(|| default_message(status).to_string());

        match status {
            401 => ApiError::Unauthorized { message },
            403 => ApiError::Forbidden { message },
            404 => ApiError::NotFound { message },
            422 => ApiError::Validation {
                message,
                field_errors: field_errors(body),
            },
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::Request { status, message },
        }
    }

    /// HTTP status behind this error, if a response was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Validation { .. } => Some(422),
            ApiError::Server { status, .. } => Some(*status),
            ApiError::Request { status, .. } => Some(*status),
            ApiError::Network(_)
            | ApiError::Blocked { .. }
            | ApiError::InvalidRequest(_)
            | ApiError::Decode(_)
            | ApiError::Storage(_) => None,
        }
    }

    /// Stable error code for callers that switch on error kind
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Network(_) => "NETWORK_ERROR",
            ApiError::Unauthorized { .. } => "UNAUTHORIZED",
            ApiError::Forbidden { .. } => "FORBIDDEN",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::Server { .. } => "SERVER_ERROR",
            ApiError::Request { .. } => "REQUEST_ERROR",
            ApiError::Blocked { .. } => "REQUEST_BLOCKED",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::Decode(_) => "INVALID_RESPONSE",
            ApiError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Field-level errors of a validation failure
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::Validation { field_errors, .. } => Some(field_errors),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, ApiError::Blocked { .. })
    }
}

fn response_message(body: &Value) -> Option<String> {
    match body {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Object(map) => ["message", "error", "msg"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

fn default_message(status: u16) -> &'static str {
    match status {
        401 => "Authentication required",
        403 => "Access denied",
        404 => "Resource not found",
        422 => "Validation failed",
        500..=599 => "Server error",
        _ => "Request failed",
    }
}

fn field_errors(body: &Value) -> FieldErrors {
    let source = body
        .get("errors")
        .or_else(|| body.get("field_errors"))
        .and_then(Value::as_object);

    let mut errors = FieldErrors::new();
    if let Some(map) = source {
        for (field, value) in map {
            let messages = match value {
                Value::String(msg) => vec![msg.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => continue,
            };
            errors.insert(field.clone(), messages);
        }
    }
    errors
}

impl From<crate::client::transport::TransportError> for ApiError {
    fn from(err: crate::client::transport::TransportError) -> Self {
        ApiError::Network(err.to_string())
    }
}

impl From<crate::session::StoreError> for ApiError {
    fn from(err: crate::session::StoreError) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_classification() {
        let body = json!({});
        assert!(matches!(ApiError::from_response(401, &body), ApiError::Unauthorized { .. }));
        assert!(matches!(ApiError::from_response(403, &body), ApiError::Forbidden { .. }));
        assert!(matches!(ApiError::from_response(404, &body), ApiError::NotFound { .. }));
        assert!(matches!(ApiError::from_response(422, &body), ApiError::Validation { .. }));
        assert!(matches!(ApiError::from_response(503, &body), ApiError::Server { status: 503, .. }));
        assert!(matches!(ApiError::from_response(502, &body), ApiError::Server { status: 502, .. }));
        assert!(matches!(ApiError::from_response(409, &body), ApiError::Request { status: 409, .. }));
        assert!(matches!(ApiError::from_response(302, &body), ApiError::Request { status: 302, .. }));
    }

    #[test]
    fn test_message_taken_from_body() {
        let err = ApiError::from_response(403, &json!({"success": false, "error": "tenant suspended"}));
        assert_eq!(err.to_string(), "Forbidden: tenant suspended");

        let err = ApiError::from_response(500, &Value::Null);
        assert_eq!(err.to_string(), "Server error (500): Server error");
    }

    #[test]
    fn test_validation_field_errors() {
        let body = json!({
            "message": "Invalid role",
            "errors": {
                "name": ["is required", "must be unique"],
                "code": "too long",
                "ignored": 42
            }
        });
        let err = ApiError::from_response(422, &body);
        let fields = err.field_errors().expect("validation error");
        assert_eq!(fields["name"], vec!["is required", "must be unique"]);
        assert_eq!(fields["code"], vec!["too long"]);
        assert!(!fields.contains_key("ignored"));
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(err.status_code(), Some(422));
    }

    #[test]
    fn test_blocked_display() {
        let err = ApiError::Blocked {
            endpoint: "http://console.test/api/v1/roles".to_string(),
            failures: 3,
            retry_after: Duration::from_secs(42),
        };
        assert!(err.is_blocked());
        assert_eq!(err.status_code(), None);
        assert_eq!(
            err.to_string(),
            "Request to http://console.test/api/v1/roles blocked after 3 failures, retry in 42s"
        );
    }
}
