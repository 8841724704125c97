//! Error taxonomy for API calls.
//!
//! [`ApiError`] is the closed set of failure causes surfaced to callers:
//! transport failures, mapped HTTP status codes and body decoding failures.
//! [`Error`] wraps it together with the misuse and configuration errors that
//! are not part of the taxonomy and are never retried.

use std::collections::BTreeMap;
use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// Boxed source error carried by transport and decoding variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fieldless tag of an [`ApiError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Connection,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    UnprocessableEntity,
    TooManyRequests,
    PayloadTooLarge,
    ServerError,
    ServiceUnavailable,
    Deserialization,
    Http,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::UnprocessableEntity => "unprocessable_entity",
            ErrorKind::TooManyRequests => "too_many_requests",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Deserialization => "deserialization",
            ErrorKind::Http => "http",
        };
        f.write_str(text)
    }
}

/// A failure of an API call, classified into exactly one kind.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Generic network failure reported by the transport
    #[error("Network error occurred")]
    Network {
        #[source]
        source: BoxError,
    },

    /// The request or response timed out
    #[error("{message}")]
    Timeout {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The server could not be reached
    #[error("Failed to connect to server")]
    Connection {
        #[source]
        source: BoxError,
    },

    /// HTTP 400
    #[error("{message}")]
    BadRequest {
        message: String,
        error_body: Option<String>,
    },

    /// HTTP 401
    #[error("{message}")]
    Unauthorized { message: String },

    /// HTTP 403
    #[error("{message}")]
    Forbidden { message: String },

    /// HTTP 404
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// HTTP 409
    #[error("{message}")]
    Conflict { message: String },

    /// HTTP 422, optionally with per-field validation messages
    #[error("{message}")]
    UnprocessableEntity {
        message: String,
        errors: BTreeMap<String, Vec<String>>,
    },

    /// HTTP 429
    #[error("Too many requests. Please try again {}.", retry_after_phrase(.retry_after_seconds))]
    TooManyRequests { retry_after_seconds: Option<u64> },

    /// HTTP 413
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// HTTP 5xx other than 503
    #[error("HTTP {status}: {message}")]
    ServerError { status: u16, message: String },

    /// HTTP 503
    #[error("{message}")]
    ServiceUnavailable { message: String },

    /// The response body could not be decoded into the declared type
    #[error("Failed to parse response")]
    Deserialization {
        #[source]
        source: BoxError,
    },

    /// Any other non-success status
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        error_body: Option<String>,
    },
}

fn retry_after_phrase(seconds: &Option<u64>) -> String {
    match seconds {
        Some(seconds) => format!("after {} seconds", seconds),
        None => "later".to_string(),
    }
}

impl ApiError {
    pub fn network(source: impl Into<BoxError>) -> Self {
        ApiError::Network {
            source: source.into(),
        }
    }

    pub fn timeout() -> Self {
        ApiError::Timeout {
            message: "Request timed out".to_string(),
            source: None,
        }
    }

    pub fn timeout_caused_by(source: impl Into<BoxError>) -> Self {
        ApiError::Timeout {
            message: "Request timed out".to_string(),
            source: Some(source.into()),
        }
    }

    pub fn connection(source: impl Into<BoxError>) -> Self {
        ApiError::Connection {
            source: source.into(),
        }
    }

    pub fn bad_request(error_body: Option<String>) -> Self {
        ApiError::BadRequest {
            message: "Invalid request".to_string(),
            error_body,
        }
    }

    pub fn unauthorized() -> Self {
        ApiError::Unauthorized {
            message: "Authentication required".to_string(),
        }
    }

    pub fn forbidden() -> Self {
        ApiError::Forbidden {
            message: "Access denied".to_string(),
        }
    }

    pub fn not_found() -> Self {
        ApiError::NotFound {
            resource: "Resource".to_string(),
        }
    }

    pub fn conflict() -> Self {
        ApiError::Conflict {
            message: "Resource conflict".to_string(),
        }
    }

    pub fn unprocessable_entity(errors: BTreeMap<String, Vec<String>>) -> Self {
        ApiError::UnprocessableEntity {
            message: "Validation failed".to_string(),
            errors,
        }
    }

    pub fn too_many_requests(retry_after_seconds: Option<u64>) -> Self {
        ApiError::TooManyRequests {
            retry_after_seconds,
        }
    }

    pub fn payload_too_large() -> Self {
        ApiError::PayloadTooLarge {
            message: "Request payload too large".to_string(),
        }
    }

    pub fn server_error(status: u16) -> Self {
        ApiError::ServerError {
            status,
            message: "Server error".to_string(),
        }
    }

    pub fn service_unavailable() -> Self {
        ApiError::ServiceUnavailable {
            message: "Service temporarily unavailable".to_string(),
        }
    }

    pub fn deserialization(source: impl Into<BoxError>) -> Self {
        ApiError::Deserialization {
            source: source.into(),
        }
    }

    pub fn http(status: u16, error_body: Option<String>) -> Self {
        ApiError::Http {
            status,
            message: "HTTP error".to_string(),
            error_body,
        }
    }

    /// Returns the kind tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Connection { .. } => ErrorKind::Connection,
            ApiError::BadRequest { .. } => ErrorKind::BadRequest,
            ApiError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ApiError::Forbidden { .. } => ErrorKind::Forbidden,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::Conflict { .. } => ErrorKind::Conflict,
            ApiError::UnprocessableEntity { .. } => ErrorKind::UnprocessableEntity,
            ApiError::TooManyRequests { .. } => ErrorKind::TooManyRequests,
            ApiError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            ApiError::ServerError { .. } => ErrorKind::ServerError,
            ApiError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            ApiError::Deserialization { .. } => ErrorKind::Deserialization,
            ApiError::Http { .. } => ErrorKind::Http,
        }
    }

    /// HTTP status code carried by status-derived variants.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::BadRequest { .. } => Some(400),
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Conflict { .. } => Some(409),
            ApiError::PayloadTooLarge { .. } => Some(413),
            ApiError::UnprocessableEntity { .. } => Some(422),
            ApiError::TooManyRequests { .. } => Some(429),
            ApiError::ServiceUnavailable { .. } => Some(503),
            ApiError::ServerError { status, .. } | ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Seconds the server asked us to wait, if this is a 429 that said so.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            ApiError::TooManyRequests {
                retry_after_seconds,
            } => *retry_after_seconds,
            _ => None,
        }
    }

    /// Raw error body text, for the variants that keep it.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            ApiError::BadRequest { error_body, .. } | ApiError::Http { error_body, .. } => {
                error_body.as_deref()
            }
            _ => None,
        }
    }

    /// Default retry classification.
    ///
    /// Transport failures, 429 and 503 are retryable. Other server errors
    /// only for 502, 503 and 504; a plain 500 or 501 is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout { .. }
            | ApiError::Network { .. }
            | ApiError::Connection { .. }
            | ApiError::ServiceUnavailable { .. }
            | ApiError::TooManyRequests { .. } => true,
            ApiError::ServerError { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Body access on a response that was not 2xx
    #[error("Response was not successful: {status}")]
    NotSuccessful { status: StatusCode },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The request could not be built, so it was never sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

impl Error {
    /// The taxonomy error inside, if any.
    pub fn as_api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_api_error(self) -> Option<ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }
}
