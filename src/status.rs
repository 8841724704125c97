//! Mapping of HTTP status codes onto the error taxonomy.

use crate::error::ApiError;

/// Name of the header carrying the server's requested wait on a 429.
pub const RETRY_AFTER: &str = "Retry-After";

/// Status codes that `retry_request` treats as transient.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Maps a non-success status code to the matching [`ApiError`] variant.
///
/// `retry_after` is only consulted for 429 and is parsed as whole seconds;
/// anything unparseable is treated as absent.
pub fn map_status(status: u16, error_body: Option<&str>, retry_after: Option<&str>) -> ApiError {
    let error_body = error_body.map(str::to_string);
    match status {
        400 => ApiError::bad_request(error_body),
        401 => ApiError::unauthorized(),
        403 => ApiError::forbidden(),
        404 => ApiError::not_found(),
        409 => ApiError::conflict(),
        413 => ApiError::payload_too_large(),
        422 => ApiError::unprocessable_entity(Default::default()),
        429 => ApiError::too_many_requests(parse_retry_after(retry_after)),
        503 => ApiError::service_unavailable(),
        500..=599 => ApiError::server_error(status),
        _ => ApiError::http(status, error_body),
    }
}

/// Parses a `Retry-After` value given in seconds.
pub fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok())
}

/// Whether a raw status code should be retried by `retry_request`.
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}
