//! Typed view over a buffered HTTP response.

mod outcome;

use std::fmt;
use std::sync::OnceLock;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, Error, Result};
use crate::transport::RawResponse;

/// A raw response paired with the body type the caller expects.
///
/// The body is decoded on first access and cached, so repeated calls to
/// [`body`](Self::body) do not decode again.
pub struct ResponseWrapper<T> {
    response: RawResponse,
    decoded: OnceLock<T>,
}

impl<T> ResponseWrapper<T> {
    pub fn new(response: RawResponse) -> Self {
        Self {
            response,
            decoded: OnceLock::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    /// First value of a response header, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Headers that were sent with the request.
    pub fn request_headers(&self) -> &HeaderMap {
        &self.response.request_headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.response.body
    }

    /// Body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.response.body).into_owned()
    }

    pub fn raw(&self) -> &RawResponse {
        &self.response
    }

    pub fn into_raw(self) -> RawResponse {
        self.response
    }

    pub fn is_success(&self) -> bool {
        self.response.status.is_success()
    }

    pub fn is_client_error(&self) -> bool {
        self.response.status.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.response.status.is_server_error()
    }

    /// Raw body text of a non-2xx response.
    pub fn error_body(&self) -> Option<String> {
        if self.is_success() {
            None
        } else {
            Some(self.text())
        }
    }

    /// Decodes the body of a non-2xx response as `E`.
    pub fn error_body_as<E: DeserializeOwned>(&self) -> Result<Option<E>, ApiError> {
        if self.is_success() {
            return Ok(None);
        }
        decode(&self.response.body).map(Some)
    }
}

impl<T: DeserializeOwned> ResponseWrapper<T> {
    /// The decoded body of a 2xx response.
    pub fn body(&self) -> Result<&T> {
        if !self.is_success() {
            return Err(Error::NotSuccessful {
                status: self.status(),
            });
        }
        Ok(self.decoded_body()?)
    }

    /// The decoded body, or `None` for a non-2xx response.
    ///
    /// Decode failures are returned, not turned into `None`.
    pub fn body_or_none(&self) -> Result<Option<&T>, ApiError> {
        if !self.is_success() {
            return Ok(None);
        }
        self.decoded_body().map(Some)
    }

    /// Consumes the wrapper and returns the decoded body of a 2xx response.
    pub fn into_body(mut self) -> Result<T> {
        if !self.is_success() {
            return Err(Error::NotSuccessful {
                status: self.status(),
            });
        }
        Ok(self.take_body()?)
    }

    fn decoded_body(&self) -> Result<&T, ApiError> {
        if let Some(value) = self.decoded.get() {
            return Ok(value);
        }
        let value = decode(&self.response.body)?;
        Ok(self.decoded.get_or_init(|| value))
    }

    fn take_body(&mut self) -> Result<T, ApiError> {
        match self.decoded.take() {
            Some(value) => Ok(value),
            None => decode(&self.response.body),
        }
    }
}

impl<T> fmt::Debug for ResponseWrapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWrapper")
            .field("status", &self.response.status)
            .field("body_len", &self.response.body.len())
            .field("decoded", &self.decoded.get().is_some())
            .finish()
    }
}

/// Decodes a JSON body. An empty body decodes as `null`, so `()` and
/// `Option<_>` work for bodiless responses.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let body = if body.is_empty() { b"null".as_slice() } else { body };
    serde_json::from_slice(body).map_err(ApiError::deserialization)
}
