//! Result-oriented helpers on [`ResponseWrapper`].

use log::debug;
use serde::de::DeserializeOwned;

use super::ResponseWrapper;
use crate::error::ApiError;
use crate::status::{RETRY_AFTER, map_status};

impl<T: DeserializeOwned> ResponseWrapper<T> {
    /// Turns the response into a taxonomy result.
    ///
    /// A 2xx body is decoded (failures become `Deserialization`); any other
    /// status is mapped with [`map_status`], passing the `Retry-After`
    /// header through.
    pub fn into_result(self) -> Result<T, ApiError> {
        let retry_after = self.header(RETRY_AFTER).map(str::to_string);
        self.into_result_with(|status, body| {
            map_status(status, body.as_deref(), retry_after.as_deref())
        })
    }

    /// Like [`into_result`](Self::into_result) with a custom status mapper.
    pub fn into_result_with<F>(mut self, mapper: F) -> Result<T, ApiError>
    where
        F: FnOnce(u16, Option<String>) -> ApiError,
    {
        if self.is_success() {
            self.take_body()
        } else {
            Err(mapper(self.status().as_u16(), self.error_body()))
        }
    }

    /// Decodes and transforms the body, mapping failures like `into_result`.
    pub fn map_body<R, F>(self, transform: F) -> Result<R, ApiError>
    where
        F: FnOnce(T) -> R,
    {
        self.into_result().map(transform)
    }

    /// The body if the response is 2xx and decodes, else `None`.
    pub fn get_or_none(&self) -> Option<&T> {
        self.body_or_none().ok().flatten()
    }

    pub fn get_or_default(self, default: T) -> T {
        self.get_or_else(|_| default)
    }

    /// The body, or the result of `fallback` when it is unavailable.
    pub fn get_or_else<F>(mut self, fallback: F) -> T
    where
        F: FnOnce(&Self) -> T,
    {
        if self.is_success() {
            if let Ok(value) = self.take_body() {
                return value;
            }
        }
        fallback(&self)
    }

    /// Runs `action` with the body of a 2xx response.
    ///
    /// Errors from decoding or from `action` are logged and dropped.
    pub fn on_success<F>(&self, action: F) -> &Self
    where
        F: FnOnce(&T) -> anyhow::Result<()>,
    {
        if !self.is_success() {
            return self;
        }
        match self.decoded_body() {
            Ok(value) => {
                if let Err(e) = action(value) {
                    debug!("on_success action failed: {:#}", e);
                }
            }
            Err(e) => debug!("on_success skipped, body did not decode: {}", e),
        }
        self
    }

    /// Runs `action` with the status and error body of a non-2xx response.
    ///
    /// Errors from `action` are returned to the caller.
    pub fn on_failure<F, E>(&self, action: F) -> Result<&Self, E>
    where
        F: FnOnce(u16, Option<String>) -> Result<(), E>,
    {
        if !self.is_success() {
            action(self.status().as_u16(), self.error_body())?;
        }
        Ok(self)
    }
}
