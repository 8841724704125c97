//! Transport abstraction.
//!
//! The dispatcher only needs a way to send an [`HttpRequest`] and get back a
//! buffered [`RawResponse`]. [`ReqwestTransport`] is the default; tests swap
//! in a mock.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};

use crate::error::Error;
use crate::multipart::MultipartForm;

/// Body of an outgoing request.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Raw bytes with an explicit content type
    Bytes { content_type: String, data: Vec<u8> },
    /// Already-encoded JSON
    Json(Vec<u8>),
    /// `application/x-www-form-urlencoded` parameters
    Form(Vec<(String, String)>),
    Multipart(MultipartForm),
}

impl RequestBody {
    /// Encodes `value` as a JSON body.
    pub fn json<B: serde::Serialize + ?Sized>(value: &B) -> crate::error::Result<Self> {
        Ok(RequestBody::Json(serde_json::to_vec(value)?))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

/// An outgoing request as seen by interceptors and caller mutators.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Sets a header, replacing existing values.
    pub fn header(&mut self, name: &str, value: &str) -> crate::error::Result<&mut Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Appends a header value, keeping existing values.
    pub fn append_header(&mut self, name: &str, value: &str) -> crate::error::Result<&mut Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Appends a query parameter to the URL.
    pub fn query(&mut self, key: &str, value: &str) -> &mut Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    pub fn set_body(&mut self, body: RequestBody) -> &mut Self {
        self.body = body;
        self
    }
}

fn parse_header(name: &str, value: &str) -> crate::error::Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::InvalidHeader(format!("{}: {}", name, e)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| Error::InvalidHeader(format!("{}: {}", name, e)))?;
    Ok((name, value))
}

/// A response with its body fully read.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Headers that were actually sent, for inspection after the fact
    pub request_headers: HeaderMap,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            request_headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Sends requests on behalf of the dispatcher.
///
/// Errors are returned as `anyhow::Error`; the dispatcher downcasts them to
/// classify timeouts and connection failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<RawResponse>;
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn build(&self, request: HttpRequest) -> crate::error::Result<reqwest::Request> {
        let sent_headers = request.headers;
        let builder = self
            .client
            .request(request.method, request.url)
            .headers(sent_headers);

        let builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes { content_type, data } => {
                builder.header(CONTENT_TYPE, content_type).body(data)
            }
            RequestBody::Json(data) => builder.header(CONTENT_TYPE, "application/json").body(data),
            RequestBody::Form(params) => builder.form(&params),
            RequestBody::Multipart(form) => builder.multipart(form.into_reqwest()?),
        };
        builder
            .build()
            .map_err(|e| Error::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: HttpRequest) -> Result<RawResponse> {
        let request = self.build(request)?;
        let request_headers = request.headers().clone();

        debug!("{} {}...", request.method(), request.url());
        let response = self.client.execute(request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?
            .to_vec();

        debug!("Received {} with {} bytes", status, body.len());

        Ok(RawResponse {
            status,
            headers,
            body,
            request_headers,
        })
    }
}
