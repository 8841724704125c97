//! Request dispatcher.
//!
//! An [`Endpoint`] is a URL bound to an API identity. Every call runs the
//! interceptor chain, injects the identity's token when no `Authorization`
//! header was set, applies the caller's mutator and sends the request. The
//! response is wrapped as is; status codes are not inspected here.

use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::{ApiError, Error, Result};
use crate::interceptor::InterceptorChain;
use crate::multipart::MultipartForm;
use crate::response::ResponseWrapper;
use crate::token::{ApiIdentity, DefaultApi, TokenHolder, TokenRegistry};
use crate::transport::{HttpRequest, RequestBody, ReqwestTransport, Transport};

/// Shared collaborators of all endpoints: transport, tokens and interceptors.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenRegistry>,
    interceptors: Arc<InterceptorChain>,
}

impl Client {
    /// Creates a client backed by reqwest, configured from `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = config.build_reqwest_client()?;
        Ok(Self::with_transport(ReqwestTransport::new(client)))
    }

    /// Creates a client with a custom transport and fresh registries.
    pub fn with_transport<T: Transport + 'static>(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            tokens: Arc::new(TokenRegistry::new()),
            interceptors: Arc::new(InterceptorChain::new()),
        }
    }

    pub fn with_tokens(mut self, tokens: Arc<TokenRegistry>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_interceptors(mut self, interceptors: Arc<InterceptorChain>) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn tokens(&self) -> &Arc<TokenRegistry> {
        &self.tokens
    }

    pub fn interceptors(&self) -> &Arc<InterceptorChain> {
        &self.interceptors
    }

    /// Binds `url` to the default identity.
    pub fn endpoint(&self, url: &str) -> Result<Endpoint> {
        Endpoint::new(self, url)
    }

    /// Binds `url` to identity `I`, which must be registered.
    pub fn endpoint_for<I: ApiIdentity>(&self, url: &str) -> Result<Endpoint<I>> {
        Endpoint::new(self, url)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("tokens", &self.tokens)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

/// A URL bound to a client and an API identity.
pub struct Endpoint<I: ApiIdentity = DefaultApi> {
    client: Client,
    url: Url,
    holder: Arc<TokenHolder>,
    _identity: PhantomData<fn() -> I>,
}

impl<I: ApiIdentity> Clone for Endpoint<I> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            url: self.url.clone(),
            holder: Arc::clone(&self.holder),
            _identity: PhantomData,
        }
    }
}

impl<I: ApiIdentity> fmt::Debug for Endpoint<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url.as_str())
            .field("identity", &I::name())
            .finish()
    }
}

impl<I: ApiIdentity> Endpoint<I> {
    /// Resolves the token holder for `I` up front, so an unregistered
    /// identity fails here rather than on the first call.
    pub fn new(client: &Client, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::Configuration(format!("Invalid endpoint URL {}: {}", url, e)))?;
        let holder = client.tokens.get_instance::<I>()?;
        Ok(Self {
            client: client.clone(),
            url,
            holder,
            _identity: PhantomData,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The token holder of this endpoint's identity.
    pub fn token_holder(&self) -> &Arc<TokenHolder> {
        &self.holder
    }

    pub async fn get<T>(&self) -> Result<ResponseWrapper<T>> {
        self.get_with(|_| {}).await
    }

    /// GET, with `mutator` applied to the request last.
    pub async fn get_with<T, M>(&self, mutator: M) -> Result<ResponseWrapper<T>>
    where
        M: FnOnce(&mut HttpRequest),
    {
        self.call(Method::GET, RequestBody::Empty, mutator).await
    }

    pub async fn post<T, B>(&self, body: &B) -> Result<ResponseWrapper<T>>
    where
        B: Serialize + ?Sized,
    {
        self.post_with(body, |_| {}).await
    }

    pub async fn post_with<T, B, M>(&self, body: &B, mutator: M) -> Result<ResponseWrapper<T>>
    where
        B: Serialize + ?Sized,
        M: FnOnce(&mut HttpRequest),
    {
        self.call(Method::POST, RequestBody::json(body)?, mutator)
            .await
    }

    pub async fn put<T, B>(&self, body: &B) -> Result<ResponseWrapper<T>>
    where
        B: Serialize + ?Sized,
    {
        self.put_with(body, |_| {}).await
    }

    pub async fn put_with<T, B, M>(&self, body: &B, mutator: M) -> Result<ResponseWrapper<T>>
    where
        B: Serialize + ?Sized,
        M: FnOnce(&mut HttpRequest),
    {
        self.call(Method::PUT, RequestBody::json(body)?, mutator)
            .await
    }

    pub async fn patch<T, B>(&self, body: &B) -> Result<ResponseWrapper<T>>
    where
        B: Serialize + ?Sized,
    {
        self.patch_with(body, |_| {}).await
    }

    pub async fn patch_with<T, B, M>(&self, body: &B, mutator: M) -> Result<ResponseWrapper<T>>
    where
        B: Serialize + ?Sized,
        M: FnOnce(&mut HttpRequest),
    {
        self.call(Method::PATCH, RequestBody::json(body)?, mutator)
            .await
    }

    pub async fn delete<T>(&self) -> Result<ResponseWrapper<T>> {
        self.delete_with(|_| {}).await
    }

    pub async fn delete_with<T, M>(&self, mutator: M) -> Result<ResponseWrapper<T>>
    where
        M: FnOnce(&mut HttpRequest),
    {
        self.call(Method::DELETE, RequestBody::Empty, mutator).await
    }

    pub async fn head(&self) -> Result<ResponseWrapper<()>> {
        self.head_with(|_| {}).await
    }

    pub async fn head_with<M>(&self, mutator: M) -> Result<ResponseWrapper<()>>
    where
        M: FnOnce(&mut HttpRequest),
    {
        self.call(Method::HEAD, RequestBody::Empty, mutator).await
    }

    pub async fn options<T>(&self) -> Result<ResponseWrapper<T>> {
        self.options_with(|_| {}).await
    }

    pub async fn options_with<T, M>(&self, mutator: M) -> Result<ResponseWrapper<T>>
    where
        M: FnOnce(&mut HttpRequest),
    {
        self.call(Method::OPTIONS, RequestBody::Empty, mutator).await
    }

    /// POSTs url-encoded form parameters.
    pub async fn submit_form<T, P, K, V>(&self, params: P) -> Result<ResponseWrapper<T>>
    where
        P: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.submit_form_with(params, |_| {}).await
    }

    pub async fn submit_form_with<T, P, K, V, M>(
        &self,
        params: P,
        mutator: M,
    ) -> Result<ResponseWrapper<T>>
    where
        P: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        M: FnOnce(&mut HttpRequest),
    {
        let params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.call(Method::POST, RequestBody::Form(params), mutator)
            .await
    }

    /// POSTs a multipart form.
    pub async fn submit_multipart<T>(&self, form: MultipartForm) -> Result<ResponseWrapper<T>> {
        self.submit_multipart_with(form, |_| {}).await
    }

    pub async fn submit_multipart_with<T, M>(
        &self,
        form: MultipartForm,
        mutator: M,
    ) -> Result<ResponseWrapper<T>>
    where
        M: FnOnce(&mut HttpRequest),
    {
        self.call(Method::POST, RequestBody::Multipart(form), mutator)
            .await
    }

    /// Sends a request with any method and body.
    ///
    /// `mutator` runs after interceptors and token injection, so it can
    /// override anything they set.
    #[tracing::instrument(skip(self, body, mutator), fields(url = %self.url, identity = I::name()))]
    pub async fn call<T, M>(
        &self,
        method: Method,
        body: RequestBody,
        mutator: M,
    ) -> Result<ResponseWrapper<T>>
    where
        M: FnOnce(&mut HttpRequest),
    {
        let request = self.prepare(method, body, mutator)?;
        debug!("Dispatching {} {}", request.method, request.url);

        let response = self
            .client
            .transport
            .send(request)
            .await
            .map_err(dispatch_error)?;

        debug!("{} responded with {}", self.url, response.status);
        Ok(ResponseWrapper::new(response))
    }

    fn prepare<M>(&self, method: Method, body: RequestBody, mutator: M) -> Result<HttpRequest>
    where
        M: FnOnce(&mut HttpRequest),
    {
        let mut request = HttpRequest::new(method, self.url.clone());
        request.set_body(body);

        self.client.interceptors.apply_all(&mut request);

        if request.headers.contains_key(AUTHORIZATION) {
            debug!("Authorization already set, not injecting token");
        } else if let Some(token) = self.holder.token_value() {
            let mut value = HeaderValue::from_str(&token)
                .map_err(|e| Error::InvalidHeader(format!("{}: {}", AUTHORIZATION, e)))?;
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
            debug!("Injected Authorization for {}", I::name());
        }

        mutator(&mut request);
        Ok(request)
    }
}

/// Turns an error from `Transport::send` into a crate error.
///
/// Crate errors raised by the transport (such as [`Error::InvalidRequest`])
/// are returned unchanged, and a reqwest builder error becomes
/// `InvalidRequest`; neither is a taxonomy error, so neither is retried.
/// Everything else is classified with [`classify_transport_error`].
fn dispatch_error(error: anyhow::Error) -> Error {
    let error = match error.downcast::<Error>() {
        Ok(error) => return error,
        Err(error) => error,
    };

    let is_builder = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(reqwest::Error::is_builder);
    if is_builder {
        warn!("Request could not be built: {:#}", error);
        return Error::InvalidRequest(format!("{:#}", error));
    }

    Error::Api(classify_transport_error(error))
}

/// Maps a transport failure onto `Timeout`, `Connection` or `Network`.
///
/// The whole cause chain is searched for reqwest, io and tokio timeout
/// errors. An [`ApiError`] returned by the transport is passed through.
pub fn classify_transport_error(error: anyhow::Error) -> ApiError {
    let error = match error.downcast::<ApiError>() {
        Ok(api_error) => return api_error,
        Err(error) => error,
    };

    let failure = failure_kind(&error);
    warn!("Transport failed ({:?}): {:#}", failure, error);
    match failure {
        TransportFailure::Timeout => ApiError::timeout_caused_by(error),
        TransportFailure::Connection => ApiError::connection(error),
        TransportFailure::Network => ApiError::network(error),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportFailure {
    Timeout,
    Connection,
    Network,
}

fn failure_kind(error: &anyhow::Error) -> TransportFailure {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() {
                return TransportFailure::Timeout;
            }
            if e.is_connect() {
                return TransportFailure::Connection;
            }
        }
        if let Some(e) = cause.downcast_ref::<io::Error>() {
            match e.kind() {
                io::ErrorKind::TimedOut => return TransportFailure::Timeout,
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected => return TransportFailure::Connection,
                _ => {}
            }
        }
        if cause.is::<tokio::time::error::Elapsed>() {
            return TransportFailure::Timeout;
        }
    }
    TransportFailure::Network
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::interceptor::common;
    use crate::token::BearerToken;
    use crate::transport::{MockTransport, RawResponse};
    use crate::retry::{RetryPolicy, retry_request, with_retry};
    use anyhow::Context;
    use reqwest::StatusCode;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SecondaryApi;
    impl ApiIdentity for SecondaryApi {}

    struct UnknownApi;
    impl ApiIdentity for UnknownApi {}

    #[derive(Debug, Deserialize, PartialEq)]
    struct Todo {
        id: u32,
    }

    const URL: &str = "https://api.example.test/todos";

    fn ok_response() -> Result<RawResponse, anyhow::Error> {
        Ok(RawResponse::new(StatusCode::OK, br#"{"id":1}"#.to_vec()))
    }

    fn auth(request: &HttpRequest) -> Option<&str> {
        request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_get_injects_token() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.method == Method::GET && auth(req) == Some("Bearer abc"))
            .times(1)
            .returning(|_| ok_response());

        let client = Client::with_transport(transport);
        let endpoint = client.endpoint(URL).unwrap();
        endpoint.token_holder().set_token(BearerToken::new("abc"));

        let response = endpoint.get::<Todo>().await.unwrap();
        assert_eq!(response.body().unwrap(), &Todo { id: 1 });
    }

    #[tokio::test]
    async fn test_injected_token_is_sensitive() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| {
                req.headers
                    .get(AUTHORIZATION)
                    .is_some_and(HeaderValue::is_sensitive)
            })
            .returning(|_| ok_response());

        let client = Client::with_transport(transport);
        client
            .tokens()
            .get_instance::<DefaultApi>()
            .unwrap()
            .set_token("raw-token");

        client.endpoint(URL).unwrap().get::<Todo>().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_token_no_header() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| !req.has_header("authorization"))
            .times(1)
            .returning(|_| ok_response());

        let client = Client::with_transport(transport);
        client.endpoint(URL).unwrap().get::<Todo>().await.unwrap();
    }

    #[tokio::test]
    async fn test_interceptor_authorization_not_overridden() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| auth(req) == Some("Basic from-interceptor"))
            .times(1)
            .returning(|_| ok_response());

        let client = Client::with_transport(transport);
        client.interceptors().register(|r: &mut HttpRequest| {
            r.header("Authorization", "Basic from-interceptor").unwrap();
        });
        let endpoint = client.endpoint(URL).unwrap();
        endpoint.token_holder().set_token(BearerToken::new("abc"));

        endpoint.get::<Todo>().await.unwrap();
    }

    #[tokio::test]
    async fn test_mutator_runs_last() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| {
                auth(req) == Some("Bearer override")
                    && req.headers.get("x-step").is_some_and(|v| v == "mutator")
                    && req.url.query() == Some("q=1")
            })
            .times(1)
            .returning(|_| ok_response());

        let client = Client::with_transport(transport);
        client
            .interceptors()
            .register(common::custom_header("X-Step", || "interceptor".to_string()));
        let endpoint = client.endpoint(URL).unwrap();
        endpoint.token_holder().set_token(BearerToken::new("abc"));

        endpoint
            .call::<Todo, _>(Method::GET, RequestBody::Empty, |req| {
                req.header("Authorization", "Bearer override").unwrap();
                req.header("X-Step", "mutator").unwrap();
                req.query("q", "1");
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_identities_are_isolated() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| auth(req) == Some("Bearer secondary"))
            .times(1)
            .returning(|_| ok_response());
        transport
            .expect_send()
            .withf(|req| auth(req) == Some("Bearer primary"))
            .times(1)
            .returning(|_| ok_response());

        let client = Client::with_transport(transport);
        client.tokens().register::<SecondaryApi, _>(TokenHolder::new);

        let primary = client.endpoint(URL).unwrap();
        let secondary = client.endpoint_for::<SecondaryApi>(URL).unwrap();
        primary.token_holder().set_token(BearerToken::new("primary"));
        secondary.token_holder().set_token(BearerToken::new("secondary"));

        secondary.get::<Todo>().await.unwrap();
        primary.get::<Todo>().await.unwrap();
    }

    #[tokio::test]
    async fn test_shared_registry_across_clients() {
        let tokens = Arc::new(TokenRegistry::new());
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| auth(req) == Some("Bearer shared"))
            .times(1)
            .returning(|_| ok_response());

        let client = Client::with_transport(transport).with_tokens(Arc::clone(&tokens));
        tokens
            .get_instance::<DefaultApi>()
            .unwrap()
            .set_token(BearerToken::new("shared"));

        client.endpoint(URL).unwrap().get::<Todo>().await.unwrap();
    }

    #[test]
    fn test_unregistered_identity_fails() {
        let client = Client::with_transport(MockTransport::new());
        let result = client.endpoint_for::<UnknownApi>(URL);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_invalid_url_fails() {
        let client = Client::with_transport(MockTransport::new());
        assert!(matches!(
            client.endpoint("not a url"),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_an_error() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|_| Ok(RawResponse::new(StatusCode::NOT_FOUND, "missing")));

        let client = Client::with_transport(transport);
        let response = client.endpoint(URL).unwrap().get::<Todo>().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.error_body().as_deref(), Some("missing"));
    }

    #[tokio::test]
    async fn test_post_put_patch_send_json() {
        let mut transport = MockTransport::new();
        for method in [Method::POST, Method::PUT, Method::PATCH] {
            transport
                .expect_send()
                .withf(move |req| {
                    req.method == method
                        && matches!(&req.body, RequestBody::Json(b) if b == br#"{"title":"x"}"#)
                })
                .times(1)
                .returning(|_| ok_response());
        }

        let client = Client::with_transport(transport);
        let endpoint = client.endpoint(URL).unwrap();
        let body = serde_json::json!({"title": "x"});
        endpoint.post::<Todo, _>(&body).await.unwrap();
        endpoint.put::<Todo, _>(&body).await.unwrap();
        endpoint.patch::<Todo, _>(&body).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_head_options() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.method == Method::DELETE && req.body.is_empty())
            .returning(|_| Ok(RawResponse::new(StatusCode::NO_CONTENT, Vec::new())));
        transport
            .expect_send()
            .withf(|req| req.method == Method::HEAD)
            .returning(|_| Ok(RawResponse::new(StatusCode::OK, Vec::new())));
        transport
            .expect_send()
            .withf(|req| req.method == Method::OPTIONS)
            .returning(|_| Ok(RawResponse::new(StatusCode::NO_CONTENT, Vec::new())));

        let client = Client::with_transport(transport);
        let endpoint = client.endpoint(URL).unwrap();
        assert!(endpoint.delete::<()>().await.unwrap().body().is_ok());
        assert!(endpoint.head().await.unwrap().is_success());
        assert!(endpoint.options::<()>().await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_submit_form_and_multipart() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| {
                matches!(&req.body, RequestBody::Form(p)
                    if p == &vec![("user".to_string(), "alice".to_string())])
            })
            .times(1)
            .returning(|_| ok_response());
        transport
            .expect_send()
            .withf(|req| matches!(&req.body, RequestBody::Multipart(f) if f.len() == 2))
            .times(1)
            .returning(|_| ok_response());

        let client = Client::with_transport(transport);
        let endpoint = client.endpoint(URL).unwrap();
        endpoint.submit_form::<Todo, _, _, _>([("user", "alice")]).await.unwrap();
        endpoint
            .submit_multipart::<Todo>(
                MultipartForm::new()
                    .text("title", "t")
                    .file("file", "a.txt", "text/plain", b"abc".to_vec()),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transport_error_is_classified() {
        let mut transport = MockTransport::new();
        transport.expect_send().returning(|_| {
            Err(anyhow::Error::from(io::Error::from(io::ErrorKind::ConnectionRefused)))
        });

        let client = Client::with_transport(transport);
        let err = client.endpoint(URL).unwrap().get::<Todo>().await.unwrap_err();
        assert_eq!(err.as_api_error().unwrap().kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_classify_io_errors() {
        let timeout = anyhow::Error::from(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(classify_transport_error(timeout).kind(), ErrorKind::Timeout);

        let reset = anyhow::Error::from(io::Error::from(io::ErrorKind::ConnectionReset))
            .context("while reading body");
        assert_eq!(classify_transport_error(reset).kind(), ErrorKind::Connection);

        let other = anyhow::anyhow!("tls handshake failed");
        assert_eq!(classify_transport_error(other).kind(), ErrorKind::Network);
    }

    #[test]
    fn test_classify_passes_api_error_through() {
        let err = anyhow::Error::from(ApiError::service_unavailable());
        assert_eq!(
            classify_transport_error(err).kind(),
            ErrorKind::ServiceUnavailable
        );
    }

    #[tokio::test]
    async fn test_classify_tokio_elapsed() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let err = Err::<(), _>(elapsed).context("request timed out").unwrap_err();
        assert_eq!(classify_transport_error(err).kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_classify_reqwest_connect_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = Client::new(&ClientConfig::default()).unwrap();
        let err = client
            .endpoint(&format!("http://127.0.0.1:{}/", port))
            .unwrap()
            .get::<Todo>()
            .await
            .unwrap_err();
        assert_eq!(err.as_api_error().unwrap().kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_verb_mutators_run_last() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| {
                req.method == Method::GET
                    && auth(req) == Some("Basic override")
                    && req.headers.get("x-trace").is_some_and(|v| v == "get")
            })
            .times(1)
            .returning(|_| ok_response());
        transport
            .expect_send()
            .withf(|req| {
                req.method == Method::POST
                    && req.headers.get("x-trace").is_some_and(|v| v == "post")
                    && matches!(&req.body, RequestBody::Json(b) if b == br#"{"title":"x"}"#)
            })
            .times(1)
            .returning(|_| ok_response());
        transport
            .expect_send()
            .withf(|req| req.method == Method::DELETE && req.url.query() == Some("force=true"))
            .times(1)
            .returning(|_| Ok(RawResponse::new(StatusCode::NO_CONTENT, Vec::new())));

        let client = Client::with_transport(transport);
        let endpoint = client.endpoint(URL).unwrap();
        endpoint.token_holder().set_token(BearerToken::new("abc"));

        endpoint
            .get_with::<Todo, _>(|req| {
                req.header("Authorization", "Basic override").unwrap();
                req.header("X-Trace", "get").unwrap();
            })
            .await
            .unwrap();
        endpoint
            .post_with::<Todo, _, _>(&serde_json::json!({"title": "x"}), |req| {
                req.header("X-Trace", "post").unwrap();
            })
            .await
            .unwrap();
        endpoint
            .delete_with::<(), _>(|req| {
                req.query("force", "true");
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transport_crate_error_passes_through() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Err(Error::InvalidRequest("bad body".to_string()).into()));

        let client = Client::with_transport(transport);
        let err = client.endpoint(URL).unwrap().get::<Todo>().await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(err.as_api_error().is_none());
    }

    #[tokio::test]
    async fn test_unbuildable_request_is_not_retried() {
        let attempts = AtomicUsize::new(0);
        let client = Client::new(&ClientConfig::default()).unwrap();
        let endpoint = client.endpoint("http://127.0.0.1:9/upload").unwrap();
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5), 2.0)
            .unwrap();

        let result = with_retry(&policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            endpoint.submit_multipart::<()>(MultipartForm::new().file(
                "f",
                "a.txt",
                "not a mime",
                b"x".to_vec(),
            ))
        })
        .await;

        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    struct StalledTransport {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Transport for StalledTransport {
        async fn send(&self, _request: HttpRequest) -> anyhow::Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_request_cancelled_during_send() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Client::with_transport(StalledTransport {
            calls: Arc::clone(&calls),
        });
        let endpoint = client.endpoint(URL).unwrap();
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(10), 1.0)
            .unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            retry_request(&policy, || endpoint.get::<Todo>()),
        )
        .await;
        assert!(outcome.is_err());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_with_mockito() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/todos/1")
            .match_header("authorization", "Bearer live")
            .match_header("x-request-id", "req-1")
            .with_status(200)
            .with_body(r#"{"id":1}"#)
            .create_async()
            .await;

        let client = Client::new(&ClientConfig::default()).unwrap();
        client
            .interceptors()
            .register(common::request_id(|| "req-1".to_string()));
        let endpoint = client
            .endpoint(&format!("{}/todos/1", server.url()))
            .unwrap();
        endpoint.token_holder().set_token(BearerToken::new("live"));

        let todo = endpoint.get::<Todo>().await.unwrap().into_result().unwrap();

        mock.assert_async().await;
        assert_eq!(todo, Todo { id: 1 });
    }
}
