//! Authenticated HTTP endpoints with a typed error taxonomy and retry.
//!
//! ```no_run
//! use apikit::{BearerToken, Client, ClientConfig, RetryPolicy, retry_request};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Todo {
//!     title: String,
//! }
//!
//! # async fn run() -> apikit::Result<()> {
//! let client = Client::new(&ClientConfig::from_env()?)?;
//! let todos = client.endpoint("https://api.example.com/todos/1")?;
//! todos.token_holder().set_token(BearerToken::new("secret"));
//!
//! let todo: Todo = retry_request(&RetryPolicy::default(), || todos.get())
//!     .await?
//!     .into_result()?;
//! println!("{}", todo.title);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod interceptor;
pub mod multipart;
pub mod pagination;
pub mod response;
pub mod retry;
pub mod status;
pub mod token;
pub mod transport;

pub use config::ClientConfig;
pub use endpoint::{Client, Endpoint, classify_transport_error};
pub use error::{ApiError, Error, ErrorKind, Result};
pub use interceptor::{InterceptorChain, InterceptorHandle, RequestInterceptor};
pub use multipart::MultipartForm;
pub use pagination::{PageParams, PaginatedResponse, PaginationParams, has_more};
pub use response::ResponseWrapper;
pub use retry::{RetryPolicy, retry_request, with_retry};
pub use status::map_status;
pub use token::{ApiIdentity, BearerToken, DefaultApi, TokenHolder, TokenRegistry};
pub use transport::{HttpRequest, RawResponse, RequestBody, ReqwestTransport, Transport};
