//! Request interceptors applied to every outgoing request before auth
//! injection.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::transport::HttpRequest;

/// A hook that may mutate an outgoing request.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: &mut HttpRequest);
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut HttpRequest) + Send + Sync,
{
    fn intercept(&self, request: &mut HttpRequest) {
        self(request)
    }
}

/// Shared handle to a registered interceptor; `unregister` compares handles
/// by pointer.
pub type InterceptorHandle = Arc<dyn RequestInterceptor>;

/// Ordered list of interceptors shared by all endpoints of a client.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: Mutex<Vec<InterceptorHandle>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor and returns its handle for later removal.
    pub fn register<I>(&self, interceptor: I) -> InterceptorHandle
    where
        I: RequestInterceptor + 'static,
    {
        let handle: InterceptorHandle = Arc::new(interceptor);
        self.register_handle(Arc::clone(&handle));
        handle
    }

    /// Appends an existing handle. The same handle may be registered twice.
    pub fn register_handle(&self, handle: InterceptorHandle) {
        self.lock().push(handle);
    }

    /// Removes the first registration of `handle`. Returns whether one was found.
    pub fn unregister(&self, handle: &InterceptorHandle) -> bool {
        let mut interceptors = self.lock();
        match interceptors.iter().position(|i| Arc::ptr_eq(i, handle)) {
            Some(index) => {
                interceptors.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current list.
    pub fn snapshot(&self) -> Vec<InterceptorHandle> {
        self.lock().clone()
    }

    /// Applies a snapshot of the chain in registration order.
    ///
    /// The lock is not held while interceptors run, so an interceptor may
    /// itself register or unregister without deadlocking; such changes take
    /// effect on the next request.
    pub fn apply_all(&self, request: &mut HttpRequest) {
        for interceptor in self.snapshot() {
            interceptor.intercept(request);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<InterceptorHandle>> {
        match self.interceptors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.len())
            .finish()
    }
}

/// Ready-made interceptors for common headers.
pub mod common {
    use super::*;

    /// Appends `name: value()` to every request.
    pub fn custom_header<F>(name: impl Into<String>, value: F) -> impl RequestInterceptor
    where
        F: Fn() -> String + Send + Sync,
    {
        let name = name.into();
        move |request: &mut HttpRequest| append_or_warn(request, &name, &value())
    }

    /// Appends `X-Device-ID` when the provider returns one.
    pub fn device_id<F>(provider: F) -> impl RequestInterceptor
    where
        F: Fn() -> Option<String> + Send + Sync,
    {
        move |request: &mut HttpRequest| {
            if let Some(id) = provider() {
                append_or_warn(request, "X-Device-ID", &id);
            }
        }
    }

    /// Appends `X-Request-ID` from the generator.
    pub fn request_id<F>(generator: F) -> impl RequestInterceptor
    where
        F: Fn() -> String + Send + Sync,
    {
        move |request: &mut HttpRequest| append_or_warn(request, "X-Request-ID", &generator())
    }

    fn append_or_warn(request: &mut HttpRequest, name: &str, value: &str) {
        if let Err(e) = request.append_header(name, value) {
            warn!("Interceptor skipped header: {}", e);
        }
    }
}
