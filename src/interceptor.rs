//! Request and response interceptors.
//!
//! An interceptor takes a value and returns the (possibly modified) value.
//! Interceptors run one after another in registration order; each result is
//! the input of the next.

use std::{fmt, future::Future, sync::Arc};

use futures_util::future::BoxFuture;
#[cfg(feature = "tracing")]
use reqwest::Url;

use crate::{error::BoxError, HttpRequest, RawResponse};

/// Async transform stored in an [`InterceptorChain`].
pub type Interceptor<T> =
    dyn Fn(T) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync;

pub type RequestInterceptor = Interceptor<HttpRequest>;
pub type ResponseInterceptor = Interceptor<RawResponse>;

/// Append-only ordered list of interceptors.
pub struct InterceptorChain<T> {
    interceptors: Vec<Arc<Interceptor<T>>>,
}

impl<T> Default for InterceptorChain<T> {
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }
}

impl<T> Clone for InterceptorChain<T> {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
        }
    }
}

impl<T> fmt::Debug for InterceptorChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

impl<T: Send + 'static> InterceptorChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Appends an async interceptor.
    pub fn push<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.interceptors.push(Arc::new(
            move |value| -> BoxFuture<'static, Result<T, BoxError>> {
                Box::pin(interceptor(value))
            },
        ));
    }

    /// Appends a synchronous, infallible interceptor.
    pub fn push_fn<F>(&mut self, interceptor: F)
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let interceptor = Arc::new(interceptor);
        self.push(move |value| {
            let interceptor = Arc::clone(&interceptor);
            async move { Ok::<T, BoxError>(interceptor(value)) }
        });
    }

    /// Threads `value` through every interceptor in order, stopping at the
    /// first failure.
    pub async fn apply(&self, mut value: T) -> Result<T, BoxError> {
        for interceptor in &self.interceptors {
            value = interceptor(value).await?;
        }
        Ok(value)
    }
}

/// Response interceptor that logs status, URL and size of every raw response.
///
/// Without the `tracing` feature this passes responses through unchanged.
pub fn logging_interceptor() -> impl Fn(RawResponse) -> RawResponse + Send + Sync + 'static {
    |response: RawResponse| {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            target: "membership_http::response",
            status = response.status.as_u16(),
            url = response.url.as_ref().map_or("", Url::as_str),
            bytes = response.body.len(),
            "response received"
        );
        response
    }
}
