use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::{header::HeaderMap, Method, StatusCode, Url};

use crate::TransportError;

/// Outgoing request as seen by request interceptors and transports.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Timeout applied to each attempt of this request.
    pub timeout: Duration,
}

/// Undecoded response as seen by response interceptors.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    /// Final URL of the exchange, after redirects.
    pub url: Option<Url>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            url: None,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Canonical reason phrase for the status, or an empty string.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }
}

/// Performs one HTTP exchange.
///
/// Implementations read the whole body before resolving so that the
/// per-attempt timeout also bounds the body read.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>>;
}

/// Default transport backed by `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        Box::pin(async move {
            let mut builder = self
                .http
                .request(request.method, request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(TransportError::Network)?;
            let status = response.status();
            let url = response.url().clone();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(TransportError::Network)?;

            Ok(RawResponse {
                status,
                url: Some(url),
                headers,
                body,
            })
        })
    }
}
