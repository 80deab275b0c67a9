//! In-memory stand-in for [`ApiClient`].
//!
//! Code written against [`JsonApi`] can run against [`MockApiClient`] in
//! tests and observe the same error shapes as against a real server.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use reqwest::{header::HeaderMap, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::{
    decode::into_typed, ApiClient, ApiError, ApiResponse, QueryParams, RequestOptions, ResponseBody,
    Result,
};

/// The verb surface shared by [`ApiClient`] and [`MockApiClient`].
pub trait JsonApi: Send + Sync {
    fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send;

    fn post<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized;

    fn put<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized;

    fn patch<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized;

    fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send;
}

impl JsonApi for ApiClient {
    fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send {
        ApiClient::get(self, endpoint, options)
    }

    fn post<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        ApiClient::post(self, endpoint, data, options)
    }

    fn put<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        ApiClient::put(self, endpoint, data, options)
    }

    fn patch<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        ApiClient::patch(self, endpoint, data, options)
    }

    fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send {
        ApiClient::delete(self, endpoint, options)
    }
}

/// A call observed by [`MockApiClient`].
#[derive(Clone, Debug, PartialEq)]
pub struct MockRequest {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<serde_json::Value>,
    pub params: QueryParams,
}

type MockHandler = dyn Fn(&MockRequest) -> Result<serde_json::Value> + Send + Sync;

/// Test double answering from per-endpoint handlers.
///
/// Unregistered endpoints fail with a 404 [`ApiError::Http`].
#[derive(Default)]
pub struct MockApiClient {
    handlers: HashMap<String, Arc<MockHandler>>,
    calls: Mutex<Vec<MockRequest>>,
}

impl fmt::Debug for MockApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut endpoints: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        endpoints.sort_unstable();
        f.debug_struct("MockApiClient")
            .field("endpoints", &endpoints)
            .finish()
    }
}

impl MockApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `endpoint`, replacing any previous one.
    pub fn on<F>(&mut self, endpoint: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&MockRequest) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.handlers.insert(endpoint.into(), Arc::new(handler));
        self
    }

    /// Registers a fixed JSON payload for `endpoint`.
    pub fn on_json(
        &mut self,
        endpoint: impl Into<String>,
        payload: serde_json::Value,
    ) -> &mut Self {
        self.on(endpoint, move |_| Ok(payload.clone()))
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MockRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions>,
    ) -> Result<ApiResponse<T>> {
        self.dispatch(Method::GET, endpoint, None, options.into())
    }

    pub async fn post<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions>,
    ) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = encode(data)?;
        self.dispatch(Method::POST, endpoint, Some(body), options.into())
    }

    pub async fn put<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions>,
    ) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = encode(data)?;
        self.dispatch(Method::PUT, endpoint, Some(body), options.into())
    }

    pub async fn patch<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions>,
    ) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = encode(data)?;
        self.dispatch(Method::PATCH, endpoint, Some(body), options.into())
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions>,
    ) -> Result<ApiResponse<T>> {
        self.dispatch(Method::DELETE, endpoint, None, options.into())
    }

    fn dispatch<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>> {
        let request = MockRequest {
            method,
            endpoint: endpoint.to_owned(),
            body,
            params: options.params,
        };
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let Some(handler) = self.handlers.get(endpoint) else {
            let message = format!("no mock handler for {} {}", request.method, endpoint);
            return Err(ApiError::http(
                StatusCode::NOT_FOUND.as_u16(),
                "Not Found",
                Some(ResponseBody::Json(json!({ "message": message }))),
            ));
        };

        let payload = handler(&request)?;
        Ok(ApiResponse {
            data: into_typed(ResponseBody::Json(payload))?,
            status: StatusCode::OK.as_u16(),
            status_text: "OK".to_owned(),
            headers: HeaderMap::new(),
        })
    }
}

fn encode<B: Serialize + ?Sized>(data: &B) -> Result<serde_json::Value> {
    serde_json::to_value(data)
        .map_err(|err| ApiError::Encode(format!("invalid JSON request body: {err}")))
}

impl JsonApi for MockApiClient {
    fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send {
        MockApiClient::get(self, endpoint, options)
    }

    fn post<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        MockApiClient::post(self, endpoint, data, options)
    }

    fn put<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        MockApiClient::put(self, endpoint, data, options)
    }

    fn patch<T, B>(
        &self,
        endpoint: &str,
        data: &B,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        MockApiClient::patch(self, endpoint, data, options)
    }

    fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions> + Send,
    ) -> impl Future<Output = Result<ApiResponse<T>>> + Send {
        MockApiClient::delete(self, endpoint, options)
    }
}
