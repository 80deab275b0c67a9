use std::{fmt, future::Future, sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::{sleep, timeout};

use crate::{
    decode::{decode_body, status_error},
    error::BoxError,
    interceptor::InterceptorChain,
    params::build_url,
    ApiError, ApiResponse, ClientConfig, HttpRequest, RawResponse, ReqwestTransport,
    RequestOptions, ResponseBody, Result, Transport, TransportError,
};

/// Delay before retry number `attempt + 1`: `base * 2^attempt`.
///
/// The exponent is capped at 16 and the multiplication saturates.
pub fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    let exp = attempt.min(16) as u32;
    base.saturating_mul(1u32 << exp)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RetryPolicy {
    retry: usize,
    retry_delay: Duration,
}

/// HTTP client with timeouts, retries and interceptors.
///
/// Interceptors are registered through `&mut self` before the client is
/// shared; cloning the client shares the transport and copies the chains.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    request_interceptors: InterceptorChain<HttpRequest>,
    response_interceptors: InterceptorChain<RawResponse>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .finish()
    }
}

impl ApiClient {
    /// Creates a client that talks HTTP through `reqwest`.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, ReqwestTransport::new())
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
            request_interceptors: InterceptorChain::new(),
            response_interceptors: InterceptorChain::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Appends an async request interceptor.
    pub fn add_request_interceptor<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<HttpRequest, BoxError>> + Send + 'static,
    {
        self.request_interceptors.push(interceptor);
    }

    /// Appends a synchronous request interceptor.
    pub fn add_request_interceptor_fn<F>(&mut self, interceptor: F)
    where
        F: Fn(HttpRequest) -> HttpRequest + Send + Sync + 'static,
    {
        self.request_interceptors.push_fn(interceptor);
    }

    /// Appends an async response interceptor.
    ///
    /// A failing response interceptor fails the attempt it ran in; the
    /// attempt is retried like a transport failure.
    pub fn add_response_interceptor<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(RawResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<RawResponse, BoxError>> + Send + 'static,
    {
        self.response_interceptors.push(interceptor);
    }

    /// Appends a synchronous response interceptor.
    pub fn add_response_interceptor_fn<F>(&mut self, interceptor: F)
    where
        F: Fn(RawResponse) -> RawResponse + Send + Sync + 'static,
    {
        self.response_interceptors.push_fn(interceptor);
    }

    /// Executes a request and decodes the payload into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions>,
    ) -> Result<ApiResponse<T>> {
        let response = self.request_body(endpoint, options).await?;
        response.into_typed()
    }

    /// Executes a request and returns the payload decoded by content type.
    pub async fn request_body(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions>,
    ) -> Result<ApiResponse<ResponseBody>> {
        let (request, policy) = self.prepare(endpoint, options.into())?;
        let request = self
            .request_interceptors
            .apply(request)
            .await
            .map_err(ApiError::RequestInterceptor)?;

        let response = self.execute(&request, policy).await?;
        let data = decode_body(&response)?;

        Ok(ApiResponse {
            data,
            status: response.status.as_u16(),
            status_text: response.status_text().to_owned(),
            headers: response.headers,
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions>,
    ) -> Result<ApiResponse<T>> {
        self.request(endpoint, options.into().method(Method::GET)).await
    }

    /// Sends `data` as a JSON body with `POST`.
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
        let options = json_options(Method::POST, data, options.into())?;
        self.request(endpoint, options).await
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
        let options = json_options(Method::PUT, data, options.into())?;
        self.request(endpoint, options).await
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
        let options = json_options(Method::PATCH, data, options.into())?;
        self.request(endpoint, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: impl Into<RequestOptions>,
    ) -> Result<ApiResponse<T>> {
        self.request(endpoint, options.into().method(Method::DELETE)).await
    }

    fn prepare(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<(HttpRequest, RetryPolicy)> {
        let url = build_url(&self.config.base_url, endpoint, &options.params)?;

        let mut headers = HeaderMap::new();
        for (name, value) in self.config.headers.iter().chain(options.headers.iter()) {
            insert_header(&mut headers, name, value)?;
        }

        let request = HttpRequest {
            method: options.method,
            url,
            headers,
            body: options.body,
            timeout: options.timeout.unwrap_or(self.config.timeout),
        };
        let policy = RetryPolicy {
            retry: options.retry.unwrap_or(self.config.retry),
            retry_delay: options.retry_delay.unwrap_or(self.config.retry_delay),
        };
        Ok((request, policy))
    }

    /// Runs up to `retry + 1` sequential attempts.
    async fn execute(&self, request: &HttpRequest, policy: RetryPolicy) -> Result<RawResponse> {
        let mut attempt = 0usize;
        loop {
            match self.attempt(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < policy.retry => {
                    let delay = backoff_delay(policy.retry_delay, attempt);

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        method = %request.method,
                        url = %request.url,
                        attempt = attempt + 1,
                        error = %err,
                        "attempt failed, retrying"
                    );

                    self.wait_before_retry(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        method = %request.method,
                        url = %request.url,
                        attempts = attempt + 1,
                        error = %err,
                        "request failed"
                    );

                    return Err(err);
                }
            }
        }
    }

    /// One transport call bounded by the request timeout. Dropping the
    /// transport future on expiry cancels only this attempt.
    async fn attempt(&self, request: &HttpRequest) -> Result<RawResponse> {
        #[cfg(feature = "tracing")]
        tracing::debug!(method = %request.method, url = %request.url, "sending request");

        let response = timeout(request.timeout, self.transport.send(request.clone()))
            .await
            .map_err(|_| TransportError::Timeout(request.timeout))??;

        let response = self
            .response_interceptors
            .apply(response)
            .await
            .map_err(ApiError::ResponseInterceptor)?;

        if !response.status.is_success() {
            return Err(status_error(&response));
        }
        Ok(response)
    }

    async fn wait_before_retry(&self, delay: Duration) {
        #[cfg(feature = "tracing")]
        tracing::debug!("retrying request after {} ms", delay.as_millis());

        sleep(delay).await;
    }
}

fn json_options<B: Serialize + ?Sized>(
    method: Method,
    data: &B,
    options: RequestOptions,
) -> Result<RequestOptions> {
    let body = serde_json::to_vec(data)
        .map_err(|err| ApiError::Encode(format!("invalid JSON request body: {err}")))?;
    let mut options = options.method(method).body(body);
    if !options.has_content_type() {
        options = options.header("Content-Type", "application/json");
    }
    Ok(options)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| ApiError::Config(format!("invalid header name '{name}': {err}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|err| ApiError::Config(format!("invalid value for header '{name}': {err}")))?;
    headers.insert(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::{header::CONTENT_TYPE, Method, StatusCode};
    use serde_json::{json, Value as JsonValue};
    use tokio::time::Instant;

    use crate::{
        backoff_delay,
        error::BoxError,
        testing::{ScriptedTransport, Step},
        ApiClient, ApiError, ClientConfig, HttpRequest, QueryParams, RawResponse, RequestOptions,
        ResponseBody,
    };

    fn client(transport: &ScriptedTransport, retry: usize, delay_ms: u64) -> ApiClient {
        ApiClient::with_transport(
            ClientConfig::new("https://api.test")
                .with_retry(retry)
                .with_retry_delay(Duration::from_millis(delay_ms))
                .with_timeout(Duration::from_secs(5)),
            transport.clone(),
        )
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(1_600));
        assert_eq!(backoff_delay(base, 40), backoff_delay(base, 16));
        assert_eq!(backoff_delay(Duration::MAX, 3), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_server_errors_then_succeeds_with_doubling_backoff() {
        let transport = ScriptedTransport::new([
            Step::status(StatusCode::INTERNAL_SERVER_ERROR),
            Step::status(StatusCode::INTERNAL_SERVER_ERROR),
            Step::json(StatusCode::OK, json!({"ok": true})),
        ]);
        let api = client(&transport, 2, 100);

        let started = Instant::now();
        let response = api
            .get::<JsonValue>("/status", ())
            .await
            .expect("third attempt must succeed");

        assert_eq!(response.data, json!({"ok": true}));
        assert_eq!(response.status, 200);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(
            transport.attempt_offsets(started),
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(300),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_fails_immediately_without_retry() {
        let transport = ScriptedTransport::new([
            Step::json(StatusCode::NOT_FOUND, json!({"message": "missing"})),
            Step::json(StatusCode::OK, json!({})),
        ]);
        let api = client(&transport, 2, 100);

        let started = Instant::now();
        let err = api
            .get::<JsonValue>("/events/9", ())
            .await
            .expect_err("404 must fail");

        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "missing");
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_failure() {
        let transport = ScriptedTransport::new([
            Step::status(StatusCode::BAD_GATEWAY),
            Step::status(StatusCode::SERVICE_UNAVAILABLE),
            Step::status(StatusCode::GATEWAY_TIMEOUT),
            Step::status(StatusCode::INTERNAL_SERVER_ERROR),
        ]);
        let api = client(&transport, 3, 10);

        let started = Instant::now();
        let err = api
            .get::<JsonValue>("/flaky", ())
            .await
            .expect_err("all attempts fail");

        assert_eq!(err.status(), Some(500));
        assert_eq!(transport.hits(), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(10 + 20 + 40));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_and_network_failures_are_retried() {
        let ok = RawResponse::new(StatusCode::OK, "done");
        let transport = ScriptedTransport::new([
            Step::Delay(Duration::from_secs(60), ok.clone()),
            Step::Fail("connection reset".to_owned()),
            Step::Respond(ok),
        ]);
        let api = client(&transport, 2, 1);

        let response = api
            .request_body("/slow", RequestOptions::new().timeout(Duration::from_millis(50)))
            .await
            .expect("third attempt must succeed");

        assert_eq!(response.data, ResponseBody::text("done"));
        assert_eq!(transport.hits(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_retry_is_transport_error() {
        let transport = ScriptedTransport::new([Step::Delay(
            Duration::from_secs(60),
            RawResponse::new(StatusCode::OK, ""),
        )]);
        let api = client(&transport, 0, 1);

        let err = api
            .request_body("/slow", RequestOptions::new().timeout(Duration::from_millis(20)))
            .await
            .expect_err("must time out");

        assert!(err.is_timeout());
        assert!(err.status().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_retry_override_wins() {
        let transport = ScriptedTransport::new([]);
        let api = client(&transport, 5, 1);

        let err = api
            .request_body("/down", RequestOptions::new().retry(1))
            .await
            .expect_err("must fail");

        assert_eq!(err.status(), Some(500));
        assert_eq!(transport.hits(), 2);
    }

    #[tokio::test]
    async fn post_sets_json_body_and_content_type() {
        let transport = ScriptedTransport::new([Step::json(StatusCode::CREATED, json!({"id": 1}))]);
        let api = client(&transport, 0, 1);

        let response = api
            .post::<JsonValue, _>("/members", &json!({"name": "Kit"}), ())
            .await
            .expect("must succeed");
        assert_eq!(response.status, 201);
        assert_eq!(response.status_text, "Created");

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.headers[CONTENT_TYPE], "application/json");
        assert_eq!(sent.body.as_deref(), Some(&br#"{"name":"Kit"}"#[..]));
    }

    #[tokio::test]
    async fn caller_content_type_is_kept() {
        let transport = ScriptedTransport::new([Step::status(StatusCode::NO_CONTENT)]);
        let api = client(&transport, 0, 1);

        api.put::<Option<JsonValue>, _>(
            "/notes/1",
            "plain",
            RequestOptions::new().header("content-type", "text/plain"),
        )
        .await
        .expect("must succeed");

        assert_eq!(transport.requests()[0].headers[CONTENT_TYPE], "text/plain");
    }

    #[tokio::test]
    async fn builds_url_and_merges_headers() {
        let transport = ScriptedTransport::new([Step::json(StatusCode::OK, json!([]))]);
        let api = ApiClient::with_transport(
            ClientConfig::new("https://api.test/v1")
                .with_header("X-Client", "web")
                .with_header("Accept", "application/json"),
            transport.clone(),
        );

        let params = QueryParams::new()
            .append("tag", vec!["a", "b"])
            .append("page", 2)
            .append("search", None::<String>);
        api.get::<JsonValue>("/events", RequestOptions::from(params).header("X-Client", "admin"))
            .await
            .expect("must succeed");

        let sent = &transport.requests()[0];
        assert_eq!(sent.url.as_str(), "https://api.test/v1/events?tag=a&tag=b&page=2");
        assert_eq!(sent.headers["x-client"], "admin");
        assert_eq!(sent.headers["accept"], "application/json");
    }

    #[tokio::test]
    async fn invalid_header_fails_before_io() {
        let transport = ScriptedTransport::new([]);
        let api = client(&transport, 0, 1);

        let err = api
            .request_body("/x", RequestOptions::new().header("bad header", "v"))
            .await
            .expect_err("must fail");

        assert!(matches!(err, ApiError::Config(_)));
        assert_eq!(transport.hits(), 0);
    }

    #[tokio::test]
    async fn request_interceptors_run_in_order_once() {
        let transport = ScriptedTransport::new([
            Step::status(StatusCode::INTERNAL_SERVER_ERROR),
            Step::json(StatusCode::OK, json!({})),
        ]);
        let mut api = client(&transport, 1, 0);
        api.add_request_interceptor_fn(|mut request| {
            request.headers.insert("x-trace", "one".parse().expect("valid header"));
            request
        });
        api.add_request_interceptor(|mut request| async move {
            let previous = request.headers["x-trace"].to_str()?.to_owned();
            request
                .headers
                .insert("x-trace", format!("{previous},two").parse()?);
            Ok::<_, BoxError>(request)
        });

        api.get::<JsonValue>("/ping", ()).await.expect("must succeed");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        for request in requests {
            assert_eq!(request.headers["x-trace"], "one,two");
        }
    }

    #[tokio::test]
    async fn failing_request_interceptor_aborts_before_any_attempt() {
        let transport = ScriptedTransport::new([Step::json(StatusCode::OK, json!({}))]);
        let mut api = client(&transport, 3, 0);
        api.add_request_interceptor(|_request| async {
            Err::<HttpRequest, BoxError>("session expired".into())
        });

        let err = api
            .get::<JsonValue>("/x", ())
            .await
            .expect_err("must fail");

        assert!(matches!(err, ApiError::RequestInterceptor(_)));
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "request interceptor error: session expired");
        assert_eq!(transport.hits(), 0);
    }

    #[tokio::test]
    async fn response_interceptor_sees_raw_response_before_classification() {
        let transport = ScriptedTransport::new([Step::status(StatusCode::SERVICE_UNAVAILABLE)]);
        let mut api = client(&transport, 0, 0);
        api.add_response_interceptor_fn(|mut response| {
            let url = response.url.as_ref().map(|url| url.as_str());
            assert_eq!(url, Some("https://api.test/x"));
            response.body = "{\"message\":\"maintenance\"}".into();
            response
        });

        let err = api
            .get::<JsonValue>("/x", ())
            .await
            .expect_err("503 stays an error");
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "maintenance");
    }

    #[tokio::test]
    async fn failing_response_interceptor_fails_the_attempt_and_retries() {
        let transport = ScriptedTransport::new([
            Step::json(StatusCode::OK, json!({"n": 1})),
            Step::json(StatusCode::OK, json!({"n": 2})),
        ]);
        let mut api = client(&transport, 1, 0);
        api.add_response_interceptor(|response: RawResponse| async move {
            if response.body.as_ref() == br#"{"n":1}"# {
                return Err("first response rejected".into());
            }
            Ok::<_, BoxError>(response)
        });

        let response = api.get::<JsonValue>("/x", ()).await.expect("must succeed");
        assert_eq!(response.data, json!({"n": 2}));
        assert_eq!(transport.hits(), 2);
    }

    #[tokio::test]
    async fn decode_failure_is_not_retried() {
        let mut bad = RawResponse::new(StatusCode::OK, "{oops");
        bad.headers
            .insert(CONTENT_TYPE, "application/json".parse().expect("valid header"));
        let transport = ScriptedTransport::new([Step::Respond(bad)]);
        let api = client(&transport, 3, 0);

        let err = api
            .get::<JsonValue>("/x", ())
            .await
            .expect_err("must fail");
        assert!(matches!(err, ApiError::Decode(_)));
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test]
    async fn debug_redacts_authorization_value() {
        let config = ClientConfig::new("https://api.test")
            .with_header("Authorization", "Bearer secret-token");
        let api = ApiClient::new(config);
        let debug = format!("{api:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }
}
