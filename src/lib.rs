//! `membership-http` is the async HTTP client used by the membership site.
//!
//! It wraps `reqwest` with:
//! - per-attempt timeouts and retries with exponential backoff
//!   ([`ApiClient::request`] and the `get`/`post`/`put`/`patch`/`delete` verbs)
//! - request and response interceptors
//! - windowed batch dispatch ([`batch_requests`])
//! - multipart uploads with progress ([`upload_file`])
//! - a bearer-token client factory ([`create_authenticated_client`]) and a
//!   test double ([`MockApiClient`])
//!
//! # Example
//!
//! ```no_run
//! use membership_http::{ApiClient, ClientConfig, QueryParams};
//! use serde_json::Value;
//!
//! # async fn run() -> membership_http::Result<()> {
//! let api = ApiClient::new(ClientConfig::new("https://api.example.org/v1"));
//! let events = api
//!     .get::<Value>("/events", QueryParams::new().append("upcoming", true))
//!     .await?;
//! println!("{}", events.data);
//! # Ok(())
//! # }
//! ```

mod auth;
mod batch;
mod body;
mod client;
mod decode;
mod error;
mod interceptor;
mod mock;
mod options;
mod params;
#[cfg(test)]
mod testing;
mod transport;
mod types;
mod upload;

pub use auth::{bearer_interceptor, create_authenticated_client};
pub use batch::{batch_requests, BatchJob, BatchOptions, DEFAULT_CONCURRENCY};
pub use body::ResponseBody;
pub use client::{backoff_delay, ApiClient};
pub use error::{ApiError, BoxError, TransportError};
pub use interceptor::{
    logging_interceptor, Interceptor, InterceptorChain, RequestInterceptor, ResponseInterceptor,
};
pub use mock::{JsonApi, MockApiClient, MockRequest};
pub use options::{ClientConfig, RequestOptions};
pub use params::{ParamValue, QueryParams};
pub use transport::{HttpRequest, RawResponse, ReqwestTransport, Transport};
pub use types::ApiResponse;
pub use upload::{upload_file, FileUploader, UploadFile, UploadOptions, UploadProgress};

pub use reqwest::{header, Method, StatusCode, Url};

pub type Result<T> = std::result::Result<T, ApiError>;
