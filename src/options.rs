use std::{collections::BTreeMap, fmt, time::Duration};

use bytes::Bytes;
use reqwest::Method;

use crate::{ApiError, ParamValue, QueryParams};

/// Client-wide defaults, fixed once the client is built.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Prefix joined with every endpoint.
    pub base_url: String,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Number of retries after the initial attempt.
    pub retry: usize,
    /// Base delay for exponential backoff.
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
            retry: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: BTreeMap<&str, &str> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case("authorization") {
                    (name.as_str(), "<redacted>")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("headers", &headers)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds a config from environment variables.
    ///
    /// Reads:
    /// - `API_BASE_URL` (required)
    /// - `API_TIMEOUT_MS`, `API_RETRY`, `API_RETRY_DELAY_MS` (optional)
    pub fn from_env() -> Result<Self, ApiError> {
        let base_url = std::env::var("API_BASE_URL")
            .map_err(|_| ApiError::Config("missing API_BASE_URL environment variable".to_owned()))?;
        if base_url.trim().is_empty() {
            return Err(ApiError::Config("API_BASE_URL is set but empty".to_owned()));
        }

        let mut config = Self::new(base_url.trim());
        if let Some(ms) = env_number("API_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(retry) = env_number("API_RETRY")? {
            config.retry = usize::try_from(retry)
                .map_err(|_| ApiError::Config(format!("API_RETRY out of range: {retry}")))?;
        }
        if let Some(ms) = env_number("API_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: usize) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

fn env_number(name: &str) -> Result<Option<u64>, ApiError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| ApiError::Config(format!("invalid {name} '{raw}': {err}"))),
        _ => Ok(None),
    }
}

/// Per-call overrides merged over [`ClientConfig`] at call time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
    pub params: QueryParams,
    pub timeout: Option<Duration>,
    pub retry: Option<usize>,
    pub retry_delay: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: BTreeMap::new(),
            body: None,
            params: QueryParams::new(),
            timeout: None,
            retry: None,
            retry_delay: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.push(key, value);
        self
    }

    pub fn params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: usize) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    /// True when the caller already chose a `Content-Type`.
    pub(crate) fn has_content_type(&self) -> bool {
        self.headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"))
    }
}

impl From<()> for RequestOptions {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<QueryParams> for RequestOptions {
    fn from(params: QueryParams) -> Self {
        Self::default().params(params)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Method;

    use crate::{ClientConfig, RequestOptions};

    #[test]
    fn config_defaults() {
        let config = ClientConfig::new("https://api.example.org");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert!(config.headers.is_empty());
    }

    #[test]
    fn debug_redacts_authorization_header() {
        let config = ClientConfig::new("https://api.example.org")
            .with_header("Authorization", "Bearer secret-token")
            .with_header("X-Client", "web");
        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("X-Client"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn request_options_builders() {
        let options = RequestOptions::new()
            .method(Method::PATCH)
            .header("content-type", "text/plain")
            .param("page", 1)
            .timeout(Duration::from_millis(50))
            .retry(0);

        assert_eq!(options.method, Method::PATCH);
        assert!(options.has_content_type());
        assert!(!options.params.is_empty());
        assert_eq!(options.timeout, Some(Duration::from_millis(50)));
        assert_eq!(options.retry, Some(0));
        assert_eq!(options.retry_delay, None);
    }

    #[test]
    fn unit_converts_to_default_options() {
        let options: RequestOptions = ().into();
        assert_eq!(options, RequestOptions::default());
    }
}
