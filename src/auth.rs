use futures_util::future::{ready, Ready};
use reqwest::header::{HeaderValue, AUTHORIZATION};

use crate::{error::BoxError, ApiClient, ClientConfig, HttpRequest};

/// Creates a client that sends `Authorization: Bearer <token>` on every
/// request for which `get_token` returns a non-empty token.
///
/// `get_token` runs once per request, so a rotated token is picked up by the
/// next call without rebuilding the client.
///
/// # Example
///
/// ```no_run
/// use membership_http::{create_authenticated_client, ClientConfig};
///
/// let api = create_authenticated_client(ClientConfig::new("https://api.example.org"), || {
///     std::env::var("MEMBER_TOKEN").ok()
/// });
/// ```
pub fn create_authenticated_client<F>(config: ClientConfig, get_token: F) -> ApiClient
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    let mut client = ApiClient::new(config);
    client.add_request_interceptor(bearer_interceptor(get_token));
    client
}

/// Request interceptor injecting a bearer token from `get_token`.
///
/// Requests pass through unchanged when there is no token. A token that cannot
/// be sent as a header value fails the call instead of going out without it.
pub fn bearer_interceptor<F>(
    get_token: F,
) -> impl Fn(HttpRequest) -> Ready<Result<HttpRequest, BoxError>> + Send + Sync + 'static
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    move |request: HttpRequest| ready(authorize(request, get_token()))
}

fn authorize(mut request: HttpRequest, token: Option<String>) -> Result<HttpRequest, BoxError> {
    let Some(token) = token.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(request);
    };
    let mut value = HeaderValue::from_str(&normalize_bearer_authorization(token))
        .map_err(|err| format!("bearer token is not a valid header value: {err}"))?;
    value.set_sensitive(true);
    request.headers.insert(AUTHORIZATION, value);
    Ok(request)
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
