use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde::de::DeserializeOwned;

use crate::{ApiError, ApiResponse, RawResponse, ResponseBody};

#[derive(Debug, PartialEq, Eq)]
enum ContentKind {
    Json,
    Text,
    Binary,
    Unknown,
}

fn content_kind(headers: &HeaderMap) -> ContentKind {
    let Some(value) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return ContentKind::Unknown;
    };
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "application/json" || mime.ends_with("+json") {
        ContentKind::Json
    } else if mime.starts_with("text/") {
        ContentKind::Text
    } else if mime == "application/octet-stream" {
        ContentKind::Binary
    } else {
        ContentKind::Unknown
    }
}

/// Decodes a successful response body according to its `Content-Type`.
pub(crate) fn decode_body(response: &RawResponse) -> Result<ResponseBody, ApiError> {
    if response.body.is_empty() {
        return Ok(ResponseBody::Empty);
    }

    match content_kind(&response.headers) {
        ContentKind::Json => serde_json::from_slice(&response.body)
            .map(ResponseBody::Json)
            .map_err(|err| ApiError::Decode(format!("invalid JSON response body: {err}"))),
        ContentKind::Text => Ok(ResponseBody::Text(
            String::from_utf8_lossy(&response.body).into_owned(),
        )),
        ContentKind::Binary => Ok(ResponseBody::Binary(response.body.clone())),
        ContentKind::Unknown => Ok(match serde_json::from_slice(&response.body) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => match std::str::from_utf8(&response.body) {
                Ok(text) => ResponseBody::Text(text.to_owned()),
                Err(_) => ResponseBody::Binary(response.body.clone()),
            },
        }),
    }
}

/// Decodes a body as JSON, falling back to lossy text. Empty bodies yield
/// `None`.
pub(crate) fn decode_json_or_text(body: &[u8]) -> Option<ResponseBody> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(value) => Some(ResponseBody::Json(value)),
        Err(_) => Some(ResponseBody::Text(String::from_utf8_lossy(body).into_owned())),
    }
}

/// Builds the error for a non-success response.
pub(crate) fn status_error(response: &RawResponse) -> ApiError {
    ApiError::http(
        response.status.as_u16(),
        response.status_text(),
        decode_json_or_text(&response.body),
    )
}

/// Converts a decoded body into a caller type.
///
/// Text bodies are treated as a JSON string, empty bodies as `null`.
pub(crate) fn into_typed<T: DeserializeOwned>(body: ResponseBody) -> Result<T, ApiError> {
    let value = match body {
        ResponseBody::Empty => serde_json::Value::Null,
        ResponseBody::Json(value) => value,
        ResponseBody::Text(text) => serde_json::Value::String(text),
        ResponseBody::Binary(bytes) => {
            return Err(ApiError::Decode(format!(
                "cannot decode {} byte binary body into a typed value",
                bytes.len()
            )))
        }
    };
    serde_json::from_value(value)
        .map_err(|err| ApiError::Decode(format!("unexpected response shape: {err}")))
}

impl ApiResponse<ResponseBody> {
    /// Decodes the payload into `T`, keeping status and headers.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<ApiResponse<T>, ApiError> {
        Ok(ApiResponse {
            data: into_typed(self.data)?,
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
        })
    }
}
