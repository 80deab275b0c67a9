use reqwest::header::HeaderMap;

use crate::ResponseBody;

/// Successful outcome of a request.
#[derive(Clone, Debug)]
pub struct ApiResponse<T = ResponseBody> {
    pub data: T,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// Returns the payload, discarding status and headers.
    pub fn into_data(self) -> T {
        self.data
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            data: f(self.data),
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
        }
    }
}
