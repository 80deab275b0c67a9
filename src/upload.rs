//! Multipart file upload with byte-level progress.
//!
//! Uploads bypass the interceptor chain and the retry policy of
//! [`ApiClient`](crate::ApiClient); failures use the same [`ApiError`]
//! taxonomy.

use std::{
    collections::BTreeMap,
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    multipart::{Form, Part},
};

use crate::{decode::decode_json_or_text, ApiError, ResponseBody, Result, TransportError};

const CHUNK_SIZE: usize = 16 * 1024;

/// File contents to upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk, naming the upload after the file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());
        Ok(Self::from_bytes(file_name, bytes))
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Upload progress snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadProgress {
    /// File bytes handed to the transport so far.
    pub loaded: u64,
    pub total: u64,
    /// Whole percent in `0..=100`.
    pub percent: u8,
}

impl UploadProgress {
    fn new(loaded: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (loaded.min(total) * 100 / total) as u8
        };
        Self {
            loaded,
            total,
            percent,
        }
    }
}

type ProgressFn = dyn Fn(UploadProgress) + Send + Sync;

/// Controls a single upload.
#[derive(Clone)]
pub struct UploadOptions {
    /// Form field carrying the file.
    pub field_name: String,
    /// Extra text fields sent with the file.
    pub additional_data: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    on_progress: Option<Arc<ProgressFn>>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            field_name: "file".to_owned(),
            additional_data: Vec::new(),
            headers: BTreeMap::new(),
            timeout: None,
            on_progress: None,
        }
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("field_name", &self.field_name)
            .field("additional_data", &self.additional_data)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }

    /// Adds a text field; values are stringified.
    pub fn data(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.additional_data.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_progress(
        mut self,
        callback: impl Fn(UploadProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

struct ProgressTracker {
    total: u64,
    loaded: AtomicU64,
    finished: AtomicBool,
    callback: Option<Arc<ProgressFn>>,
}

impl ProgressTracker {
    fn new(total: u64, callback: Option<Arc<ProgressFn>>) -> Self {
        Self {
            total,
            loaded: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            callback,
        }
    }

    fn advance(&self, bytes: u64) {
        let loaded = self.loaded.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.report(loaded);
    }

    /// Emits the final 100% report unless the stream already did.
    fn finish(&self) {
        if !self.finished.load(Ordering::SeqCst) {
            self.report(self.total);
        }
    }

    fn report(&self, loaded: u64) {
        let progress = UploadProgress::new(loaded, self.total);
        if progress.percent == 100 {
            self.finished.store(true, Ordering::SeqCst);
        }
        if let Some(callback) = &self.callback {
            callback(progress);
        }
    }
}

/// Yields `bytes` in chunks, reporting each chunk as it is consumed.
fn progress_stream(
    bytes: Bytes,
    tracker: Arc<ProgressTracker>,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len())))
        .collect();

    stream::iter(chunks).map(move |chunk| {
        tracker.advance(chunk.len() as u64);
        Ok(chunk)
    })
}

/// Reusable multipart uploader.
#[derive(Clone, Debug, Default)]
pub struct FileUploader {
    http: reqwest::Client,
}

impl FileUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Uploads `file` to `url` as `multipart/form-data`.
    ///
    /// A 2xx response body is decoded as JSON, falling back to text. Other
    /// statuses fail with [`ApiError::Http`].
    pub async fn upload(
        &self,
        url: &str,
        file: UploadFile,
        options: UploadOptions,
    ) -> Result<ResponseBody> {
        let total = file.bytes.len() as u64;
        let tracker = Arc::new(ProgressTracker::new(total, options.on_progress.clone()));

        let body = reqwest::Body::wrap_stream(progress_stream(file.bytes, Arc::clone(&tracker)));
        let mut part = Part::stream_with_length(body, total).file_name(file.file_name);
        if let Some(content_type) = &file.content_type {
            part = part.mime_str(content_type).map_err(|err| {
                ApiError::Config(format!("invalid upload content type '{content_type}': {err}"))
            })?;
        }

        let mut form = Form::new().part(options.field_name.clone(), part);
        for (name, value) in options.additional_data {
            form = form.text(name, value);
        }

        let mut request = self
            .http
            .post(url)
            .headers(upload_headers(&options.headers)?)
            .multipart(form);
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let to_transport_error = |err| upload_transport_error(err, options.timeout);
        let response = request.send().await.map_err(to_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(to_transport_error)?;

        if !status.is_success() {
            return Err(ApiError::http(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                decode_json_or_text(&body),
            ));
        }

        tracker.finish();

        #[cfg(feature = "tracing")]
        tracing::debug!(url, bytes = total, status = status.as_u16(), "upload finished");

        Ok(decode_json_or_text(&body).unwrap_or(ResponseBody::Empty))
    }
}

fn upload_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ApiError::Config(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| ApiError::Config(format!("invalid value for header '{name}': {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn upload_transport_error(err: reqwest::Error, timeout: Option<Duration>) -> ApiError {
    match timeout {
        Some(timeout) if err.is_timeout() => TransportError::Timeout(timeout).into(),
        _ => TransportError::Network(err).into(),
    }
}

/// Uploads `file` with a one-off [`FileUploader`].
pub async fn upload_file(
    url: &str,
    file: UploadFile,
    options: UploadOptions,
) -> Result<ResponseBody> {
    FileUploader::new().upload(url, file, options).await
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use futures_util::StreamExt;

    use crate::{
        upload::{
            progress_stream, upload_file, ProgressTracker, UploadFile, UploadOptions,
            UploadProgress, CHUNK_SIZE,
        },
        ApiError,
    };

    fn recorder() -> (Arc<Mutex<Vec<UploadProgress>>>, UploadOptions) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = UploadOptions::new().on_progress(move |progress| {
            sink.lock().expect("lock").push(progress);
        });
        (seen, options)
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_100() {
        let (seen, options) = recorder();
        let bytes = Bytes::from(vec![7u8; CHUNK_SIZE * 3 + 10]);
        let tracker = Arc::new(ProgressTracker::new(bytes.len() as u64, options.on_progress));

        let chunks: Vec<_> = progress_stream(bytes.clone(), Arc::clone(&tracker))
            .collect()
            .await;
        tracker.finish();

        assert_eq!(chunks.len(), 4);
        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 4, "finish must not repeat the final report");
        assert!(seen.windows(2).all(|pair| pair[0].loaded <= pair[1].loaded));
        assert!(seen.windows(2).all(|pair| pair[0].percent <= pair[1].percent));
        let last = seen.last().expect("at least one report");
        assert_eq!(last.loaded, bytes.len() as u64);
        assert_eq!(last.percent, 100);
    }

    #[tokio::test]
    async fn empty_file_still_reports_completion() {
        let (seen, options) = recorder();
        let tracker = Arc::new(ProgressTracker::new(0, options.on_progress));

        let chunks: Vec<_> = progress_stream(Bytes::new(), Arc::clone(&tracker))
            .collect()
            .await;
        tracker.finish();

        assert!(chunks.is_empty());
        let seen = seen.lock().expect("lock");
        assert_eq!(
            *seen,
            vec![UploadProgress {
                loaded: 0,
                total: 0,
                percent: 100
            }]
        );
    }

    #[test]
    fn options_defaults_and_builders() {
        let options = UploadOptions::new().data("member_id", 42).field_name("avatar");
        assert_eq!(options.field_name, "avatar");
        assert_eq!(
            options.additional_data,
            vec![("member_id".to_owned(), "42".to_owned())]
        );
        assert!(UploadOptions::default().on_progress.is_none());
    }

    #[tokio::test]
    async fn invalid_header_is_rejected_before_sending() {
        let err = upload_file(
            "http://127.0.0.1:9/upload",
            UploadFile::from_bytes("kit.png", vec![1u8; 4]),
            UploadOptions::new().header("bad header", "v"),
        )
        .await
        .expect_err("must fail");

        assert!(matches!(err, ApiError::Config(_)));
        assert!(!err.is_retryable());
    }
}
