//! In-memory transport for unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::future::BoxFuture;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use tokio::time::Instant;

use crate::{HttpRequest, RawResponse, Transport, TransportError};

pub(crate) enum Step {
    Respond(RawResponse),
    Delay(Duration, RawResponse),
    Fail(String),
}

impl Step {
    pub(crate) fn json(status: StatusCode, body: serde_json::Value) -> Self {
        let mut response = RawResponse::new(status, body.to_string());
        response
            .headers
            .insert(CONTENT_TYPE, "application/json".parse().expect("valid header"));
        Self::Respond(response)
    }

    pub(crate) fn status(status: StatusCode) -> Self {
        Self::Respond(RawResponse::new(status, ""))
    }
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    steps: Arc<Mutex<VecDeque<Step>>>,
    requests: Arc<Mutex<Vec<(Instant, HttpRequest)>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    pub(crate) fn hits(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Time each attempt started, relative to `origin`.
    pub(crate) fn attempt_offsets(&self, origin: Instant) -> Vec<Duration> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|(at, _)| at.duration_since(origin))
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        let url = request.url.clone();
        self.requests
            .lock()
            .expect("requests lock")
            .push((Instant::now(), request));
        let step = self
            .steps
            .lock()
            .expect("steps lock")
            .pop_front()
            .unwrap_or_else(|| Step::status(StatusCode::INTERNAL_SERVER_ERROR));

        Box::pin(async move {
            let mut response = match step {
                Step::Respond(response) => response,
                Step::Delay(delay, response) => {
                    tokio::time::sleep(delay).await;
                    response
                }
                Step::Fail(message) => return Err(TransportError::Connection(message)),
            };
            response.url.get_or_insert(url);
            Ok(response)
        })
    }
}
