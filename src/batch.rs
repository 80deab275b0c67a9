//! Windowed dispatch of independent requests.

use std::{fmt, future::Future};

use futures_util::future::{try_join_all, BoxFuture};

use crate::{ApiError, Result};

/// Boxed job, for batches mixing different futures.
pub type BatchJob<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T>> + Send + 'a>;

/// Default number of jobs in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Controls [`batch_requests`].
pub struct BatchOptions<'a> {
    /// Maximum jobs in flight; also the window size.
    pub concurrency: usize,
    on_progress: Option<Box<dyn Fn(usize, usize) + Send + Sync + 'a>>,
}

impl fmt::Debug for BatchOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("concurrency", &self.concurrency)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl Default for BatchOptions<'_> {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl<'a> BatchOptions<'a> {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            on_progress: None,
        }
    }

    /// Called with `(completed, total)` after each window finishes.
    pub fn on_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }
}

/// Runs `jobs` in consecutive windows of `concurrency` jobs.
///
/// Jobs inside a window run concurrently; the next window starts only after
/// the whole window has finished. `results[i]` belongs to `jobs[i]`. The first
/// failure cancels the rest of its window, skips later windows and is
/// returned.
pub async fn batch_requests<'a, T, F, Fut>(
    jobs: impl IntoIterator<Item = F>,
    options: BatchOptions<'a>,
) -> Result<Vec<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if options.concurrency == 0 {
        return Err(ApiError::Config(
            "batch concurrency must be greater than zero".to_owned(),
        ));
    }

    let mut jobs = jobs.into_iter().collect::<Vec<_>>().into_iter();
    let total = jobs.len();
    let mut results = Vec::with_capacity(total);

    while jobs.len() > 0 {
        let window: Vec<Fut> = jobs.by_ref().take(options.concurrency).map(|job| job()).collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            window = window.len(),
            completed = results.len(),
            total,
            "dispatching batch window"
        );

        results.extend(try_join_all(window).await?);

        if let Some(on_progress) = &options.on_progress {
            on_progress(results.len(), total);
        }
    }

    Ok(results)
}
