//! Background task handles and the best-effort side-channel helper.
//!
//! Speculative jobs (image prompt, ambience) and the deferred image finalizer
//! run as tokio tasks. The orchestrator joins them only at explicit points:
//! while streaming (ambience), at stream end, and in the deferred finalizer.

use crate::error::{PulseError, Result};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

/// Handle to a spawned background job.
///
/// Awaiting the handle (or calling [`TaskHandle::join`]) yields the job's
/// output; a panicked or aborted job becomes [`PulseError::Task`]. Polling by
/// reference is cancel-safe, so a handle can sit in a `tokio::select!` branch
/// across loop iterations.
pub struct TaskHandle<T> {
    label: &'static str,
    inner: JoinHandle<T>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Spawns `job` on the current runtime.
    pub fn spawn<F>(label: &'static str, job: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        debug!(task = label, "spawning background task");
        Self {
            label,
            inner: tokio::spawn(job),
        }
    }

    /// Waits for the job to finish.
    pub async fn join(self) -> Result<T> {
        self.await
    }
}

impl<T> TaskHandle<T> {
    /// Name given at spawn time, for logs.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Returns true once the job has completed (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Cancels the job. A later join reports [`PulseError::Task`].
    pub fn abort(&self) {
        self.inner.abort();
    }
}

fn task_error(label: &str, err: JoinError) -> PulseError {
    let reason = if err.is_cancelled() {
        "cancelled"
    } else {
        "panicked"
    };
    PulseError::Task {
        message: format!("{label} {reason}"),
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let label = self.label;
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|res| res.map_err(|e| task_error(label, e)))
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("label", &self.label)
            .field("finished", &self.inner.is_finished())
            .finish()
    }
}

/// Runs a side-channel operation whose failure must never reach the caller.
///
/// Errors are logged with `label` and turned into `None`.
pub async fn best_effort<T, F>(label: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(side_channel = label, error = %e, "side channel failed, degrading");
            None
        }
    }
}

/// [`best_effort`] for text results: a blank string counts as no result.
pub async fn best_effort_text<F>(label: &str, fut: F) -> Option<String>
where
    F: Future<Output = Result<String>>,
{
    let text = best_effort(label, fut).await?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        debug!(side_channel = label, "side channel returned empty text");
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Joins an optional handle, treating any task failure as "no result".
pub async fn join_optional<T: Send + 'static>(handle: Option<TaskHandle<Option<T>>>) -> Option<T> {
    let handle = handle?;
    let label = handle.label();
    match handle.join().await {
        Ok(value) => value,
        Err(e) => {
            warn!(task = label, error = %e, "background task did not complete");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_returns_output() {
        let handle = TaskHandle::spawn("double", async { 21 * 2 });
        assert_eq!(handle.label(), "double");
        assert_eq!(handle.join().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_aborted_task_reports_task_error() {
        let handle = TaskHandle::spawn("sleeper", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        handle.abort();
        match handle.join().await {
            Err(PulseError::Task { message }) => assert!(message.contains("cancelled")),
            other => panic!("expected Task error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicked_task_reports_task_error() {
        let handle = TaskHandle::spawn("boom", async {
            let empty: Vec<u8> = Vec::new();
            empty[0]
        });
        match handle.join().await {
            Err(PulseError::Task { message }) => assert!(message.contains("panicked")),
            other => panic!("expected Task error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_is_pollable_by_reference() {
        let mut handle = TaskHandle::spawn("quick", async { "done" });
        let first = tokio::select! {
            res = &mut handle => res.unwrap(),
            _ = tokio::time::sleep(Duration::from_secs(5)) => "timeout",
        };
        assert_eq!(first, "done");
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_best_effort_swallows_errors() {
        let ok = best_effort("ok", async { Ok::<_, PulseError>(5) }).await;
        assert_eq!(ok, Some(5));

        let failed = best_effort("media", async {
            Err::<u32, _>(PulseError::Media {
                message: "503".to_string(),
            })
        })
        .await;
        assert_eq!(failed, None);
    }

    #[tokio::test]
    async fn test_best_effort_text_treats_blank_as_missing() {
        let blank = best_effort_text("prompt", async { Ok("   \n".to_string()) }).await;
        assert_eq!(blank, None);

        let text = best_effort_text("prompt", async { Ok("  moonlit ruins ".to_string()) }).await;
        assert_eq!(text.as_deref(), Some("moonlit ruins"));
    }

    #[tokio::test]
    async fn test_join_optional() {
        assert_eq!(join_optional::<String>(None).await, None);

        let handle = TaskHandle::spawn("value", async { Some("x".to_string()) });
        assert_eq!(join_optional(Some(handle)).await.as_deref(), Some("x"));

        let aborted = TaskHandle::spawn("aborted", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Some(1)
        });
        aborted.abort();
        assert_eq!(join_optional(Some(aborted)).await, None);
    }
}
