//! Progress Sink (C7, §4.6): a narrow observation seam the engine loop
//! reports through after every job, kept separate from [`Store`] so progress
//! reporting can never perturb crawl state.
//!
//! [`Store`]: crate::store::Store

use crate::driver::ErrorKind;
use std::sync::atomic::{AtomicI64, Ordering};

/// Reported on every job the engine loop finishes, success or failure.
pub trait ProgressSink: Send + Sync {
    fn on_completed(&self, url: &str, file_size: i64, depth: i64);
    fn on_failed(&self, url: &str, kind: &ErrorKind, message: &str);
}

/// A sink that discards every event. Used in tests and anywhere the caller
/// only cares about the final [`Store`](crate::store::Store) state.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_completed(&self, _url: &str, _file_size: i64, _depth: i64) {}
    fn on_failed(&self, _url: &str, _kind: &ErrorKind, _message: &str) {}
}

/// Logs every event at `info`/`warn` via `tracing`, and keeps running totals
/// so a CLI progress line can report counts without re-querying the store.
#[derive(Default)]
pub struct TracingProgressSink {
    completed: AtomicI64,
    failed: AtomicI64,
    bytes_downloaded: AtomicI64,
}

impl TracingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed_count(&self) -> i64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> i64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn bytes_downloaded(&self) -> i64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }
}

impl ProgressSink for TracingProgressSink {
    fn on_completed(&self, url: &str, file_size: i64, depth: i64) {
        let total = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes_downloaded.fetch_add(file_size, Ordering::Relaxed);
        tracing::info!(
            url,
            file_size,
            depth,
            total_completed = total,
            "downloaded"
        );
    }

    fn on_failed(&self, url: &str, kind: &ErrorKind, message: &str) {
        let total = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(url, %kind, message, total_failed = total, "fetch failed");
    }
}
