//! Request counters exposed at `GET /metrics`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;

/// Lock-free counters shared by every transport.
#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    requests: AtomicU64,
    errors: AtomicU64,
    tool_calls: AtomicU64,
    handler_failures: AtomicU64,
    timeouts: AtomicU64,
    panics: AtomicU64,
    reloads: AtomicU64,
    active_sessions: AtomicU64,
    accepting: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Seconds since start-up.
    pub uptime_secs: u64,
    /// JSON-RPC requests handled.
    pub requests: u64,
    /// Requests answered with a JSON-RPC error.
    pub errors: u64,
    /// `tools/call` requests.
    pub tool_calls: u64,
    /// Invocations whose handler reported a failure.
    pub handler_failures: u64,
    /// Invocations that hit their timeout.
    pub timeouts: u64,
    /// Invocations whose handler panicked.
    pub panics: u64,
    /// Successful reloads.
    pub reloads: u64,
    /// Open sessions.
    pub active_sessions: u64,
    /// Live snapshot version.
    pub snapshot_version: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates zeroed counters; the server starts out accepting sessions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            shutdown: watch::Sender::new(false),
        }
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tool_call(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a newly opened session.
    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a closed session.
    pub fn session_closed(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Whether new sessions are accepted (`/health` reports 503 once false).
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Relaxed)
    }

    /// Marks the start of shutdown.
    pub fn begin_shutdown(&self) {
        self.accepting.store(false, Ordering::Relaxed);
        self.shutdown.send_replace(true);
    }

    /// Resolves once [`begin_shutdown`](Self::begin_shutdown) has been called.
    pub async fn shutdown_requested(&self) {
        let mut requested = self.shutdown.subscribe();
        let _ = requested.wait_for(|flag| *flag).await;
    }

    /// Seconds since start-up.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self, snapshot_version: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            snapshot_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_error();
        metrics.session_opened();

        let snap = metrics.snapshot(3);
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.active_sessions, 1);
        assert_eq!(snap.snapshot_version, 3);
    }

    #[test]
    fn session_count_never_underflows() {
        let metrics = Metrics::new();
        metrics.session_closed();
        assert_eq!(metrics.snapshot(0).active_sessions, 0);
    }

    #[test]
    fn shutdown_stops_accepting() {
        let metrics = Metrics::new();
        assert!(metrics.is_accepting());
        metrics.begin_shutdown();
        assert!(!metrics.is_accepting());
    }

    #[tokio::test]
    async fn shutdown_request_wakes_waiters() {
        let metrics = std::sync::Arc::new(Metrics::new());
        let waiter = {
            let metrics = std::sync::Arc::clone(&metrics);
            tokio::spawn(async move { metrics.shutdown_requested().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        metrics.begin_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Already requested: resolves immediately.
        metrics.shutdown_requested().await;
    }
}
