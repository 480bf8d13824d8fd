//! # Application State Management
//!
//! Shared state for the HTTP layer: runtime-updatable configuration and
//! aggregate metrics. Everything here is cross-request plumbing — per-session
//! streaming state lives in `audio::session` and is never shared between
//! connections.
//!
//! ## Locking:
//! `Arc<RwLock<T>>` throughout; reads are snapshots and clones so no lock is
//! held across an await point or a response serialization.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared by every request handler and WebSocket actor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Runtime-updatable configuration.
    pub config: Arc<RwLock<AppConfig>>,

    /// Aggregate request and streaming counters.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Server start, for uptime reporting.
    pub start_time: Instant,
}

/// Aggregate counters across all connections.
///
/// These are totals only; they carry no per-session data and no references
/// into any session.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// HTTP requests processed since start.
    pub request_count: u64,

    /// Requests that ended in an error status.
    pub error_count: u64,

    /// Currently open streaming sessions.
    pub active_sessions: u32,

    /// Streaming sessions accepted since start.
    pub sessions_opened: u64,

    /// Audio windows handed to the transcription pool.
    pub windows_dispatched: u64,

    /// Windows whose transcription failed.
    pub windows_failed: u64,

    /// Transcription results delivered to clients.
    pub results_emitted: u64,

    /// Per-endpoint request statistics, keyed by "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Snapshot of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record one finished request against its endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Admit a new streaming session if the configured limit allows it.
    ///
    /// Check and increment happen under one lock so a burst of connections
    /// cannot overshoot the limit.
    pub fn try_begin_session(&self) -> Result<(), String> {
        let max = self
            .config
            .read()
            .unwrap()
            .performance
            .max_concurrent_sessions;
        let mut metrics = self.metrics.write().unwrap();

        if (metrics.active_sessions as usize) >= max {
            return Err(format!("maximum concurrent sessions ({}) reached", max));
        }

        metrics.active_sessions += 1;
        metrics.sessions_opened += 1;
        Ok(())
    }

    /// A streaming session closed.
    pub fn end_session(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record_window_dispatched(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.windows_dispatched += 1;
    }

    pub fn record_window_failed(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.windows_failed += 1;
    }

    pub fn record_result_emitted(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.results_emitted += 1;
    }

    /// Consistent copy of the metrics for serialization.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            sessions_opened: metrics.sessions_opened,
            windows_dispatched: metrics.windows_dispatched,
            windows_failed: metrics.windows_failed,
            results_emitted: metrics.results_emitted,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_limit_enforced() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 2;
        let state = AppState::new(config);

        assert!(state.try_begin_session().is_ok());
        assert!(state.try_begin_session().is_ok());
        assert!(state.try_begin_session().is_err());

        state.end_session();
        assert!(state.try_begin_session().is_ok());

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.active_sessions, 2);
        assert_eq!(snapshot.sessions_opened, 3);
    }

    #[test]
    fn test_end_session_never_underflows() {
        let state = AppState::new(AppConfig::default());
        state.end_session();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_streaming_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_window_dispatched();
        state.record_window_dispatched();
        state.record_window_failed();
        state.record_result_emitted();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.windows_dispatched, 2);
        assert_eq!(snapshot.windows_failed, 1);
        assert_eq!(snapshot.results_emitted, 1);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let state = AppState::new(AppConfig::default());
        let mut bad = AppConfig::default();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());
        assert_eq!(state.get_config().server.port, 8000);
    }
}
