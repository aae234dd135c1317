//! Prometheus metrics and the probe/metrics HTTP server

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use crds::BundleControllerState;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

const STATES: [BundleControllerState; 5] = [
    BundleControllerState::Inactive,
    BundleControllerState::Active,
    BundleControllerState::UpgradeAvailable,
    BundleControllerState::Ignored,
    BundleControllerState::Disconnected,
];

/// Reconcile counters and the owned controller's current state
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    errors: IntCounterVec,
    state: IntGaugeVec,
    ready: Arc<AtomicBool>,
}

impl Metrics {
    /// Builds and registers every collector.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be registered.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new(
                "bundle_controller_reconciles_total",
                "Reconciles of PackageBundleController resources grouped by result",
            ),
            &["result"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "bundle_controller_reconcile_errors_total",
                "Failed reconciles grouped by error kind",
            ),
            &["kind"],
        )?;
        let state = IntGaugeVec::new(
            Opts::new(
                "bundle_controller_state",
                "1 for the current state of the owned PackageBundleController",
            ),
            &["state"],
        )?;

        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(state.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            errors,
            state,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Counts a finished reconcile by outcome label.
    pub fn record_reconcile(&self, result: &str) {
        self.reconciles.with_label_values(&[result]).inc();
    }

    /// Counts a failed reconcile by error kind.
    pub fn record_error(&self, error: &ControllerError) {
        self.reconciles.with_label_values(&["error"]).inc();
        self.errors.with_label_values(&[error.kind()]).inc();
    }

    /// Sets the owned controller's state gauge, clearing the others.
    pub fn set_state(&self, current: BundleControllerState) {
        for state in STATES {
            let value = i64::from(state == current);
            self.state.with_label_values(&[state.as_str()]).set(value);
        }
    }

    /// Marks the controller ready once its watch is running.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Reconcile count for `result`.
    #[cfg(test)]
    pub fn reconciles(&self, result: &str) -> u64 {
        self.reconciles.with_label_values(&[result]).get()
    }

    /// Text exposition of every registered metric.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Metrics(e.to_string()))
    }

    /// Router serving `/metrics`, `/healthz` and `/readyz`.
    pub fn router(self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(|| async { "ok" }))
            .route("/readyz", get(ready_handler))
            .with_state(self)
    }

    /// Serves the router on `addr` until the process exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), ControllerError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ControllerError::Metrics(format!("bind {addr}: {e}")))?;
        info!("Serving metrics and probes on {}", addr);
        axum::serve(listener, self.router())
            .await
            .map_err(|e| ControllerError::Metrics(e.to_string()))
    }
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        ),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                e.to_string(),
            )
        }
    }
}

async fn ready_handler(State(metrics): State<Metrics>) -> StatusCode {
    if metrics.ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_gauge_is_one_hot() {
        let metrics = Metrics::new().unwrap();
        metrics.set_state(BundleControllerState::Disconnected);
        metrics.set_state(BundleControllerState::UpgradeAvailable);

        let text = metrics.render().unwrap();
        assert!(text.contains("bundle_controller_state{state=\"active (upgrade available)\"} 1"));
        assert!(text.contains("bundle_controller_state{state=\"disconnected\"} 0"));
    }

    #[test]
    fn test_errors_are_counted_by_kind() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile("active");
        metrics.record_error(&ControllerError::InvalidConfig("x".to_string()));

        assert_eq!(metrics.reconciles("active"), 1);
        assert_eq!(metrics.reconciles("error"), 1);
        let text = metrics.render().unwrap();
        assert!(text.contains("bundle_controller_reconcile_errors_total{kind=\"config\"} 1"));
    }

    #[tokio::test]
    async fn test_readiness_follows_flag() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(ready_handler(State(metrics.clone())).await, StatusCode::SERVICE_UNAVAILABLE);
        metrics.set_ready(true);
        assert_eq!(ready_handler(State(metrics)).await, StatusCode::OK);
    }
}
