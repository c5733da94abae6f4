//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use omni_relay_core::classify::ErrorKind;

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record a new client WebSocket connection.
pub fn record_ws_connect() {
    metrics::gauge!("relay_ws_connections_active").increment(1.0);
}

/// Record a client WebSocket disconnection.
pub fn record_ws_disconnect() {
    metrics::gauge!("relay_ws_connections_active").decrement(1.0);
}

/// A bridge reached the forwarding state.
pub fn record_bridge_start() {
    metrics::gauge!("relay_bridges_active").increment(1.0);
    metrics::counter!("relay_bridges_total").increment(1);
}

pub fn record_bridge_end() {
    metrics::gauge!("relay_bridges_active").decrement(1.0);
}

/// Count one frame forwarded in `direction` ("upstream" or "downstream").
pub fn record_frame(direction: &'static str) {
    metrics::counter!("relay_frames_total", "direction" => direction).increment(1);
}

/// Record why a bridge ended.
pub fn record_termination(kind: ErrorKind) {
    metrics::counter!("relay_terminations_total", "kind" => kind.as_str()).increment(1);
}
