//! Axum-based WebSocket server.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade, ws::WebSocket},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::client::ClientConnection;
use crate::settings::ParticipantSettings;
use crate::state::GatewayState;

const DEFAULT_PARTICIPANT: &str = "default";

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let cors = state.config.cors_allow_any_origin();

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/settings", get(get_settings).post(save_settings));
    #[cfg(feature = "metrics")]
    let app = with_metrics_route(app);

    let mut app = app.with_state(state).layer(TraceLayer::new_for_http());
    if cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

#[cfg(feature = "metrics")]
fn with_metrics_route(app: Router<Arc<GatewayState>>) -> Router<Arc<GatewayState>> {
    match crate::metrics::install_prometheus_recorder() {
        Ok(handle) => app.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            app
        }
    }
}

/// Start the gateway WebSocket server.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16, bind: &str) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket))
}

/// One client connection: register, bridge until either side ends, unregister.
async fn handle_ws_connection(state: Arc<GatewayState>, socket: WebSocket) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "Client connected");

    state.register(&conn_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    let conn = ClientConnection::from_websocket(conn_id.clone(), socket);
    let outcome = state.new_bridge().run(conn).await;

    state.unregister(&conn_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();

    info!(
        conn_id = %conn_id,
        kind = %outcome.reason.kind(),
        bridged = outcome.bridged,
        "Client disconnected"
    );
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let sessions = state.connections().await;

    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "omni-relay",
        "version": version,
        "connections": sessions.len(),
        "sessions": sessions,
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
    }))
}

#[derive(Debug, Deserialize)]
struct SettingsQuery {
    participant_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveSettingsRequest {
    participant_name: Option<String>,
    #[serde(flatten)]
    settings: ParticipantSettings,
}

fn participant_or_default(name: Option<String>) -> String {
    name.filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PARTICIPANT.to_string())
}

async fn get_settings(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<SettingsQuery>,
) -> impl IntoResponse {
    let participant = participant_or_default(query.participant_name);
    let settings = match state.settings.get(&participant) {
        Some(settings) => {
            info!(participant = %participant, "Settings retrieved");
            settings
        }
        None => {
            info!(participant = %participant, "No stored settings, returning defaults");
            ParticipantSettings::default()
        }
    };
    Json(json!({ "settings": settings }))
}

async fn save_settings(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<SaveSettingsRequest>,
) -> impl IntoResponse {
    let participant = participant_or_default(req.participant_name);
    state.settings.put(&participant, req.settings.clone());
    info!(participant = %participant, settings = ?req.settings, "Settings saved");

    Json(json!({
        "message": "Settings saved successfully",
        "settings": req.settings,
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_defaults() {
        assert_eq!(participant_or_default(None), "default");
        assert_eq!(participant_or_default(Some("  ".into())), "default");
        assert_eq!(participant_or_default(Some("ann".into())), "ann");
    }

    #[test]
    fn test_save_request_flattens_settings() {
        let req: SaveSettingsRequest = serde_json::from_str(
            r#"{"participant_name":"ann","target_lang":"German","teacher_mode":true}"#,
        )
        .unwrap();
        assert_eq!(req.participant_name.as_deref(), Some("ann"));
        assert_eq!(req.settings.target_lang, "German");
        assert!(req.settings.teacher_mode);
        assert_eq!(req.settings.selected_voice_api, "aoede");
    }
}
