//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use omni_relay_core::config::Config;
use omni_relay_core::session::SessionConfig;
use omni_relay_upstream::UpstreamConnector;

use crate::bridge::SessionBridge;
use crate::settings::SettingsStore;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub connector: Arc<dyn UpstreamConnector>,
    pub settings: Arc<SettingsStore>,
    pub connections: RwLock<HashMap<String, ConnectionInfo>>,
    pub started_at: DateTime<Utc>,
}

/// Per-connection bookkeeping, shown on `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub conn_id: String,
    pub connected_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, connector: Arc<dyn UpstreamConnector>) -> Self {
        let settings = Arc::new(SettingsStore::new(
            config.settings_max_entries(),
            config.settings_ttl(),
        ));
        Self {
            config,
            connector,
            settings,
            connections: RwLock::new(HashMap::new()),
            started_at: Utc::now(),
        }
    }

    /// A fresh bridge for one client connection.
    pub fn new_bridge(&self) -> SessionBridge {
        let defaults = self.config.session_defaults();
        SessionBridge::new(
            self.connector.clone(),
            SessionConfig::from_defaults(&defaults),
            defaults.connect_timeout(),
        )
        .with_settings(self.settings.clone())
    }

    pub async fn register(&self, conn_id: &str) {
        self.connections.write().await.insert(
            conn_id.to_string(),
            ConnectionInfo {
                conn_id: conn_id.to_string(),
                connected_at: Utc::now(),
            },
        );
    }

    pub async fn unregister(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Open connections, oldest first.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<_> = self.connections.read().await.values().cloned().collect();
        list.sort_by_key(|c| c.connected_at);
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_relay_upstream::scripted::{ScriptedBehavior, ScriptedConnector};

    fn state() -> GatewayState {
        let (connector, _handles) = ScriptedConnector::new(ScriptedBehavior::Accept);
        GatewayState::new(Arc::new(Config::default()), Arc::new(connector))
    }

    #[tokio::test]
    async fn test_connections_listed_oldest_first() {
        let state = state();
        state.register("a").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        state.register("b").await;

        let list = state.connections().await;
        let ids: Vec<_> = list.iter().map(|c| c.conn_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(list[0].connected_at <= list[1].connected_at);

        let json = serde_json::to_value(&list[0]).unwrap();
        assert_eq!(json["conn_id"], "a");
        assert!(json["connected_at"].is_string());

        state.unregister("a").await;
        assert_eq!(state.connection_count().await, 1);
        assert_eq!(state.connections().await[0].conn_id, "b");
    }
}
