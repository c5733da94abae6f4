//! Session bridge: pairs one client connection with one upstream session.
//!
//! Lifecycle is `Connecting -> Bridging -> Draining -> Closed`, forward only.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use omni_relay_core::classify::{
    CloseNotice, ErrorKind, classify_connect, classify_decode, classify_transport,
};
use omni_relay_core::error::{ConnectError, DecodeError, TransportError};
use omni_relay_core::message::{RelayMessage, SetupOverrides};
use omni_relay_core::session::SessionConfig;
use omni_relay_core::translate::{decode_inbound, encode_outbound};
use omni_relay_upstream::{UpstreamConnector, UpstreamSink};

use crate::client::{ClientConnection, ClientFrame, ClientTx};
use crate::forward::{run_downstream, run_upstream};
use crate::resumption::ResumptionState;
use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BridgeState {
    Connecting,
    Bridging,
    Draining,
    Closed,
}

/// Why a bridge ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    Connect(ConnectError),
    Decode(DecodeError),
    Transport(TransportError),
}

impl TerminationReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TerminationReason::Connect(e) => classify_connect(e),
            TerminationReason::Decode(e) => classify_decode(e),
            TerminationReason::Transport(e) => classify_transport(e),
        }
    }

    /// The client went away; there is no one left to notify.
    pub fn is_client_closed(&self) -> bool {
        matches!(self, TerminationReason::Transport(TransportError::ClientClosed))
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Connect(e) => write!(f, "{e}"),
            TerminationReason::Decode(e) => write!(f, "{e}"),
            TerminationReason::Transport(e) => write!(f, "{e}"),
        }
    }
}

/// Result of one bridge run.
#[derive(Debug)]
pub struct BridgeOutcome {
    pub reason: TerminationReason,
    /// Config the upstream session was (or would have been) opened with.
    pub config: Option<SessionConfig>,
    pub resumption: ResumptionState,
    /// Whether the forwarders ever started.
    pub bridged: bool,
}

/// Upper bound on each side's close handshake once the bridge is draining.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SessionBridge {
    connector: Arc<dyn UpstreamConnector>,
    base: SessionConfig,
    connect_timeout: Duration,
    settings: Option<Arc<SettingsStore>>,
    state: BridgeState,
}

impl SessionBridge {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        base: SessionConfig,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            base,
            connect_timeout,
            settings: None,
            state: BridgeState::Connecting,
        }
    }

    /// Consult stored participant settings when the client names itself.
    pub fn with_settings(mut self, settings: Arc<SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    fn transition(&mut self, conn_id: &str, next: BridgeState) {
        if next <= self.state {
            // Closed -> Closed is a no-op; anything else backwards is ignored.
            return;
        }
        debug!(conn_id = %conn_id, from = ?self.state, to = ?next, "Bridge state");
        self.state = next;
    }

    /// Defaults, then stored participant settings, then client overrides.
    fn session_config(&self, overrides: &SetupOverrides) -> SessionConfig {
        let mut config = self.base.clone();
        if let (Some(store), Some(name)) = (&self.settings, &overrides.participant_name) {
            if let Some(stored) = store.get(name) {
                if let Some(voice) = stored.voice_name() {
                    config = config.with_voice(voice);
                }
                if let Some(note) = stored.instruction_note() {
                    config = config.with_instruction_note(&note);
                }
            }
        }
        config.with_overrides(overrides)
    }

    /// Run the bridge to completion.
    pub async fn run(mut self, conn: ClientConnection) -> BridgeOutcome {
        let ClientConnection { id, mut tx, mut rx } = conn;

        // 1. First frame: setup overrides, plus any content to replay once bridged.
        let first = match rx.next().await {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => return self.finish_early(&id, tx, TerminationReason::Transport(e), None).await,
            None => {
                return self
                    .finish_early(&id, tx, TerminationReason::Transport(TransportError::ClientClosed), None)
                    .await;
            }
        };

        let (overrides, held) = match decode_inbound(&first) {
            Ok(messages) => split_setup(messages),
            Err(e) => {
                warn!(conn_id = %id, error = %e, "Undecodable first frame");
                return self.finish_early(&id, tx, TerminationReason::Decode(e), None).await;
            }
        };

        let config = self.session_config(&overrides);
        info!(
            conn_id = %id,
            model = %config.model,
            voice = %config.voice,
            resuming = config.is_resuming(),
            participant = overrides.participant_name.as_deref().unwrap_or("-"),
            "Opening upstream session"
        );

        // 2. Connect, bounded by the timeout.
        let connected = match tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(&config),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(self.connect_timeout)),
        };

        let upstream = match connected {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(conn_id = %id, error = %e, kind = %classify_connect(&e), "Upstream connect failed");
                return self
                    .finish_early(&id, tx, TerminationReason::Connect(e), Some(config))
                    .await;
            }
        };
        let (mut sink, events) = upstream.split();

        // 3. Tell the client it may stream.
        if tx
            .send(ClientFrame::Text(encode_outbound(&RelayMessage::SetupAck)))
            .await
            .is_err()
        {
            self.transition(&id, BridgeState::Draining);
            close_upstream(&id, sink.as_mut()).await;
            self.transition(&id, BridgeState::Closed);
            return BridgeOutcome {
                reason: TerminationReason::Transport(TransportError::ClientClosed),
                config: Some(config),
                resumption: ResumptionState::new(),
                bridged: false,
            };
        }

        // 4. Forward in both directions.
        self.transition(&id, BridgeState::Bridging);
        #[cfg(feature = "metrics")]
        crate::metrics::record_bridge_start();

        let cancel = CancellationToken::new();
        let mut events = events;
        let mut resumption = ResumptionState::new();

        // 5. First to finish decides the reason; the other sees the token and returns.
        let (first, down_end, up_end) = {
            let down = run_downstream(&id, &mut events, &mut tx, &mut resumption, &cancel);
            let up = run_upstream(&id, &mut rx, sink.as_mut(), held, &cancel);
            tokio::pin!(down, up);

            tokio::select! {
                down_end = &mut down => {
                    cancel.cancel();
                    let up_end = up.await;
                    (down_end.reason.clone(), down_end, up_end)
                }
                up_end = &mut up => {
                    cancel.cancel();
                    let down_end = down.await;
                    (up_end.reason.clone(), down_end, up_end)
                }
            }
        };
        self.transition(&id, BridgeState::Draining);

        let reason = first
            .or_else(|| down_end.reason.clone())
            .or_else(|| up_end.reason.clone())
            .unwrap_or(TerminationReason::Transport(TransportError::ClientClosed));

        close_upstream(&id, sink.as_mut()).await;
        close_client(&id, tx, &reason).await;

        self.transition(&id, BridgeState::Closed);
        #[cfg(feature = "metrics")]
        {
            crate::metrics::record_bridge_end();
            crate::metrics::record_termination(reason.kind());
        }

        info!(
            conn_id = %id,
            reason = %reason,
            kind = %reason.kind(),
            frames_up = up_end.frames,
            frames_down = down_end.frames,
            resumable = resumption.current_token().is_some(),
            "Bridge closed"
        );

        BridgeOutcome {
            reason,
            config: Some(config),
            resumption,
            bridged: true,
        }
    }

    /// End before any forwarder started: notify the client and close it.
    async fn finish_early(
        &mut self,
        conn_id: &str,
        tx: ClientTx,
        reason: TerminationReason,
        config: Option<SessionConfig>,
    ) -> BridgeOutcome {
        self.transition(conn_id, BridgeState::Draining);
        close_client(conn_id, tx, &reason).await;
        self.transition(conn_id, BridgeState::Closed);
        #[cfg(feature = "metrics")]
        crate::metrics::record_termination(reason.kind());

        info!(conn_id = %conn_id, reason = %reason, kind = %reason.kind(), "Bridge closed before streaming");
        BridgeOutcome {
            reason,
            config,
            resumption: ResumptionState::new(),
            bridged: false,
        }
    }
}

/// Separate the first setup frame from content that arrived with it.
fn split_setup(messages: Vec<RelayMessage>) -> (SetupOverrides, Vec<RelayMessage>) {
    let mut overrides = None;
    let mut held = Vec::new();
    for msg in messages {
        match msg {
            RelayMessage::Setup(o) if overrides.is_none() => overrides = Some(o),
            RelayMessage::Setup(_) => {}
            other => held.push(other),
        }
    }
    (overrides.unwrap_or_default(), held)
}

/// Close the upstream session. Called exactly once per opened session.
async fn close_upstream(conn_id: &str, sink: &mut dyn UpstreamSink) {
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(conn_id = %conn_id, error = %e, "Upstream close failed"),
        Err(_) => warn!(conn_id = %conn_id, "Upstream close timed out"),
    }
}

/// Send the error frame and close code for `reason`, then close the socket.
///
/// Bounded by [`CLOSE_TIMEOUT`]: a client that stopped reading is dropped.
async fn close_client(conn_id: &str, tx: ClientTx, reason: &TerminationReason) {
    if tokio::time::timeout(CLOSE_TIMEOUT, notify_and_close(conn_id, tx, reason))
        .await
        .is_err()
    {
        warn!(conn_id = %conn_id, "Client close timed out");
    }
}

async fn notify_and_close(conn_id: &str, mut tx: ClientTx, reason: &TerminationReason) {
    if !reason.is_client_closed() {
        let kind = reason.kind();
        let detail = reason.to_string();
        let notice = CloseNotice::new(kind, &detail);
        debug!(conn_id = %conn_id, code = notice.code, kind = %kind, "Closing client");

        let error_frame = RelayMessage::ErrorFrame { kind, detail };
        if tx
            .send(ClientFrame::Text(encode_outbound(&error_frame)))
            .await
            .is_ok()
        {
            let _ = tx.send(ClientFrame::from(&notice)).await;
        }
    }
    let _ = tx.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::channel::mpsc;
    use omni_relay_core::config::SessionDefaults;
    use omni_relay_core::message::{Blob, Part, UpstreamEvent, UpstreamInput};
    use omni_relay_core::translate::encode_audio;
    use omni_relay_upstream::UpstreamSession;
    use omni_relay_upstream::scripted::{ScriptedBehavior, ScriptedConnector, ScriptedHandle};
    use serde_json::Value;

    use crate::client::ClientRx;
    use crate::settings::ParticipantSettings;

    struct TestClient {
        to_relay: mpsc::UnboundedSender<Result<String, TransportError>>,
        from_relay: mpsc::UnboundedReceiver<ClientFrame>,
    }

    impl TestClient {
        fn send(&self, raw: &str) {
            self.to_relay.unbounded_send(Ok(raw.to_string())).unwrap();
        }

        async fn next_frame(&mut self) -> ClientFrame {
            tokio::time::timeout(Duration::from_secs(2), self.from_relay.next())
                .await
                .expect("timed out waiting for frame")
                .expect("relay closed the client channel")
        }

        async fn next_json(&mut self) -> Value {
            match self.next_frame().await {
                ClientFrame::Text(text) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    fn client() -> (ClientConnection, TestClient) {
        let (to_relay, rx) = mpsc::unbounded::<Result<String, TransportError>>();
        let (tx, from_relay) = mpsc::unbounded::<ClientFrame>();
        let tx = tx.sink_map_err(|_| TransportError::ClientClosed);
        let rx: ClientRx = Box::pin(rx);
        (
            ClientConnection::new("test-conn", Box::pin(tx), rx),
            TestClient {
                to_relay,
                from_relay,
            },
        )
    }

    fn base_config() -> SessionConfig {
        SessionConfig::from_defaults(&SessionDefaults::default())
    }

    fn bridge(behavior: ScriptedBehavior) -> (SessionBridge, tokio::sync::mpsc::UnboundedReceiver<ScriptedHandle>) {
        let (connector, handles) = ScriptedConnector::new(behavior);
        (
            SessionBridge::new(Arc::new(connector), base_config(), Duration::from_millis(300)),
            handles,
        )
    }

    async fn bridged(
        first: &str,
    ) -> (
        tokio::task::JoinHandle<BridgeOutcome>,
        TestClient,
        ScriptedHandle,
    ) {
        let (bridge, mut handles) = bridge(ScriptedBehavior::Accept);
        let (conn, mut test_client) = client();
        test_client.send(first);
        let task = tokio::spawn(bridge.run(conn));
        let ack = test_client.next_json().await;
        assert_eq!(ack, serde_json::json!({"server_content": {"setup_complete": {}}}));
        let handle = handles.recv().await.unwrap();
        (task, test_client, handle)
    }

    #[test]
    fn test_state_is_forward_only() {
        let (mut bridge, _handles) = bridge(ScriptedBehavior::Accept);
        assert_eq!(bridge.state(), BridgeState::Connecting);
        bridge.transition("c", BridgeState::Bridging);
        bridge.transition("c", BridgeState::Connecting);
        assert_eq!(bridge.state(), BridgeState::Bridging);
        bridge.transition("c", BridgeState::Closed);
        bridge.transition("c", BridgeState::Closed);
        assert_eq!(bridge.state(), BridgeState::Closed);
    }

    #[test]
    fn test_split_setup_keeps_content() {
        let audio = RelayMessage::AudioChunk(Blob::new(vec![1], "audio/pcm"));
        let (overrides, held) = split_setup(vec![audio.clone()]);
        assert_eq!(overrides, SetupOverrides::default());
        assert_eq!(held, vec![audio]);
    }

    #[tokio::test]
    async fn test_region_rejection_closes_with_code() {
        let (bridge, mut handles) = bridge(ScriptedBehavior::Reject(ConnectError::RegionUnsupported(
            "User location is not supported for the API use.".into(),
        )));
        let (conn, mut test_client) = client();
        test_client.send(r#"{"setup":{}}"#);

        let outcome = bridge.run(conn).await;
        assert!(!outcome.bridged);
        assert_eq!(outcome.reason.kind(), ErrorKind::RegionUnsupported);
        assert!(handles.try_recv().is_err());

        let error = test_client.next_json().await;
        assert_eq!(error["error"]["kind"], "region_unsupported");
        match test_client.next_frame().await {
            ClientFrame::Close { code, .. } => assert_eq!(code, 4003),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_timeout_is_upstream_internal() {
        let (bridge, _handles) = bridge(ScriptedBehavior::Hang);
        let (conn, mut test_client) = client();
        test_client.send(r#"{"setup":{}}"#);

        let outcome = bridge.run(conn).await;
        assert!(matches!(
            outcome.reason,
            TerminationReason::Connect(ConnectError::Timeout(_))
        ));
        assert_eq!(outcome.reason.kind(), ErrorKind::UpstreamInternal);
        let _error = test_client.next_json().await;
        match test_client.next_frame().await {
            ClientFrame::Close { code, .. } => assert_eq!(code, 1011),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_first_frame_is_fatal() {
        let (bridge, _handles) = bridge(ScriptedBehavior::Accept);
        let (conn, mut test_client) = client();
        test_client.send(r#"{"hello":"world"}"#);

        let outcome = bridge.run(conn).await;
        assert_eq!(outcome.reason.kind(), ErrorKind::SchemaUnrecognized);
        let _error = test_client.next_json().await;
        match test_client.next_frame().await {
            ClientFrame::Close { code, .. } => assert_eq!(code, 1007),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_realtime_input_first_frame_is_fatal() {
        let (bridge, mut handles) = bridge(ScriptedBehavior::Accept);
        let (conn, mut test_client) = client();
        test_client.send(r#"{"realtimeInput":{}}"#);

        let outcome = bridge.run(conn).await;
        assert!(!outcome.bridged);
        assert_eq!(outcome.reason.kind(), ErrorKind::SchemaUnrecognized);
        let error = test_client.next_json().await;
        assert_eq!(error["error"]["kind"], "schema_unrecognized");
        match test_client.next_frame().await {
            ClientFrame::Close { code, .. } => assert_eq!(code, 1007),
            other => panic!("expected close, got {other:?}"),
        }
        assert!(handles.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resumption_handle_reaches_connector() {
        let (task, test_client, handle) =
            bridged(r#"{"setup":{"resumption_handle":"prev-token"}}"#).await;
        assert_eq!(handle.config.resumption_handle.as_deref(), Some("prev-token"));
        drop(test_client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_audio_forwarded_upstream() {
        let (task, test_client, mut handle) = bridged(r#"{"setup":{}}"#).await;

        let bytes: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
        test_client.send(&format!(
            r#"{{"realtimeInput":{{"mediaChunks":[{{"data":"{}","mimeType":"audio/pcm;rate=16000"}}]}}}}"#,
            encode_audio(&bytes)
        ));

        let input = tokio::time::timeout(Duration::from_secs(2), handle.inputs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            input,
            UpstreamInput::Audio(Blob::new(bytes, "audio/pcm;rate=16000"))
        );

        drop(test_client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_model_turn_and_token_forwarded() {
        let (task, mut test_client, handle) = bridged(r#"{"setup":{}}"#).await;

        handle.emit(UpstreamEvent::Content {
            parts: vec![
                Part::Text("hello".into()),
                Part::InlineData(Blob::new(vec![7; 8], "audio/pcm;rate=24000")),
            ],
        });
        let turn = test_client.next_json().await;
        let parts = &turn["serverContent"]["modelTurn"]["parts"];
        assert_eq!(parts[0]["text"], "hello");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "audio/pcm;rate=24000");

        handle.emit(UpstreamEvent::ResumptionUpdate {
            handle: Some("tok-42".into()),
            resumable: true,
        });
        let token = test_client.next_json().await;
        assert_eq!(token["serverContent"]["resumptionToken"], "tok-42");

        drop(test_client);
        let outcome = task.await.unwrap();
        assert_eq!(outcome.resumption.current_token(), Some("tok-42"));
    }

    #[tokio::test]
    async fn test_client_drop_cancels_and_closes_once() {
        let (task, test_client, handle) = bridged(r#"{"setup":{}}"#).await;
        drop(test_client);

        let outcome = task.await.unwrap();
        assert_eq!(
            outcome.reason,
            TerminationReason::Transport(TransportError::ClientClosed)
        );
        assert!(outcome.bridged);
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_upstream_end_closes_client() {
        let (task, mut test_client, mut handle) = bridged(r#"{"setup":{}}"#).await;
        handle.end_events();

        let _error = test_client.next_json().await;
        match test_client.next_frame().await {
            ClientFrame::Close { code, .. } => assert_eq!(code, 1001),
            other => panic!("expected close, got {other:?}"),
        }
        let outcome = task.await.unwrap();
        assert_eq!(outcome.reason.kind(), ErrorKind::TransportClosed);
        assert_eq!(handle.close_count(), 1);
    }

    /// Upstream sink that never finishes a send.
    struct StallingSink {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl UpstreamSink for StallingSink {
        async fn send(&mut self, _input: UpstreamInput) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Accepts, then stalls every send while its event stream ends at once.
    struct StallingConnector {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl UpstreamConnector for StallingConnector {
        fn id(&self) -> &str {
            "stalling"
        }

        async fn connect(&self, _config: &SessionConfig) -> Result<UpstreamSession, ConnectError> {
            Ok(UpstreamSession::new(
                Box::new(StallingSink {
                    closes: self.closes.clone(),
                }),
                Box::pin(futures::stream::empty::<Result<UpstreamEvent, TransportError>>()),
            ))
        }
    }

    #[tokio::test]
    async fn test_stalled_upstream_send_observes_cancellation() {
        let closes = Arc::new(AtomicUsize::new(0));
        let connector = StallingConnector {
            closes: closes.clone(),
        };
        let bridge = SessionBridge::new(Arc::new(connector), base_config(), Duration::from_secs(1));
        let (conn, mut test_client) = client();
        test_client.send(&format!(
            r#"{{"realtimeInput":{{"mediaChunks":[{{"data":"{}","mimeType":"audio/pcm"}}]}}}}"#,
            encode_audio(&[0u8; 64])
        ));

        let outcome = tokio::time::timeout(Duration::from_secs(3), bridge.run(conn))
            .await
            .expect("bridge did not finish while a send was stalled");
        assert!(outcome.bridged);
        assert_eq!(outcome.reason.kind(), ErrorKind::TransportClosed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let _ack = test_client.next_json().await;
        let _error = test_client.next_json().await;
        match test_client.next_frame().await {
            ClientFrame::Close { code, .. } => assert_eq!(code, 1001),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_late_setup_ignored() {
        let (task, test_client, mut handle) =
            bridged(r#"{"setup":{"voice":"Kore"}}"#).await;
        test_client.send(r#"{"setup":{"voice":"Puck","resumption_handle":"late"}}"#);
        test_client.send(r#"{"clientContent":{"turns":[{"role":"user","parts":[{"text":"hi"}]}],"turnComplete":true}}"#);

        let input = tokio::time::timeout(Duration::from_secs(2), handle.inputs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            input,
            UpstreamInput::Text {
                text: "hi".into(),
                turn_complete: true
            }
        );
        assert_eq!(handle.config.voice, "Kore");

        drop(test_client);
        let outcome = task.await.unwrap();
        let config = outcome.config.unwrap();
        assert_eq!(config.voice, "Kore");
        assert!(config.resumption_handle.is_none());
    }

    #[tokio::test]
    async fn test_first_frame_content_is_replayed() {
        let (bridge, mut handles) = bridge(ScriptedBehavior::Accept);
        let (conn, mut test_client) = client();
        test_client.send(r#"{"clientContent":{"turns":[{"parts":[{"text":"early"}]}],"turnComplete":true}}"#);
        let task = tokio::spawn(bridge.run(conn));
        let _ack = test_client.next_json().await;
        let mut handle = handles.recv().await.unwrap();

        let input = tokio::time::timeout(Duration::from_secs(2), handle.inputs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            input,
            UpstreamInput::Text {
                text: "early".into(),
                turn_complete: true
            }
        );
        drop(test_client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_participant_settings_feed_config() {
        let store = Arc::new(SettingsStore::new(8, Duration::from_secs(60)));
        store.put(
            "ann",
            ParticipantSettings {
                selected_voice_api: "charon".into(),
                target_lang: "French".into(),
                ..Default::default()
            },
        );

        let (connector, mut handles) = ScriptedConnector::new(ScriptedBehavior::Accept);
        let bridge = SessionBridge::new(Arc::new(connector), base_config(), Duration::from_secs(1))
            .with_settings(store);
        let (conn, mut test_client) = client();
        test_client.send(r#"{"setup":{"participant_name":"ann"}}"#);
        let task = tokio::spawn(bridge.run(conn));
        let _ack = test_client.next_json().await;

        let handle = handles.recv().await.unwrap();
        assert_eq!(handle.config.voice, "Charon");
        assert!(handle
            .config
            .system_instruction
            .as_deref()
            .unwrap()
            .contains("French"));
        drop(test_client);
        task.await.unwrap();
    }
}
