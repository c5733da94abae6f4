//! Gemini Live connector.
//!
//! Opens a `BidiGenerateContent` WebSocket, sends the `setup` message built
//! from a [`SessionConfig`] and waits for `setupComplete` before handing the
//! session out. Auth is via API key in the query string.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use omni_relay_core::classify::classify_rejection;
use omni_relay_core::config::{Config, DEFAULT_API_VERSION, DEFAULT_BASE_URL};
use omni_relay_core::error::{ConnectError, TransportError};
use omni_relay_core::message::{UpstreamEvent, UpstreamInput};
use omni_relay_core::session::SessionConfig;
use omni_relay_core::translate::{decode_upstream, encode_audio};

use crate::{UpstreamConnector, UpstreamEvents, UpstreamSession, UpstreamSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct GeminiLiveConnector {
    pub base_url: String,
    pub api_version: String,
    api_key: Option<String>,
}

impl GeminiLiveConnector {
    pub fn new(api_key: Option<String>, base_url: Option<&str>, api_version: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_version: api_version.unwrap_or(DEFAULT_API_VERSION).to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.upstream_api_key(),
            Some(config.upstream_base_url().as_str()),
            Some(config.upstream_api_version().as_str()),
        )
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Endpoint URL without credentials (safe to log).
    pub fn endpoint(&self) -> String {
        format!(
            "{}/ws/google.ai.generativelanguage.{}.GenerativeService.BidiGenerateContent",
            self.base_url, self.api_version
        )
    }
}

// --- Gemini Live setup message ---

#[derive(Debug, Serialize)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_window_compression: Option<ContextWindowCompression>,
    session_resumption: SessionResumption<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: &'a [String],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextWindowCompression {
    trigger_tokens: u64,
    sliding_window: SlidingWindow,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SlidingWindow {
    target_tokens: u64,
}

/// Always sent, so upstream emits resumption updates even for a fresh session.
#[derive(Debug, Serialize)]
struct SessionResumption<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    handle: Option<&'a str>,
}

fn setup_message(config: &SessionConfig) -> SetupMessage<'_> {
    SetupMessage {
        setup: Setup {
            model: &config.model,
            generation_config: GenerationConfig {
                response_modalities: &config.response_modalities,
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &config.voice,
                        },
                    },
                },
            },
            system_instruction: config
                .system_instruction
                .as_ref()
                .map(|text| json!({ "parts": [{ "text": text }] })),
            context_window_compression: config.compression.map(|c| ContextWindowCompression {
                trigger_tokens: c.trigger_tokens,
                sliding_window: SlidingWindow {
                    target_tokens: c.target_tokens,
                },
            }),
            session_resumption: SessionResumption {
                handle: config.resumption_handle.as_deref(),
            },
            input_audio_transcription: config.input_transcription.then(|| json!({})),
            output_audio_transcription: config.output_transcription.then(|| json!({})),
        },
    }
}

fn input_message(input: &UpstreamInput) -> String {
    match input {
        UpstreamInput::Audio(blob) => json!({
            "realtimeInput": {
                "audio": { "data": encode_audio(&blob.data), "mimeType": blob.mime_type }
            }
        }),
        UpstreamInput::Text {
            text,
            turn_complete,
        } => json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                "turnComplete": turn_complete,
            }
        }),
    }
    .to_string()
}

// --- Negotiation ---

fn handshake_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            let reason = if body.trim().is_empty() {
                status.to_string()
            } else {
                body
            };
            classify_rejection(Some(status.as_u16()), &reason)
        }
        other => ConnectError::UpstreamInternal(other.to_string()),
    }
}

fn frame_text(msg: &Message) -> Option<&str> {
    match msg {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    }
}

fn close_parts(msg: &Message) -> Option<(Option<u16>, String)> {
    match msg {
        Message::Close(Some(frame)) => Some((Some(u16::from(frame.code)), frame.reason.as_str().to_string())),
        Message::Close(None) => Some((None, String::new())),
        _ => None,
    }
}

/// Read until `setupComplete`. Events before it are discarded.
async fn await_setup_complete(ws: &mut WsStream) -> Result<(), ConnectError> {
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| ConnectError::UpstreamInternal(e.to_string()))?;

        if let Some((code, reason)) = close_parts(&msg) {
            debug!(?code, %reason, "Upstream closed during setup");
            let reason = if reason.is_empty() {
                "upstream closed during setup".to_string()
            } else {
                reason
            };
            return Err(classify_rejection(None, &reason));
        }

        let Some(text) = frame_text(&msg) else {
            continue;
        };
        match decode_upstream(text) {
            Ok(events) if events.contains(&UpstreamEvent::SetupComplete) => return Ok(()),
            Ok(_) => trace!("Ignoring upstream message before setupComplete"),
            Err(e) => warn!(error = %e, "Undecodable upstream message during setup"),
        }
    }
    Err(ConnectError::UpstreamInternal(
        "upstream ended the stream during setup".into(),
    ))
}

async fn negotiate(ws: &mut WsStream, config: &SessionConfig) -> Result<(), ConnectError> {
    let setup = serde_json::to_string(&setup_message(config))
        .map_err(|e| ConnectError::UpstreamInternal(format!("setup serialization: {e}")))?;
    ws.send(Message::text(setup))
        .await
        .map_err(|e| ConnectError::UpstreamInternal(e.to_string()))?;
    await_setup_complete(ws).await
}

#[async_trait]
impl UpstreamConnector for GeminiLiveConnector {
    fn id(&self) -> &str {
        "gemini-live"
    }

    async fn connect(&self, config: &SessionConfig) -> Result<UpstreamSession, ConnectError> {
        let Some(api_key) = &self.api_key else {
            return Err(ConnectError::AuthRejected("no API key configured".into()));
        };

        debug!(
            endpoint = %self.endpoint(),
            model = %config.model,
            voice = %config.voice,
            resuming = config.is_resuming(),
            "Connecting to Gemini Live"
        );

        let url = format!("{}?key={api_key}", self.endpoint());
        let (mut ws, _) = connect_async(url.as_str()).await.map_err(handshake_error)?;

        if let Err(e) = negotiate(&mut ws, config).await {
            // Release the socket before reporting.
            let _ = ws.close(None).await;
            return Err(e);
        }

        info!(model = %config.model, "Gemini Live session established");

        let (write, read) = ws.split();
        Ok(UpstreamSession::new(
            Box::new(LiveSink { write }),
            event_stream(read),
        ))
    }
}

// --- Session halves ---

struct LiveSink {
    write: SplitSink<WsStream, Message>,
}

fn send_error(err: tungstenite::Error) -> TransportError {
    TransportError::UpstreamClosed {
        code: None,
        reason: err.to_string(),
    }
}

#[async_trait]
impl UpstreamSink for LiveSink {
    async fn send(&mut self, input: UpstreamInput) -> Result<(), TransportError> {
        self.write
            .send(Message::text(input_message(&input)))
            .await
            .map_err(send_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.write.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(send_error(e)),
        }
    }
}

struct EventState {
    read: SplitStream<WsStream>,
    pending: VecDeque<UpstreamEvent>,
    done: bool,
}

impl EventState {
    fn absorb(&mut self, text: &str) {
        match decode_upstream(text) {
            Ok(events) => self.pending.extend(events),
            Err(e) => warn!(error = %e, "Dropping undecodable upstream message"),
        }
    }
}

fn event_stream(read: SplitStream<WsStream>) -> UpstreamEvents {
    let state = EventState {
        read,
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.read.next().await {
                Some(Ok(msg)) => {
                    if let Some((code, reason)) = close_parts(&msg) {
                        state.done = true;
                        return Some((Err(TransportError::UpstreamClosed { code, reason }), state));
                    }
                    match frame_text(&msg) {
                        Some(text) => state.absorb(text),
                        None if matches!(msg, Message::Binary(_)) => {
                            warn!("Dropping non-UTF-8 binary upstream frame")
                        }
                        None => {}
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(send_error(e)), state));
                }
                None => return None,
            }
        }
    }))
}
