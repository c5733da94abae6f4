//! Internal relay message model.
//!
//! Both wire conventions (camelCase and snake_case) decode into these types,
//! and every outbound frame is encoded from them. Audio is carried as raw
//! bytes here; base64 only exists on the wire.

use crate::classify::ErrorKind;

/// Raw media bytes with their declared MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl Blob {
    pub fn new(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// One unit of content within a model turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineData(Blob),
}

impl Part {
    /// A part with no text and no audio bytes.
    pub fn is_empty(&self) -> bool {
        match self {
            Part::Text(text) => text.is_empty(),
            Part::InlineData(blob) => blob.data.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionSource {
    /// What the user said.
    Input,
    /// What the model said.
    Output,
}

/// Session parameters a client may supply in its first `setup` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupOverrides {
    pub resumption_handle: Option<String>,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
    pub response_modalities: Option<Vec<String>>,
    pub participant_name: Option<String>,
}

/// A message travelling through the relay, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Client session setup. Only the first one has any effect.
    Setup(SetupOverrides),
    AudioChunk(Blob),
    TextTurn { text: String, is_final: bool },
    /// Model output for one turn, parts in upstream order.
    ModelTurn { parts: Vec<Part> },
    TurnComplete,
    Interrupted,
    Transcription {
        source: TranscriptionSource,
        text: String,
    },
    /// Upstream will drop the session soon; the client should reconnect
    /// with its latest resumption token.
    GoAway { time_left: Option<String> },
    SetupAck,
    ResumptionToken { handle: String },
    ErrorFrame { kind: ErrorKind, detail: String },
}

impl RelayMessage {
    /// The upstream-bound form of this message, if it has one.
    pub fn to_upstream_input(&self) -> Option<UpstreamInput> {
        match self {
            RelayMessage::AudioChunk(blob) => Some(UpstreamInput::Audio(blob.clone())),
            RelayMessage::TextTurn { text, is_final } => Some(UpstreamInput::Text {
                text: text.clone(),
                turn_complete: *is_final,
            }),
            _ => None,
        }
    }
}

/// Content sent from the client to the upstream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamInput {
    Audio(Blob),
    Text { text: String, turn_complete: bool },
}

/// One event read from the upstream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    SetupComplete,
    Content { parts: Vec<Part> },
    TurnComplete,
    Interrupted,
    Transcription {
        source: TranscriptionSource,
        text: String,
    },
    ResumptionUpdate {
        handle: Option<String>,
        resumable: bool,
    },
    GoAway { time_left: Option<String> },
}
