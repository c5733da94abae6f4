//! Wire shapes for the relay's JSON frames.
//!
//! Each struct names its camelCase key through `rename_all` and lists the
//! snake_case spelling as a serde `alias`, so the accepted key pairs are fixed
//! at compile time. Unknown keys are ignored.

use serde::Deserialize;

// --- Client -> relay ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrameWire {
    #[serde(default)]
    pub setup: Option<SetupWire>,
    #[serde(default, alias = "realtime_input")]
    pub realtime_input: Option<RealtimeInputWire>,
    #[serde(default, alias = "client_content")]
    pub client_content: Option<ClientContentWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupWire {
    #[serde(default, alias = "resumption_handle")]
    pub resumption_handle: Option<String>,
    #[serde(default, alias = "session_resumption")]
    pub session_resumption: Option<SessionResumptionWire>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default, alias = "system_instruction")]
    pub system_instruction: Option<InstructionWire>,
    #[serde(default, alias = "response_modalities")]
    pub response_modalities: Option<Vec<String>>,
    #[serde(default, alias = "participant_name")]
    pub participant_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionResumptionWire {
    #[serde(default)]
    pub handle: Option<String>,
}

/// A system instruction given either as plain text or as a content object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InstructionWire {
    Text(String),
    Content(ContentWire),
}

impl InstructionWire {
    pub fn into_text(self) -> String {
        match self {
            InstructionWire::Text(text) => text,
            InstructionWire::Content(content) => content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputWire {
    #[serde(default, alias = "media_chunks")]
    pub media_chunks: Vec<BlobWire>,
    #[serde(default)]
    pub audio: Option<BlobWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContentWire {
    #[serde(default)]
    pub turns: Vec<ContentWire>,
    #[serde(default, alias = "turn_complete")]
    pub turn_complete: bool,
}

// --- Shared ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentWire {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<PartWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartWire {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "inline_data")]
    pub inline_data: Option<BlobWire>,
}

/// Base64 payload plus MIME type.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobWire {
    pub data: String,
    #[serde(alias = "mime_type")]
    pub mime_type: String,
}

// --- Upstream -> relay ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamMessageWire {
    #[serde(default, alias = "setup_complete")]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default, alias = "server_content")]
    pub server_content: Option<ServerContentWire>,
    #[serde(default, alias = "session_resumption_update")]
    pub session_resumption_update: Option<ResumptionUpdateWire>,
    #[serde(default, alias = "go_away")]
    pub go_away: Option<GoAwayWire>,
    #[serde(default, alias = "usage_metadata")]
    pub usage_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContentWire {
    #[serde(default, alias = "model_turn")]
    pub model_turn: Option<ContentWire>,
    #[serde(default, alias = "turn_complete")]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default, alias = "input_transcription")]
    pub input_transcription: Option<TranscriptionWire>,
    #[serde(default, alias = "output_transcription")]
    pub output_transcription: Option<TranscriptionWire>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TranscriptionWire {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumptionUpdateWire {
    #[serde(default, alias = "new_handle")]
    pub new_handle: Option<String>,
    #[serde(default)]
    pub resumable: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAwayWire {
    #[serde(default, alias = "time_left")]
    pub time_left: Option<String>,
}
