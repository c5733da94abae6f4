//! Upstream session parameters.

use serde::{Deserialize, Serialize};

use crate::config::SessionDefaults;
use crate::message::SetupOverrides;

/// Sliding-window context compression applied by upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionPolicy {
    /// Context size (tokens) at which upstream starts compressing.
    pub trigger_tokens: u64,
    /// Size the window is reduced to.
    pub target_tokens: u64,
}

/// Everything the upstream connector needs to open one session.
///
/// Built once per client connection from the server defaults and the client's
/// first `setup` frame, then never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    pub response_modalities: Vec<String>,
    pub compression: Option<CompressionPolicy>,
    pub resumption_handle: Option<String>,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl SessionConfig {
    pub fn from_defaults(defaults: &SessionDefaults) -> Self {
        Self {
            model: defaults.model(),
            voice: defaults.voice(),
            system_instruction: Some(defaults.system_instruction()),
            response_modalities: defaults.response_modalities(),
            compression: defaults.compression(),
            resumption_handle: None,
            input_transcription: defaults.input_transcription(),
            output_transcription: defaults.output_transcription(),
        }
    }

    /// Apply what a client may change. The model always stays server-chosen.
    pub fn with_overrides(mut self, overrides: &SetupOverrides) -> Self {
        if let Some(voice) = &overrides.voice {
            self.voice = voice.clone();
        }
        if let Some(instruction) = &overrides.system_instruction {
            self.system_instruction = Some(instruction.clone());
        }
        if let Some(modalities) = &overrides.response_modalities {
            self.response_modalities = modalities.clone();
        }
        if let Some(handle) = &overrides.resumption_handle {
            self.resumption_handle = Some(handle.clone());
        }
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Append a line to the system instruction, creating it if absent.
    pub fn with_instruction_note(mut self, note: &str) -> Self {
        self.system_instruction = Some(match self.system_instruction.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n\n{note}"),
            _ => note.to_string(),
        });
        self
    }

    pub fn is_resuming(&self) -> bool {
        self.resumption_handle.is_some()
    }
}
