//! Per-participant settings store.
//!
//! Bounded in both directions: entries expire `ttl` after their last write,
//! and once `max_entries` is reached the least recently written entry is
//! evicted to make room.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSettings {
    #[serde(default = "default_voice")]
    pub selected_voice_api: String,
    #[serde(default = "default_lang")]
    pub target_lang: String,
    #[serde(default)]
    pub teacher_mode: bool,
    #[serde(default = "default_speed")]
    pub speech_speed: f64,
}

fn default_voice() -> String {
    "aoede".into()
}

fn default_lang() -> String {
    "English".into()
}

fn default_speed() -> f64 {
    1.1
}

impl Default for ParticipantSettings {
    fn default() -> Self {
        Self {
            selected_voice_api: default_voice(),
            target_lang: default_lang(),
            teacher_mode: false,
            speech_speed: default_speed(),
        }
    }
}

impl ParticipantSettings {
    /// Upstream prebuilt voice name (`aoede` -> `Aoede`).
    pub fn voice_name(&self) -> Option<String> {
        let mut chars = self.selected_voice_api.trim().chars();
        let first = chars.next()?;
        Some(first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect())
    }

    /// Extra system-instruction text for the stored preferences, if any.
    pub fn instruction_note(&self) -> Option<String> {
        let lang = self.target_lang.trim();
        let mut notes = Vec::new();
        if !lang.is_empty() && !lang.eq_ignore_ascii_case("english") {
            notes.push(format!("Always reply in {lang}."));
        }
        if self.teacher_mode {
            notes.push(
                "Act as a patient language teacher: gently correct mistakes and explain them."
                    .to_string(),
            );
        }
        (!notes.is_empty()).then(|| notes.join(" "))
    }
}

struct Entry {
    settings: ParticipantSettings,
    written: Instant,
}

pub struct SettingsStore {
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SettingsStore {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, participant: &str) -> Option<ParticipantSettings> {
        self.get_at(participant, Instant::now())
    }

    /// Stored settings, or the defaults when nothing is stored.
    pub fn get_or_default(&self, participant: &str) -> ParticipantSettings {
        self.get(participant).unwrap_or_default()
    }

    pub fn put(&self, participant: &str, settings: ParticipantSettings) {
        self.put_at(participant, settings, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get_at(&self, participant: &str, now: Instant) -> Option<ParticipantSettings> {
        let mut map = self.lock();
        let expired = map
            .get(participant)
            .is_some_and(|e| now.saturating_duration_since(e.written) >= self.ttl);
        if expired {
            map.remove(participant);
            return None;
        }
        map.get(participant).map(|e| e.settings.clone())
    }

    fn put_at(&self, participant: &str, settings: ParticipantSettings, now: Instant) {
        if self.max_entries == 0 {
            return;
        }
        let mut map = self.lock();
        let ttl = self.ttl;
        map.retain(|_, e| now.saturating_duration_since(e.written) < ttl);

        if !map.contains_key(participant) && map.len() >= self.max_entries {
            let oldest = map
                .iter()
                .min_by_key(|(_, e)| e.written)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                debug!(participant = %key, "Evicting participant settings");
                map.remove(&key);
            }
        }

        map.insert(
            participant.to_string(),
            Entry {
                settings,
                written: now,
            },
        );
    }
}
