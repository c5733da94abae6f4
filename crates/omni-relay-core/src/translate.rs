//! Message translator: wire JSON <-> [`RelayMessage`] / [`UpstreamEvent`].
//!
//! Pure functions, no state. Inbound decoding accepts camelCase and
//! snake_case keys interchangeably (see [`crate::wire`]); outbound encoding
//! always emits the shapes the browser client reads.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use crate::error::DecodeError;
use crate::message::{
    Blob, Part, RelayMessage, SetupOverrides, TranscriptionSource, UpstreamEvent,
};
use crate::wire::{
    BlobWire, ClientContentWire, ClientFrameWire, ContentWire, PartWire, RealtimeInputWire,
    ServerContentWire, SetupWire, UpstreamMessageWire,
};

pub fn encode_audio(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_audio(data: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError::UnrecognizedFrame(format!("invalid base64 payload: {e}")))
}

fn parse_object<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| DecodeError::UnrecognizedFrame(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(DecodeError::UnrecognizedFrame(
            "frame is not a JSON object".into(),
        ));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::UnrecognizedFrame(e.to_string()))
}

fn blob_from_wire(wire: BlobWire) -> Result<Blob, DecodeError> {
    Ok(Blob {
        data: decode_audio(&wire.data)?,
        mime_type: wire.mime_type,
    })
}

fn parts_from_wire(parts: Vec<PartWire>) -> Result<Vec<Part>, DecodeError> {
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        if let Some(blob) = part.inline_data {
            out.push(Part::InlineData(blob_from_wire(blob)?));
        }
        if let Some(text) = part.text {
            out.push(Part::Text(text));
        }
    }
    Ok(out)
}

/// Decode one client frame.
///
/// A frame may yield several messages (one per media chunk) or none (a
/// `clientContent` keepalive with no turns).
pub fn decode_inbound(raw: &str) -> Result<Vec<RelayMessage>, DecodeError> {
    let frame: ClientFrameWire = parse_object(raw)?;

    if let Some(setup) = frame.setup {
        return Ok(vec![RelayMessage::Setup(setup_from_wire(setup))]);
    }
    if let Some(input) = frame.realtime_input {
        return realtime_input_from_wire(input);
    }
    if let Some(content) = frame.client_content {
        return Ok(client_content_from_wire(content).into_iter().collect());
    }

    Err(DecodeError::UnrecognizedFrame(
        "expected one of setup, realtimeInput, clientContent".into(),
    ))
}

fn setup_from_wire(setup: SetupWire) -> SetupOverrides {
    let resumption_handle = setup
        .resumption_handle
        .or_else(|| setup.session_resumption.and_then(|r| r.handle))
        .filter(|h| !h.is_empty());

    SetupOverrides {
        resumption_handle,
        voice: setup.voice.filter(|v| !v.is_empty()),
        system_instruction: setup
            .system_instruction
            .map(|i| i.into_text())
            .filter(|s| !s.is_empty()),
        response_modalities: setup.response_modalities.filter(|m| !m.is_empty()),
        participant_name: setup.participant_name.filter(|p| !p.is_empty()),
    }
}

fn realtime_input_from_wire(input: RealtimeInputWire) -> Result<Vec<RelayMessage>, DecodeError> {
    let mut out = Vec::with_capacity(input.media_chunks.len() + 1);
    for chunk in input.media_chunks {
        out.push(RelayMessage::AudioChunk(blob_from_wire(chunk)?));
    }
    if let Some(audio) = input.audio {
        out.push(RelayMessage::AudioChunk(blob_from_wire(audio)?));
    }
    if out.is_empty() {
        return Err(DecodeError::UnrecognizedFrame(
            "realtimeInput carries no mediaChunks or audio".into(),
        ));
    }
    Ok(out)
}

fn client_content_from_wire(content: ClientContentWire) -> Option<RelayMessage> {
    let text: String = content
        .turns
        .into_iter()
        .flat_map(|turn| turn.parts)
        .filter_map(|part| part.text)
        .collect();

    if text.is_empty() && !content.turn_complete {
        return None;
    }
    Some(RelayMessage::TextTurn {
        text,
        is_final: content.turn_complete,
    })
}

/// Encode a message as the JSON frame the client expects.
pub fn encode_outbound(msg: &RelayMessage) -> String {
    let value = match msg {
        RelayMessage::Setup(overrides) => {
            let mut setup = serde_json::Map::new();
            if let Some(handle) = &overrides.resumption_handle {
                setup.insert("resumption_handle".into(), json!(handle));
            }
            if let Some(voice) = &overrides.voice {
                setup.insert("voice".into(), json!(voice));
            }
            if let Some(instruction) = &overrides.system_instruction {
                setup.insert("system_instruction".into(), json!(instruction));
            }
            if let Some(modalities) = &overrides.response_modalities {
                setup.insert("response_modalities".into(), json!(modalities));
            }
            if let Some(name) = &overrides.participant_name {
                setup.insert("participant_name".into(), json!(name));
            }
            json!({ "setup": setup })
        }
        RelayMessage::AudioChunk(blob) => json!({
            "realtimeInput": { "mediaChunks": [blob_to_json(blob)] }
        }),
        RelayMessage::TextTurn { text, is_final } => json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                "turnComplete": is_final,
            }
        }),
        RelayMessage::ModelTurn { parts } => {
            let parts: Vec<Value> = parts.iter().map(part_to_json).collect();
            json!({ "serverContent": { "modelTurn": { "parts": parts } } })
        }
        RelayMessage::TurnComplete => json!({ "serverContent": { "turnComplete": true } }),
        RelayMessage::Interrupted => json!({ "serverContent": { "interrupted": true } }),
        RelayMessage::Transcription { source, text } => {
            let key = match source {
                TranscriptionSource::Input => "inputTranscription",
                TranscriptionSource::Output => "outputTranscription",
            };
            json!({ "serverContent": { key: { "text": text } } })
        }
        RelayMessage::GoAway { time_left } => json!({ "goAway": { "timeLeft": time_left } }),
        RelayMessage::SetupAck => json!({ "server_content": { "setup_complete": {} } }),
        RelayMessage::ResumptionToken { handle } => {
            json!({ "serverContent": { "resumptionToken": handle } })
        }
        RelayMessage::ErrorFrame { kind, detail } => json!({
            "error": { "kind": kind.as_str(), "code": kind.close_code(), "detail": detail }
        }),
    };
    value.to_string()
}

fn blob_to_json(blob: &Blob) -> Value {
    json!({ "data": encode_audio(&blob.data), "mimeType": blob.mime_type })
}

fn part_to_json(part: &Part) -> Value {
    match part {
        Part::Text(text) => json!({ "text": text }),
        Part::InlineData(blob) => json!({ "inlineData": blob_to_json(blob) }),
    }
}

/// Decode one upstream message into zero or more events.
///
/// Content, resumption updates and go-away notices arrive as separate
/// top-level keys and always come out as separate events.
pub fn decode_upstream(raw: &str) -> Result<Vec<UpstreamEvent>, DecodeError> {
    let msg: UpstreamMessageWire = parse_object(raw)?;

    let recognized = msg.setup_complete.is_some()
        || msg.server_content.is_some()
        || msg.session_resumption_update.is_some()
        || msg.go_away.is_some()
        || msg.usage_metadata.is_some();
    if !recognized {
        return Err(DecodeError::UnrecognizedFrame(
            "expected one of setupComplete, serverContent, sessionResumptionUpdate, goAway".into(),
        ));
    }

    let mut events = Vec::new();
    if msg.setup_complete.is_some() {
        events.push(UpstreamEvent::SetupComplete);
    }
    if let Some(content) = msg.server_content {
        server_content_events(content, &mut events)?;
    }
    if let Some(update) = msg.session_resumption_update {
        events.push(UpstreamEvent::ResumptionUpdate {
            handle: update.new_handle.filter(|h| !h.is_empty()),
            resumable: update.resumable,
        });
    }
    if let Some(go_away) = msg.go_away {
        events.push(UpstreamEvent::GoAway {
            time_left: go_away.time_left,
        });
    }
    Ok(events)
}

fn server_content_events(
    content: ServerContentWire,
    events: &mut Vec<UpstreamEvent>,
) -> Result<(), DecodeError> {
    if let Some(t) = content.input_transcription.and_then(|t| t.text) {
        events.push(UpstreamEvent::Transcription {
            source: TranscriptionSource::Input,
            text: t,
        });
    }
    if let Some(ContentWire { parts, .. }) = content.model_turn {
        events.push(UpstreamEvent::Content {
            parts: parts_from_wire(parts)?,
        });
    }
    if let Some(t) = content.output_transcription.and_then(|t| t.text) {
        events.push(UpstreamEvent::Transcription {
            source: TranscriptionSource::Output,
            text: t,
        });
    }
    if content.interrupted {
        events.push(UpstreamEvent::Interrupted);
    }
    if content.turn_complete {
        events.push(UpstreamEvent::TurnComplete);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorKind;

    fn pcm(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn test_audio_round_trip_is_byte_exact() {
        for bytes in [Vec::new(), vec![0u8], vec![255u8; 3], pcm(1024), pcm(4097)] {
            assert_eq!(decode_audio(&encode_audio(&bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        assert!(matches!(
            decode_audio("not base64!!"),
            Err(DecodeError::UnrecognizedFrame(_))
        ));
    }

    #[test]
    fn test_realtime_input_conventions_agree() {
        let data = encode_audio(&pcm(64));
        let camel = format!(
            r#"{{"realtimeInput":{{"mediaChunks":[{{"data":"{data}","mimeType":"audio/pcm;rate=16000"}}]}}}}"#
        );
        let snake = format!(
            r#"{{"realtime_input":{{"media_chunks":[{{"data":"{data}","mime_type":"audio/pcm;rate=16000"}}]}}}}"#
        );
        let a = decode_inbound(&camel).unwrap();
        let b = decode_inbound(&snake).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a,
            vec![RelayMessage::AudioChunk(Blob::new(pcm(64), "audio/pcm;rate=16000"))]
        );
    }

    #[test]
    fn test_client_content_conventions_agree() {
        let camel = r#"{"clientContent":{"turns":[{"role":"user","parts":[{"text":"hi"}]}],"turnComplete":true}}"#;
        let snake = r#"{"client_content":{"turns":[{"role":"user","parts":[{"text":"hi"}]}],"turn_complete":true}}"#;
        let expected = vec![RelayMessage::TextTurn {
            text: "hi".into(),
            is_final: true,
        }];
        assert_eq!(decode_inbound(camel).unwrap(), expected);
        assert_eq!(decode_inbound(snake).unwrap(), expected);
    }

    #[test]
    fn test_setup_conventions_agree() {
        let camel = r#"{"setup":{"resumptionHandle":"tok-1","systemInstruction":"be brief","participantName":"ann"}}"#;
        let snake = r#"{"setup":{"resumption_handle":"tok-1","system_instruction":"be brief","participant_name":"ann"}}"#;
        assert_eq!(decode_inbound(camel).unwrap(), decode_inbound(snake).unwrap());

        let msgs = decode_inbound(snake).unwrap();
        assert_eq!(msgs.len(), 1);
        let RelayMessage::Setup(overrides) = &msgs[0] else {
            panic!("expected a setup message");
        };
        assert_eq!(overrides.resumption_handle.as_deref(), Some("tok-1"));
        assert_eq!(overrides.system_instruction.as_deref(), Some("be brief"));
        assert_eq!(overrides.participant_name.as_deref(), Some("ann"));
    }

    #[test]
    fn test_empty_setup_has_no_overrides() {
        assert_eq!(
            decode_inbound(r#"{"setup":{}}"#).unwrap(),
            vec![RelayMessage::Setup(SetupOverrides::default())]
        );
    }

    #[test]
    fn test_setup_nested_resumption_and_content_instruction() {
        let raw = r#"{"setup":{"sessionResumption":{"handle":"h-9"},"systemInstruction":{"parts":[{"text":"a"},{"text":"b"}]}}}"#;
        let msgs = decode_inbound(raw).unwrap();
        let RelayMessage::Setup(overrides) = &msgs[0] else {
            panic!("expected a setup message");
        };
        assert_eq!(overrides.resumption_handle.as_deref(), Some("h-9"));
        assert_eq!(overrides.system_instruction.as_deref(), Some("a\nb"));
    }

    #[test]
    fn test_keepalive_decodes_to_nothing() {
        assert!(decode_inbound(r#"{"client_content":{"ping":true}}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_multiple_chunks_keep_order() {
        let raw = format!(
            r#"{{"realtimeInput":{{"mediaChunks":[{{"data":"{}","mimeType":"a"}},{{"data":"{}","mimeType":"b"}}]}}}}"#,
            encode_audio(&[1]),
            encode_audio(&[2])
        );
        assert_eq!(
            decode_inbound(&raw).unwrap(),
            vec![
                RelayMessage::AudioChunk(Blob::new(vec![1], "a")),
                RelayMessage::AudioChunk(Blob::new(vec![2], "b")),
            ]
        );
    }

    #[test]
    fn test_unknown_top_level_keys_ignored() {
        let raw = r#"{"clientContent":{"turnComplete":true},"extra":{"anything":1}}"#;
        assert_eq!(
            decode_inbound(raw).unwrap(),
            vec![RelayMessage::TextTurn {
                text: String::new(),
                is_final: true
            }]
        );
    }

    #[test]
    fn test_unrecognized_shapes_rejected() {
        for raw in [r#"{"hello":1}"#, "[]", "not json", r#"{"realtimeInput":{"mediaChunks":[{"data":"AAAA"}]}}"#] {
            assert!(
                matches!(decode_inbound(raw), Err(DecodeError::UnrecognizedFrame(_))),
                "expected decode error for {raw}"
            );
        }
    }

    #[test]
    fn test_realtime_input_without_audio_rejected() {
        for raw in [
            r#"{"realtimeInput":{}}"#,
            r#"{"realtimeInput":{"foo":1}}"#,
            r#"{"realtimeInput":{"mediaChunks":[]}}"#,
        ] {
            assert!(
                matches!(decode_inbound(raw), Err(DecodeError::UnrecognizedFrame(_))),
                "expected decode error for {raw}"
            );
        }
    }

    #[test]
    fn test_upstream_model_turn_both_conventions() {
        let data = encode_audio(&pcm(32));
        let camel = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"text":"hi"}},{{"inlineData":{{"data":"{data}","mimeType":"audio/pcm;rate=24000"}}}}]}}}}}}"#
        );
        let snake = format!(
            r#"{{"server_content":{{"model_turn":{{"parts":[{{"text":"hi"}},{{"inline_data":{{"data":"{data}","mime_type":"audio/pcm;rate=24000"}}}}]}}}}}}"#
        );
        let expected = vec![UpstreamEvent::Content {
            parts: vec![
                Part::Text("hi".into()),
                Part::InlineData(Blob::new(pcm(32), "audio/pcm;rate=24000")),
            ],
        }];
        assert_eq!(decode_upstream(&camel).unwrap(), expected);
        assert_eq!(decode_upstream(&snake).unwrap(), expected);
    }

    #[test]
    fn test_upstream_resumption_split_from_content() {
        let raw = r#"{"serverContent":{"turnComplete":true},"sessionResumptionUpdate":{"newHandle":"abc","resumable":true}}"#;
        assert_eq!(
            decode_upstream(raw).unwrap(),
            vec![
                UpstreamEvent::TurnComplete,
                UpstreamEvent::ResumptionUpdate {
                    handle: Some("abc".into()),
                    resumable: true
                },
            ]
        );
    }

    #[test]
    fn test_upstream_setup_complete_and_usage() {
        assert_eq!(
            decode_upstream(r#"{"setupComplete":{}}"#).unwrap(),
            vec![UpstreamEvent::SetupComplete]
        );
        assert!(decode_upstream(r#"{"usageMetadata":{"totalTokenCount":5}}"#)
            .unwrap()
            .is_empty());
        assert!(decode_upstream(r#"{"somethingElse":{}}"#).is_err());
    }

    #[test]
    fn test_encode_setup_ack_and_token() {
        assert_eq!(
            encode_outbound(&RelayMessage::SetupAck),
            r#"{"server_content":{"setup_complete":{}}}"#
        );
        assert_eq!(
            encode_outbound(&RelayMessage::ResumptionToken {
                handle: "tok".into()
            }),
            r#"{"serverContent":{"resumptionToken":"tok"}}"#
        );
    }

    #[test]
    fn test_encode_model_turn_preserves_part_order() {
        let msg = RelayMessage::ModelTurn {
            parts: vec![
                Part::Text("first".into()),
                Part::InlineData(Blob::new(vec![9, 9], "audio/pcm;rate=24000")),
            ],
        };
        let value: Value = serde_json::from_str(&encode_outbound(&msg)).unwrap();
        let parts = &value["serverContent"]["modelTurn"]["parts"];
        assert_eq!(parts[0]["text"], "first");
        assert_eq!(parts[1]["inlineData"]["data"], encode_audio(&[9, 9]));
        assert_eq!(parts[1]["inlineData"]["mimeType"], "audio/pcm;rate=24000");
    }

    #[test]
    fn test_encode_error_frame() {
        let msg = RelayMessage::ErrorFrame {
            kind: ErrorKind::RegionUnsupported,
            detail: "User location is not supported".into(),
        };
        let value: Value = serde_json::from_str(&encode_outbound(&msg)).unwrap();
        assert_eq!(value["error"]["kind"], "region_unsupported");
        assert_eq!(value["error"]["code"], 4003);
    }

    #[test]
    fn test_client_frames_decode_what_they_encode() {
        let msgs = [
            RelayMessage::AudioChunk(Blob::new(pcm(1024), "audio/pcm;rate=16000")),
            RelayMessage::TextTurn {
                text: "hello".into(),
                is_final: true,
            },
            RelayMessage::Setup(SetupOverrides {
                resumption_handle: Some("h".into()),
                voice: Some("Kore".into()),
                ..Default::default()
            }),
        ];
        for msg in msgs {
            assert_eq!(decode_inbound(&encode_outbound(&msg)).unwrap(), vec![msg]);
        }
    }
}
