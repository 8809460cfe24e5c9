//! Transport wire protocol — inbound media-stream events and outbound frames.
//!
//! One JSON object per WebSocket text message, `event` discriminated.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::VoxbridgeError;

/// Decoded inbound transport event.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Start(StartFrame),
    Media(MediaFrame),
    Mark(MarkFrame),
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFrame {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFrame {
    /// Base64-encoded audio frame.
    pub payload: String,
}

impl MediaFrame {
    pub fn decode_payload(&self) -> crate::error::Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .map_err(|e| VoxbridgeError::Transport(format!("bad media payload: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkFrame {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    event: String,
    #[serde(default)]
    start: Option<StartFrame>,
    #[serde(default)]
    media: Option<MediaFrame>,
    #[serde(default)]
    mark: Option<MarkFrame>,
}

impl TransportEvent {
    /// Parse one inbound message. Unknown event names and missing bodies are
    /// reported as transport errors so the dispatcher can log and skip them.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let envelope: InboundEnvelope = serde_json::from_str(raw)?;
        match envelope.event.as_str() {
            "start" => envelope
                .start
                .map(TransportEvent::Start)
                .ok_or_else(|| VoxbridgeError::Transport("start event without body".into())),
            "media" => envelope
                .media
                .map(TransportEvent::Media)
                .ok_or_else(|| VoxbridgeError::Transport("media event without body".into())),
            "mark" => envelope
                .mark
                .map(TransportEvent::Mark)
                .ok_or_else(|| VoxbridgeError::Transport("mark event without body".into())),
            "stop" => Ok(TransportEvent::Stop),
            other => Err(VoxbridgeError::Transport(format!(
                "unknown transport event: {other}"
            ))),
        }
    }
}

/// Outbound frame written back to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Synthesized audio for playback.
    Media { stream_sid: String, payload: Vec<u8> },
    /// Playback checkpoint; the transport echoes the name back once the
    /// preceding audio has started playing.
    Mark { stream_sid: String, name: String },
    /// Flush the transport's playback buffer.
    Clear { stream_sid: String },
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        let value = match self {
            OutboundFrame::Media {
                stream_sid,
                payload,
            } => serde_json::json!({
                "event": "media",
                "streamSid": stream_sid,
                "media": {
                    "payload": base64::engine::general_purpose::STANDARD.encode(payload),
                },
            }),
            OutboundFrame::Mark { stream_sid, name } => serde_json::json!({
                "event": "mark",
                "streamSid": stream_sid,
                "mark": { "name": name },
            }),
            OutboundFrame::Clear { stream_sid } => serde_json::json!({
                "event": "clear",
                "streamSid": stream_sid,
            }),
        };
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": "MZ1",
                "callSid": "CA1",
                "from": "+15550001111",
                "to": "+15550002222"
            }
        }"#;
        match TransportEvent::parse(raw).unwrap() {
            TransportEvent::Start(start) => {
                assert_eq!(start.stream_sid, "MZ1");
                assert_eq!(start.call_sid, "CA1");
                assert_eq!(start.from.as_deref(), Some("+15550001111"));
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_start_without_numbers() {
        let raw = r#"{"event":"start","start":{"streamSid":"MZ1","callSid":"CA1"}}"#;
        match TransportEvent::parse(raw).unwrap() {
            TransportEvent::Start(start) => {
                assert!(start.from.is_none());
                assert!(start.to.is_none());
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_and_decode() {
        let raw = r#"{"event":"media","media":{"payload":"aGVsbG8="}}"#;
        match TransportEvent::parse(raw).unwrap() {
            TransportEvent::Media(media) => {
                assert_eq!(media.decode_payload().unwrap(), b"hello");
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_mark_and_stop() {
        let mark = TransportEvent::parse(r#"{"event":"mark","mark":{"name":"seg-3"}}"#).unwrap();
        assert_eq!(
            mark,
            TransportEvent::Mark(MarkFrame {
                name: "seg-3".into()
            })
        );
        let stop = TransportEvent::parse(r#"{"event":"stop"}"#).unwrap();
        assert_eq!(stop, TransportEvent::Stop);
    }

    #[test]
    fn test_parse_unknown_event_is_error_not_panic() {
        let err = TransportEvent::parse(r#"{"event":"connected","protocol":"Call"}"#).unwrap_err();
        assert!(err.to_string().contains("connected"));
    }

    #[test]
    fn test_parse_malformed_json_is_error() {
        assert!(TransportEvent::parse("not json").is_err());
    }

    #[test]
    fn test_parse_bad_media_payload() {
        let raw = r#"{"event":"media","media":{"payload":"@@not-base64@@"}}"#;
        match TransportEvent::parse(raw).unwrap() {
            TransportEvent::Media(media) => assert!(media.decode_payload().is_err()),
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_outbound_media_frame_json() {
        let frame = OutboundFrame::Media {
            stream_sid: "MZ1".into(),
            payload: b"hello".to_vec(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["streamSid"], "MZ1");
        assert_eq!(value["media"]["payload"], "aGVsbG8=");
    }

    #[test]
    fn test_outbound_clear_frame_json() {
        let frame = OutboundFrame::Clear {
            stream_sid: "MZ1".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["event"], "clear");
        assert_eq!(value["streamSid"], "MZ1");
        assert!(value.get("media").is_none());
    }

    #[test]
    fn test_outbound_mark_frame_json() {
        let frame = OutboundFrame::Mark {
            stream_sid: "MZ1".into(),
            name: "seg-0".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["mark"]["name"], "seg-0");
    }
}
