//! Transcription bridge — forwards call audio to a live STT socket and
//! surfaces utterance and transcript events.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxbridge_core::config::TranscriptionConfig;

const DEFAULT_ENDPOINT: &str = "wss://api.deepgram.com/v1/listen";
const DEFAULT_MODEL: &str = "nova-2";

/// Events surfaced by the bridge.
///
/// `Utterance` is a finalized utterance segment — it feeds interruption
/// detection only. `Transcript` is the end-of-speech transcript that
/// triggers a model exchange. Interim fragments never leave the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SttEvent {
    Utterance(String),
    Transcript(String),
}

/// Handle to a running transcription bridge.
pub struct TranscriberHandle {
    /// Raw audio frames (8kHz mu-law) to forward.
    pub audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Utterance/transcript events from the provider.
    pub events: mpsc::UnboundedReceiver<SttEvent>,
}

/// A speech-to-text backend able to serve one call's audio stream.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<TranscriberHandle>;
}

/// Live WebSocket transcriber (Deepgram-style protocol).
pub struct LiveTranscriber {
    config: TranscriptionConfig,
}

impl LiveTranscriber {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self { config }
    }

    fn endpoint_url(&self) -> String {
        let base = self
            .config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let model = self.config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        format!(
            "{base}?model={model}&encoding=mulaw&sample_rate=8000&channels=1\
             &punctuate=true&interim_results=true&utterance_end_ms=1000"
        )
    }
}

#[async_trait]
impl Transcriber for LiveTranscriber {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<TranscriberHandle> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("no transcription API key configured"))?;

        let url = self.endpoint_url();
        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Token {api_key}").parse()?);

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        info!("Transcription socket connected");

        let (mut ws_tx, mut ws_rx) = socket.split();
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, events) = mpsc::unbounded_channel::<SttEvent>();

        tokio::spawn(async move {
            let mut parts: Vec<String> = Vec::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Transcription bridge cancelled");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    audio = audio_rx.recv() => {
                        match audio {
                            Some(bytes) => {
                                if ws_tx.send(Message::Binary(bytes.into())).await.is_err() {
                                    warn!("Transcription socket send failed");
                                    break;
                                }
                            }
                            None => {
                                let _ = ws_tx.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    message = ws_rx.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = process_provider_message(&text, &mut parts) {
                                    if event_tx.send(event).is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Transcription socket closed");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(%e, "Transcription socket error");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(TranscriberHandle { audio_tx, events })
    }
}

/// Interpret one provider JSON message, accumulating finalized segments in
/// `parts` until an end-of-speech flush.
fn process_provider_message(raw: &str, parts: &mut Vec<String>) -> Option<SttEvent> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(%e, "Unparseable transcription message");
            return None;
        }
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("Results") => {
            let transcript = value
                .get("channel")
                .and_then(|c| c.get("alternatives"))
                .and_then(|a| a.get(0))
                .and_then(|alt| alt.get("transcript"))
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .trim()
                .to_string();

            let is_final = value
                .get("is_final")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let speech_final = value
                .get("speech_final")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            // Interim fragments never leave the bridge.
            if !is_final {
                return None;
            }

            if !transcript.is_empty() {
                parts.push(transcript.clone());
            }

            if speech_final {
                let full = std::mem::take(parts).join(" ");
                if full.is_empty() {
                    None
                } else {
                    Some(SttEvent::Transcript(full))
                }
            } else if transcript.is_empty() {
                None
            } else {
                Some(SttEvent::Utterance(transcript))
            }
        }
        Some("UtteranceEnd") => {
            let full = std::mem::take(parts).join(" ");
            if full.is_empty() {
                None
            } else {
                Some(SttEvent::Transcript(full))
            }
        }
        _ => None,
    }
}
