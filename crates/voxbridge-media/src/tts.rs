//! Speech synthesis — one audio payload per sentence chunk.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use voxbridge_core::config::TtsConfig;

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_VOICE: &str = "Rachel";
const DEFAULT_MODEL: &str = "eleven_turbo_v2";
/// The telephony leg plays 8kHz mu-law.
const DEFAULT_OUTPUT_FORMAT: &str = "ulaw_8000";

/// A text-to-speech backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one chunk of text into raw audio bytes.
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>>;
}

/// Streaming HTTP synthesizer (ElevenLabs-style API).
pub struct HttpSynthesizer {
    base_url: String,
    api_key: String,
    voice: String,
    model: String,
    output_format: String,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    /// Build from config; `None` when the API key is missing.
    pub fn from_config(config: &TtsConfig) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        Some(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            voice: config
                .voice
                .clone()
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            output_format: config
                .output_format
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTPUT_FORMAT.to_string()),
            client: reqwest::Client::new(),
        })
    }

    fn synthesis_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream?output_format={}",
            self.base_url, self.voice, self.output_format
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        debug!(voice = %self.voice, chars = text.len(), "Synthesizing chunk");

        let response = self
            .client
            .post(self.synthesis_url())
            .header("xi-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.model,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("synthesis API error {status}: {body}");
        }

        let mut audio = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            audio.extend_from_slice(&chunk?);
        }
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(output_format: Option<&str>) -> TtsConfig {
        TtsConfig {
            provider: "elevenlabs".into(),
            api_key: Some("key".into()),
            api_key_env: None,
            voice: None,
            model: None,
            output_format: output_format.map(String::from),
            base_url: None,
        }
    }

    #[test]
    fn test_synthesis_url_defaults() {
        let synth = HttpSynthesizer::from_config(&config(None)).unwrap();
        let url = synth.synthesis_url();
        assert!(url.starts_with("https://api.elevenlabs.io/v1/text-to-speech/Rachel/stream"));
        assert!(url.contains("output_format=ulaw_8000"));
    }

    #[test]
    fn test_output_format_override() {
        let synth = HttpSynthesizer::from_config(&config(Some("pcm_16000"))).unwrap();
        assert!(synth.synthesis_url().contains("output_format=pcm_16000"));
    }

    #[test]
    fn test_missing_key_disables() {
        let mut c = config(None);
        c.api_key = None;
        assert!(HttpSynthesizer::from_config(&c).is_none());
    }
}
