//! Shared gateway state, assembled once at startup from config.

use std::sync::Arc;

use tracing::{info, warn};

use voxbridge_core::config::Config;
use voxbridge_core::registry::{InMemoryRegistry, SessionRegistry};
use voxbridge_media::stt::LiveTranscriber;
use voxbridge_media::tts::HttpSynthesizer;
use voxbridge_media::{SpeechSynthesizer, Transcriber};
use voxbridge_providers::openai::OpenAiProvider;
use voxbridge_providers::{Credentials, LlmProvider};
use voxbridge_recall::{NoopRecall, QdrantRecall, RecallStore};
use voxbridge_telephony::{CalendarClient, EmailClient, MessagingClient, SignalingClient};
use voxbridge_tools::{ToolContext, ToolRegistry};

/// Everything a connection or control-plane handler needs, shared across
/// the process. Per-call state lives in the registry.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<dyn SessionRegistry>,
    pub provider: Arc<dyn LlmProvider>,
    pub credentials: Credentials,
    pub tools: Arc<ToolRegistry>,
    pub tool_ctx: Arc<ToolContext>,
    pub recall: Arc<dyn RecallStore>,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub signaling: Option<Arc<SignalingClient>>,
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState").finish_non_exhaustive()
    }
}

impl GatewayState {
    /// Wire up all collaborators. Missing credentials disable the affected
    /// integration with a warning; nothing here is fatal except a missing
    /// transcription section (there is no call without transcription).
    pub fn from_config(config: Config) -> voxbridge_core::error::Result<Arc<Self>> {
        let config = Arc::new(config);

        let provider: Arc<dyn LlmProvider> = match config.llm.as_ref() {
            Some(llm) if llm.provider == "groq" => {
                Arc::new(OpenAiProvider::groq(llm.base_url.as_deref()))
            }
            Some(llm) => Arc::new(OpenAiProvider::openai(llm.base_url.as_deref())),
            None => Arc::new(OpenAiProvider::openai(None)),
        };
        info!(provider = %provider.id(), model = %config.model(), "Using LLM provider");

        let credentials = Credentials {
            api_key: config
                .llm
                .as_ref()
                .and_then(|l| l.resolve_api_key())
                .unwrap_or_else(|| {
                    warn!("No LLM API key configured, exchanges will fail");
                    String::new()
                }),
        };

        let transcription = config.transcription.clone().ok_or_else(|| {
            voxbridge_core::error::VoxbridgeError::Config(
                "transcription section is required".into(),
            )
        })?;
        let transcriber: Arc<dyn Transcriber> = Arc::new(LiveTranscriber::new(transcription));

        let synthesizer: Option<Arc<dyn SpeechSynthesizer>> = match config
            .tts
            .as_ref()
            .and_then(HttpSynthesizer::from_config)
        {
            Some(synth) => Some(Arc::new(synth)),
            None => {
                warn!("TTS unconfigured, synthesized playback disabled");
                None
            }
        };

        let signaling = config
            .telephony
            .as_ref()
            .and_then(SignalingClient::from_config)
            .map(Arc::new);
        if signaling.is_none() {
            warn!("Signaling unconfigured, call control disabled");
        }

        let messaging = config
            .telephony
            .as_ref()
            .and_then(MessagingClient::from_config)
            .map(Arc::new);
        let email = config
            .email
            .as_ref()
            .and_then(EmailClient::from_config)
            .map(Arc::new);
        let calendar = config
            .calendar
            .as_ref()
            .and_then(CalendarClient::from_config)
            .map(Arc::new);

        let recall: Arc<dyn RecallStore> = match config
            .recall
            .as_ref()
            .and_then(QdrantRecall::from_config)
        {
            Some(recall) => Arc::new(recall),
            None => {
                info!("Recall disabled");
                Arc::new(NoopRecall)
            }
        };

        let tools = Arc::new(ToolRegistry::standard());
        info!(tools = ?tools.names(), "Tool manifest loaded");

        let tool_ctx = Arc::new(ToolContext {
            config: config.clone(),
            provider: provider.clone(),
            credentials: credentials.clone(),
            signaling: signaling.clone(),
            messaging,
            email,
            calendar,
        });

        Ok(Arc::new(Self {
            config,
            registry: Arc::new(InMemoryRegistry::new()),
            provider,
            credentials,
            tools,
            tool_ctx,
            recall,
            transcriber,
            synthesizer,
            signaling,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_transcription() {
        let err = GatewayState::from_config(Config::default()).unwrap_err();
        assert!(err.to_string().contains("transcription"));
    }

    #[test]
    fn test_from_config_minimal() {
        let config: Config = json5::from_str(
            r#"{
                transcription: { provider: "deepgram", api_key: "dg-key" },
                llm: { provider: "groq", model: "llama-3.1-8b-instant", api_key: "gq-key" },
            }"#,
        )
        .unwrap();
        let state = GatewayState::from_config(config).unwrap();
        assert_eq!(state.provider.id(), "groq");
        assert!(state.synthesizer.is_none());
        assert!(state.signaling.is_none());
        assert_eq!(state.tools.names().len(), 7);
    }
}
