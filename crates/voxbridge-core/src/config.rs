//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Voxbridge configuration.
///
/// Loaded from a JSON5 file with `${ENV_VAR}` references substituted before
/// parsing. Every integration section is optional; a missing section disables
/// that integration rather than failing startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephony: Option<TelephonyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar: Option<CalendarConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall: Option<RecallConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default "0.0.0.0").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Listen port (default 8080).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Externally reachable host used in the connect-stream answer
    /// (e.g. "voice.example.com").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider id: "openai" or "groq".
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider id (currently "deepgram").
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Override the live-listen endpoint (tests point this at a local server).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Provider id (currently "elevenlabs").
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Audio format requested from the provider. The telephony leg speaks
    /// 8kHz mu-law, so this defaults to "ulaw_8000".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub account_sid: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,

    /// The number this system answers on. Used to tell which leg of a call
    /// is the caller.
    pub app_number: String,

    /// Human fallback target for `transfer_call`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_number: Option<String>,

    /// WhatsApp sender, in "whatsapp:+..." form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl TelephonyConfig {
    pub fn resolve_auth_token(&self) -> Option<String> {
        resolve_secret_field(&self.auth_token, &self.auth_token_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub api_base: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    pub from_address: String,
}

impl EmailConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub api_base: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Calendar to insert into (default "primary").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl CalendarConfig {
    pub fn resolve_token(&self) -> Option<String> {
        resolve_secret_field(&self.token, &self.token_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Vector store base URL (default "http://localhost:6333").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_chunks: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_api_key_env: Option<String>,
}

fn default_true() -> bool {
    true
}

impl RecallConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn resolve_embedding_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.embedding_api_key, &self.embedding_api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// System instructions prepended to every exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    /// Spoken as soon as the media stream starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_line: Option<String>,

    /// Hard cap on tool continuation hops within one exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_hops: Option<u32>,
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the default (everything disabled) config.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoxbridgeError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoxbridgeError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config path: `voxbridge.json5` in the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from("voxbridge.json5")
    }

    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().and_then(|s| s.port).unwrap_or(8080)
    }

    pub fn public_host(&self) -> Option<String> {
        self.server.as_ref().and_then(|s| s.public_host.clone())
    }

    pub fn model(&self) -> String {
        self.llm
            .as_ref()
            .and_then(|l| l.model.clone())
            .unwrap_or_else(|| "gpt-4o".to_string())
    }

    pub fn max_tokens(&self) -> u32 {
        self.llm.as_ref().and_then(|l| l.max_tokens).unwrap_or(1024)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.llm.as_ref().and_then(|l| l.temperature)
    }

    pub fn system_message(&self) -> String {
        self.conversation
            .as_ref()
            .and_then(|c| c.system_message.clone())
            .unwrap_or_else(|| {
                "You are a helpful voice assistant on a phone call. \
                 Keep answers short and conversational."
                    .to_string()
            })
    }

    pub fn opening_line(&self) -> String {
        self.conversation
            .as_ref()
            .and_then(|c| c.opening_line.clone())
            .unwrap_or_else(|| "Hello, how can I help?".to_string())
    }

    pub fn max_tool_hops(&self) -> u32 {
        self.conversation
            .as_ref()
            .and_then(|c| c.max_tool_hops)
            .unwrap_or(4)
    }

    pub fn app_number(&self) -> Option<&str> {
        self.telephony.as_ref().map(|t| t.app_number.as_str())
    }
}
