//! LLM provider abstraction.
//!
//! Providers implement [`LlmProvider`] to stream chat completions with tool
//! calling. The engine consumes the stream incrementally; providers are
//! responsible for reassembling tool-call argument deltas into complete
//! calls before emitting them.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use voxbridge_core::session::Turn;

pub mod openai;
pub mod sse;

/// Credentials for authenticating with a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
}

/// Advertised tool, formatted per provider by [`LlmProvider::format_tools`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A request for one streaming exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub tools: Option<Vec<serde_json::Value>>,
    pub system: Option<String>,
}

/// A streamed chunk. At most one of `delta` / `tool_use` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub delta: Option<String>,
    pub tool_use: Option<ToolUseChunk>,
    pub usage: Option<ChunkUsage>,
    pub stop_reason: Option<String>,
}

/// A complete tool call reassembled from streaming deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseChunk {
    pub id: String,
    pub name: String,
    /// Raw JSON argument text as produced by the model. May be malformed;
    /// callers parse leniently.
    pub input_json: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

pub type CompletionStream =
    Pin<Box<dyn Stream<Item = anyhow::Result<CompletionChunk>> + Send>>;

/// The core provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "openai", "groq").
    fn id(&self) -> &str;

    /// Format the turn history into this provider's message shape.
    fn format_messages(&self, turns: &[Turn]) -> Vec<serde_json::Value>;

    /// Format tool definitions into this provider's tool shape.
    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value>;

    /// Whether a stop reason indicates pending tool calls.
    fn is_tool_use_stop(&self, stop_reason: &str) -> bool;

    /// Open a streaming exchange.
    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<CompletionStream>;
}

/// Collect a stream's plain text into a single string, ignoring tool calls.
/// Used for offline generation (summaries, info bodies).
pub async fn collect_text(mut stream: CompletionStream) -> anyhow::Result<String> {
    use tokio_stream::StreamExt;

    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if let Some(delta) = chunk.delta {
            text.push_str(&delta);
        }
    }
    Ok(text)
}
