//! OpenAI-compatible chat completions provider.
//!
//! Speaks the `/v1/chat/completions` streaming protocol. The same
//! implementation drives both the OpenAI and Groq endpoints; Groq exposes an
//! OpenAI-compatible surface under `/openai`.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use voxbridge_core::session::{Role, Turn};

use crate::sse::data_stream;
use crate::{
    ChunkUsage, CompletionChunk, CompletionRequest, CompletionStream, Credentials, LlmProvider,
    ToolDefinition, ToolUseChunk,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai";

pub struct OpenAiProvider {
    base_url: String,
    provider_id: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn openai(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            provider_id: "openai".into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn groq(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(GROQ_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            provider_id: "groq".into(),
            client: reqwest::Client::new(),
        }
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Reassembles one tool call from its streamed deltas.
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, delta: &ToolCallDelta) {
        if let Some(ref id) = delta.id {
            self.id = id.clone();
        }
        if let Some(ref f) = delta.function {
            if let Some(ref name) = f.name {
                self.name = name.clone();
            }
            if let Some(ref args) = f.arguments {
                self.arguments.push_str(args);
            }
        }
    }

    fn into_chunk(self, stop_reason: Option<String>) -> CompletionChunk {
        CompletionChunk {
            tool_use: Some(ToolUseChunk {
                id: self.id,
                name: self.name,
                input_json: self.arguments,
            }),
            stop_reason,
            ..Default::default()
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    fn format_messages(&self, turns: &[Turn]) -> Vec<serde_json::Value> {
        turns
            .iter()
            .filter(|t| !t.content.is_empty())
            .map(|t| match t.role {
                Role::User => json!({ "role": "user", "content": t.content }),
                Role::Assistant => json!({ "role": "assistant", "content": t.content }),
                Role::Tool => json!({
                    "role": "function",
                    "name": t.tool_name.as_deref().unwrap_or("unknown"),
                    "content": t.content,
                }),
            })
            .collect()
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == "tool_calls"
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<CompletionStream> {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().cloned());

        let body = ChatRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            stream: true,
            temperature: request.temperature,
            tools: request.tools.clone(),
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        debug!(model = %body.model, base_url = %self.base_url, "Opening completion stream");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", credentials.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("completions API error {status}: {body}");
        }

        struct StreamState {
            data: std::pin::Pin<Box<dyn futures::Stream<Item = anyhow::Result<String>> + Send>>,
            accumulators: Vec<ToolCallAccumulator>,
            pending: VecDeque<CompletionChunk>,
            finished: bool,
        }

        impl StreamState {
            /// Move every accumulated tool call into the pending queue,
            /// tagging the last with the stop reason.
            fn flush_tool_calls(&mut self, stop_reason: Option<String>) {
                let total = self.accumulators.len();
                for (i, acc) in self.accumulators.drain(..).enumerate() {
                    let reason = if i + 1 == total {
                        stop_reason.clone()
                    } else {
                        None
                    };
                    self.pending.push_back(acc.into_chunk(reason));
                }
            }
        }

        let chunk_stream = futures::stream::unfold(
            StreamState {
                data: Box::pin(data_stream(response)),
                accumulators: Vec::new(),
                pending: VecDeque::new(),
                finished: false,
            },
            |mut state| async move {
                loop {
                    if let Some(chunk) = state.pending.pop_front() {
                        return Some((Ok(chunk), state));
                    }
                    if state.finished {
                        return None;
                    }

                    match state.data.next().await {
                        Some(Ok(payload)) => {
                            let payload = payload.trim();
                            if payload == "[DONE]" {
                                state.finished = true;
                                state.flush_tool_calls(None);
                                continue;
                            }

                            let chunk: ChatChunk = match serde_json::from_str(payload) {
                                Ok(c) => c,
                                Err(e) => {
                                    trace!(%e, payload, "Skipping unparseable chunk");
                                    continue;
                                }
                            };

                            if let Some(usage) = chunk.usage {
                                state.pending.push_back(CompletionChunk {
                                    usage: Some(ChunkUsage {
                                        input_tokens: Some(usage.prompt_tokens),
                                        output_tokens: Some(usage.completion_tokens),
                                    }),
                                    ..Default::default()
                                });
                                continue;
                            }

                            let Some(choice) = chunk.choices.into_iter().next() else {
                                continue;
                            };

                            if let Some(tc_deltas) = choice.delta.tool_calls {
                                for tc in &tc_deltas {
                                    while state.accumulators.len() <= tc.index {
                                        state.accumulators.push(ToolCallAccumulator::default());
                                    }
                                    state.accumulators[tc.index].absorb(tc);
                                }
                            }

                            if let Some(content) = choice.delta.content {
                                if !content.is_empty() {
                                    state.pending.push_back(CompletionChunk {
                                        delta: Some(content),
                                        ..Default::default()
                                    });
                                }
                            }

                            if let Some(reason) = choice.finish_reason {
                                if reason == "tool_calls" && !state.accumulators.is_empty() {
                                    state.flush_tool_calls(Some(reason));
                                } else {
                                    state.pending.push_back(CompletionChunk {
                                        stop_reason: Some(reason),
                                        ..Default::default()
                                    });
                                }
                            }
                        }
                        Some(Err(e)) => {
                            state.finished = true;
                            return Some((Err(e), state));
                        }
                        None => {
                            state.finished = true;
                            state.flush_tool_calls(None);
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunk_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_ids_and_base_urls() {
        let openai = OpenAiProvider::openai(None);
        assert_eq!(openai.id(), "openai");
        assert_eq!(openai.base_url, OPENAI_BASE_URL);

        let groq = OpenAiProvider::groq(None);
        assert_eq!(groq.id(), "groq");
        assert_eq!(groq.base_url, GROQ_BASE_URL);

        let custom = OpenAiProvider::openai(Some("https://proxy.example.com/"));
        assert_eq!(custom.base_url, "https://proxy.example.com");
    }

    #[test]
    fn test_format_messages_roles() {
        let provider = OpenAiProvider::openai(None);
        let turns = vec![
            Turn::user("Schedule a meeting"),
            Turn::assistant("I'll schedule that event for you."),
            Turn::tool("add_calendar_event", "I've scheduled 'Standup'."),
        ];
        let messages = provider.format_messages(&turns);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["role"], "function");
        assert_eq!(messages[2]["name"], "add_calendar_event");
    }

    #[test]
    fn test_format_messages_skips_empty_content() {
        let provider = OpenAiProvider::openai(None);
        let messages = provider.format_messages(&[Turn::assistant(""), Turn::user("hi")]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_format_tools_function_wrapper() {
        let provider = OpenAiProvider::openai(None);
        let tools = vec![ToolDefinition {
            name: "end_call".into(),
            description: "End the current call".into(),
            parameters_schema: json!({"type": "object", "properties": {}}),
        }];
        let formatted = provider.format_tools(&tools);
        assert_eq!(formatted.len(), 1);
        assert_eq!(formatted[0]["type"], "function");
        assert_eq!(formatted[0]["function"]["name"], "end_call");
        assert!(formatted[0]["function"]["parameters"].is_object());
    }

    #[test]
    fn test_is_tool_use_stop() {
        let provider = OpenAiProvider::openai(None);
        assert!(provider.is_tool_use_stop("tool_calls"));
        assert!(!provider.is_tool_use_stop("stop"));
    }

    #[test]
    fn test_chunk_deserialization_text() {
        let raw = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_chunk_deserialization_tool_delta() {
        let raw = r#"{"id":"c1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"end_call","arguments":"{}"}}]},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(raw).unwrap();
        let tc = &chunk.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.id.as_deref(), Some("call_1"));
        assert_eq!(
            tc.function.as_ref().unwrap().name.as_deref(),
            Some("end_call")
        );
    }

    #[test]
    fn test_accumulator_reassembles_arguments() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(&ToolCallDelta {
            index: 0,
            id: Some("call_1".into()),
            function: Some(FunctionDelta {
                name: Some("send_email_info".into()),
                arguments: Some("{\"query\":".into()),
            }),
        });
        acc.absorb(&ToolCallDelta {
            index: 0,
            id: None,
            function: Some(FunctionDelta {
                name: None,
                arguments: Some("\"rust\"}".into()),
            }),
        });
        let chunk = acc.into_chunk(Some("tool_calls".into()));
        let tool_use = chunk.tool_use.unwrap();
        assert_eq!(tool_use.name, "send_email_info");
        assert_eq!(tool_use.input_json, r#"{"query":"rust"}"#);
        assert_eq!(chunk.stop_reason.as_deref(), Some("tool_calls"));
    }
}
