//! Streaming completion loop with tool-call execution.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use voxbridge_core::config::Config;
use voxbridge_core::error::{Result, VoxbridgeError};
use voxbridge_core::registry::SessionHandle;
use voxbridge_core::session::{Role, Turn};
use voxbridge_providers::{CompletionRequest, Credentials, LlmProvider, ToolUseChunk};
use voxbridge_recall::{RecallStore, RecalledExchange};
use voxbridge_tools::{Tool, ToolContext, ToolRegistry};

use crate::sentence::SentenceBuffer;
use crate::shared::EngineShared;
use crate::SpeechSegment;

/// Spoken when a non-reentrant tool's result arrives as the input turn.
const SYNTHETIC_CONTINUATION: &str =
    "I've processed your request. Is there anything else you'd like to know?";

/// Spoken when a required query argument cannot be derived.
const QUERY_CLARIFICATION: &str = "I'm not sure what information you'd like me to send. \
     Could you please tell me specifically what you want to know about?";

/// Where an incoming turn came from.
#[derive(Debug, Clone)]
pub enum TurnOrigin {
    /// A finalized user transcript.
    User,
    /// The textual result of a tool invocation.
    ToolResult { name: String },
}

struct IncomingTurn {
    origin: TurnOrigin,
    text: String,
}

/// Drives streaming exchanges for one session.
///
/// One engine instance exists per call; `complete` runs on the session's
/// conversation task and is never concurrent with itself. Barge-in
/// cancellation arrives through [`EngineShared::reset`], observed between
/// stream chunks.
pub struct CompletionEngine {
    config: Arc<Config>,
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    tools: Arc<ToolRegistry>,
    tool_ctx: Arc<ToolContext>,
    recall: Arc<dyn RecallStore>,
    shared: Arc<EngineShared>,
    segment_tx: mpsc::UnboundedSender<SpeechSegment>,
}

impl CompletionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn LlmProvider>,
        credentials: Credentials,
        tools: Arc<ToolRegistry>,
        tool_ctx: Arc<ToolContext>,
        recall: Arc<dyn RecallStore>,
        shared: Arc<EngineShared>,
        segment_tx: mpsc::UnboundedSender<SpeechSegment>,
    ) -> Self {
        Self {
            config,
            provider,
            credentials,
            tools,
            tool_ctx,
            recall,
            shared,
            segment_tx,
        }
    }

    pub fn shared(&self) -> Arc<EngineShared> {
        self.shared.clone()
    }

    /// Clear in-flight exchange state. Called on barge-in and teardown.
    pub fn reset(&self) {
        self.shared.reset();
    }

    /// Emit `text` for synthesis at the next response index of the current
    /// epoch. Used by the dispatcher for the opening line (which thereby
    /// takes index 0) and internally for every sentence chunk.
    pub fn speak(&self, text: &str) {
        self.emit(self.shared.epoch(), text);
    }

    fn emit(&self, epoch: u64, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let Some(index) = self.shared.allocate(epoch) else {
            debug!("Dropping chunk for superseded epoch");
            return;
        };
        let _ = self.segment_tx.send(SpeechSegment {
            epoch,
            index,
            text: text.to_string(),
        });
    }

    /// Run one exchange: append the incoming turn, stream the model,
    /// execute tool calls, and continue on tool results until the chain
    /// terminates. The continuation is an explicit loop with a hard hop cap;
    /// the non-reentrancy rule bounds real chains to a single hop.
    pub async fn complete(
        &self,
        session: &SessionHandle,
        text: &str,
        origin: TurnOrigin,
    ) -> Result<()> {
        let epoch = self.shared.epoch();
        let max_hops = self.config.max_tool_hops();
        let mut pending = Some(IncomingTurn {
            origin,
            text: text.to_string(),
        });
        let mut hops = 0u32;

        while let Some(turn) = pending.take() {
            hops += 1;
            if hops > max_hops {
                warn!(hops, "Tool continuation cap reached, ending exchange");
                break;
            }

            // A non-reentrant tool's result must not be fed back into the
            // model: acknowledge synthetically and stop.
            if let TurnOrigin::ToolResult { ref name } = turn.origin {
                let non_reentrant = self
                    .tools
                    .get(name)
                    .is_some_and(|t| !t.is_reentrant());
                if non_reentrant {
                    let mut guard = session.lock().await;
                    guard.append(Turn::tool(name.clone(), turn.text));
                    guard.append(Turn::assistant(SYNTHETIC_CONTINUATION));
                    drop(guard);
                    self.emit(epoch, SYNTHETIC_CONTINUATION);
                    return Ok(());
                }
            }

            let is_user_turn = matches!(turn.origin, TurnOrigin::User);

            {
                let mut guard = session.lock().await;
                match &turn.origin {
                    TurnOrigin::User => guard.append(Turn::user(turn.text.clone())),
                    TurnOrigin::ToolResult { name } => {
                        guard.append(Turn::tool(name.clone(), turn.text.clone()))
                    }
                }
            }

            let (mut system, caller, session_id, turns_snapshot) = {
                let guard = session.lock().await;
                (
                    guard.system_message.clone(),
                    guard.caller_number.clone(),
                    guard.id.as_str().to_string(),
                    guard.turns.clone(),
                )
            };

            // Recall context only augments genuine user exchanges.
            if is_user_turn {
                if let Some(ref caller) = caller {
                    let summary = self.recall.summarize(caller).await;
                    if !summary.is_empty() {
                        system.push_str("\n\n");
                        system.push_str(&summary);
                    }
                    let recalled = self.recall.retrieve(caller, &turn.text, &session_id).await;
                    if !recalled.is_empty() {
                        system.push_str("\n\n");
                        system.push_str(&format_recalled(&recalled));
                    }
                }
            }

            let tool_defs = if self.tools.is_empty() {
                None
            } else {
                Some(self.provider.format_tools(&self.tools.definitions()))
            };

            let request = CompletionRequest {
                model: self.config.model(),
                messages: self.provider.format_messages(&turns_snapshot),
                max_tokens: self.config.max_tokens(),
                temperature: self.config.temperature(),
                tools: tool_defs,
                system: Some(system),
            };

            let stream = self
                .provider
                .stream(&request, &self.credentials)
                .await
                .map_err(|e| {
                    error!(%e, "Provider stream open failed");
                    VoxbridgeError::Provider(e.to_string())
                })?;
            let mut stream = std::pin::pin!(stream);

            let mut sentence = SentenceBuffer::new();
            let mut full_text = String::new();
            let mut tool_calls: Vec<ToolUseChunk> = Vec::new();
            let mut input_tokens = 0u64;
            let mut output_tokens = 0u64;
            let mut preempted = false;

            while let Some(chunk_result) = stream.next().await {
                if self.shared.epoch() != epoch {
                    preempted = true;
                    break;
                }
                match chunk_result {
                    Ok(chunk) => {
                        if let Some(ref delta) = chunk.delta {
                            full_text.push_str(delta);
                            for s in sentence.push(delta) {
                                self.emit(epoch, &s);
                            }
                        }
                        if let Some(tool_use) = chunk.tool_use {
                            info!(tool = %tool_use.name, "Tool call detected");
                            tool_calls.push(tool_use);
                        }
                        if let Some(usage) = chunk.usage {
                            input_tokens = usage.input_tokens.unwrap_or(input_tokens);
                            output_tokens = usage.output_tokens.unwrap_or(output_tokens);
                        }
                    }
                    Err(e) => {
                        // Abort this exchange gracefully; whole sentences
                        // already emitted stand, nothing partial goes out.
                        error!(%e, "Stream chunk error, aborting exchange");
                        return Ok(());
                    }
                }
            }

            if preempted {
                debug!("Exchange preempted by barge-in, discarding buffered fragment");
                return Ok(());
            }

            // Stream end is a flush point for the trailing fragment.
            if let Some(fragment) = sentence.flush() {
                self.emit(epoch, &fragment);
            }

            debug!(input_tokens, output_tokens, "Exchange stream complete");

            if !full_text.trim().is_empty() {
                session.lock().await.append(Turn::assistant(full_text.clone()));
            }

            // Genuine user exchanges feed the recall store.
            if is_user_turn && !full_text.trim().is_empty() {
                if let Some(ref caller) = caller {
                    let sequence = {
                        let guard = session.lock().await;
                        guard
                            .turns
                            .iter()
                            .filter(|t| matches!(t.role, Role::User))
                            .count() as u64
                    };
                    let metadata = HashMap::from([(
                        "system_message".to_string(),
                        self.config.system_message(),
                    )]);
                    self.recall
                        .store(caller, &session_id, &turn.text, &full_text, sequence, metadata)
                        .await;
                }
            }

            // Execute tool calls detected in this stream.
            for tool_use in tool_calls {
                let Some(tool) = self.tools.get(&tool_use.name) else {
                    error!(tool = %tool_use.name, "Model invoked unknown tool");
                    return Err(VoxbridgeError::Tool(format!(
                        "unknown tool: {}",
                        tool_use.name
                    )));
                };

                let mut args = parse_tool_args(&tool_use.input_json);
                self.backfill_args(session, tool, &mut args).await;

                // A query-taking tool with no derivable query is skipped
                // with a spoken clarification instead of a bogus dispatch.
                if tool.required_args().contains(&"query") && !has_arg(&args, "query") {
                    warn!(tool = %tool_use.name, "Skipping call, query argument underivable");
                    self.emit(epoch, QUERY_CLARIFICATION);
                    continue;
                }

                let ack = tool.acknowledgment().to_string();
                self.emit(epoch, &ack);
                session.lock().await.append(Turn::assistant(ack));

                info!(tool = %tool_use.name, args = %args, "Executing tool");
                let result = {
                    let mut guard = session.lock().await;
                    let result = tool.execute(&mut guard, &args, &self.tool_ctx).await;
                    guard.append(Turn::tool(tool_use.name.clone(), result.clone()));
                    result
                };

                if tool.is_terminal() {
                    info!(tool = %tool_use.name, "Terminal tool, ending exchange");
                    return Ok(());
                }

                if !tool.is_reentrant() {
                    // Speak the tool's own text (confirmation or
                    // clarification) instead of recursing into the model.
                    self.emit(epoch, &result);
                    session.lock().await.append(Turn::assistant(result));
                } else {
                    pending = Some(IncomingTurn {
                        origin: TurnOrigin::ToolResult {
                            name: tool_use.name.clone(),
                        },
                        text: result,
                    });
                }
            }
        }

        Ok(())
    }

    /// Fill well-known required arguments from session state when the model
    /// omitted them.
    async fn backfill_args(
        &self,
        session: &SessionHandle,
        tool: &dyn Tool,
        args: &mut serde_json::Value,
    ) {
        for required in tool.required_args() {
            if has_arg(args, required) {
                continue;
            }
            let filled = match *required {
                "query" => {
                    let guard = session.lock().await;
                    guard
                        .last_user_turn()
                        .and_then(|t| infer_query(&t.content))
                }
                "to_number" => session.lock().await.caller_number.clone(),
                "to_email" => session.lock().await.user_email.clone(),
                _ => None,
            };
            if let Some(value) = filled {
                debug!(arg = %required, value = %value, "Back-filled missing argument");
                args[*required] = json!(value);
            }
        }
    }
}

fn has_arg(args: &serde_json::Value, key: &str) -> bool {
    args.get(key)
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.trim().is_empty())
}

/// Parse tool arguments leniently: malformed JSON yields an empty object.
fn parse_tool_args(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(_) | Err(_) => {
            warn!(raw, "Invalid tool arguments from model, using empty object");
            json!({})
        }
    }
}

/// Derive a topic from an utterance like "send me something about X".
fn infer_query(utterance: &str) -> Option<String> {
    let lower = utterance.to_lowercase();
    let after = lower.split("about").nth(1)?;
    let mut topic = after.trim();
    if let Some(stripped) = topic.strip_prefix("the ") {
        topic = stripped;
    }
    let topic = topic.trim_end_matches(['.', '!', '?', ',']).trim();
    if topic.is_empty() {
        None
    } else {
        Some(topic.to_string())
    }
}

/// Render recalled exchanges into system-prompt context.
fn format_recalled(recalled: &[RecalledExchange]) -> String {
    let mut parts = vec!["Previous relevant conversations:".to_string()];
    for (i, exchange) in recalled.iter().enumerate() {
        let day = exchange.timestamp.get(..10).unwrap_or(&exchange.timestamp);
        parts.push(format!("\n{}. From {}:", i + 1, day));
        parts.push(format!("   User: {}", exchange.user_text));
        parts.push(format!("   Assistant: {}", exchange.assistant_text));
        parts.push(format!("   (Similarity: {:.2})", exchange.score));
    }
    parts.join("\n")
}
