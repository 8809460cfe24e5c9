//! WhatsApp delivery tools: call summary and topic info.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use voxbridge_core::session::Session;
use voxbridge_telephony::messaging::MAX_BODY_CHARS;

use crate::summary::{conversation_summary, info_text, render_transcript};
use crate::{Tool, ToolContext};

/// Resolve the recipient number: explicit argument, then the session's
/// caller number, then a signaling-plane lookup.
async fn resolve_number(
    session: &Session,
    args: &serde_json::Value,
    ctx: &ToolContext,
) -> Option<String> {
    if let Some(number) = args.get("to_number").and_then(|v| v.as_str()) {
        if !number.trim().is_empty() {
            return Some(number.to_string());
        }
    }
    if let Some(ref number) = session.caller_number {
        return Some(number.clone());
    }
    if let Some(signaling) = ctx.signaling.as_ref() {
        match signaling.fetch_call(session.id.as_str()).await {
            Ok(details) => return signaling.counterparty(&details),
            Err(e) => warn!(%e, "Caller number lookup failed"),
        }
    }
    None
}

// --- send_whatsapp_summary ---

pub struct SendWhatsappSummaryTool;

#[async_trait]
impl Tool for SendWhatsappSummaryTool {
    fn name(&self) -> &str {
        "send_whatsapp_summary"
    }

    fn description(&self) -> &str {
        "Send a summary of the conversation to the user's WhatsApp. ONLY use this when \
         the user EXPLICITLY requests a summary to be sent to WhatsApp. DO NOT use this \
         function automatically at the end of calls or repeatedly during the same call \
         unless specifically requested again by the user."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "to_number": {
                    "type": "string",
                    "description": "The phone number to send the WhatsApp message to \
                                    (with country code, e.g., +1234567890)"
                },
                "include_transcript": {
                    "type": "boolean",
                    "description": "Whether to include the full conversation transcript"
                },
                "force_send": {
                    "type": "boolean",
                    "description": "Force send even if a summary was sent recently (use \
                                    only when the user explicitly asks again)"
                }
            },
            "required": []
        })
    }

    fn acknowledgment(&self) -> &str {
        "I'll send a summary of our conversation to your WhatsApp. You should receive \
         it shortly."
    }

    fn is_reentrant(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        session: &mut Session,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> String {
        let Some(messaging) = ctx.messaging.as_ref() else {
            return "I couldn't send a WhatsApp message because messaging is not configured."
                .to_string();
        };

        let Some(to_number) = resolve_number(session, args, ctx).await else {
            return "I need a phone number to send the WhatsApp summary to.".to_string();
        };

        let force_send = args
            .get("force_send")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let effect_key = format!("whatsapp_summary:{to_number}");
        if !force_send && session.side_effect_recent(&effect_key) {
            info!(to = %to_number, "Summary already sent recently, suppressing duplicate");
            return "I've already sent a summary to your WhatsApp just now. Check your messages."
                .to_string();
        }

        let mut body = conversation_summary(session, ctx).await;

        let include_transcript = args
            .get("include_transcript")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if include_transcript {
            let transcript = render_transcript(session);
            if body.len() + transcript.len() > MAX_BODY_CHARS {
                body.push_str("\n\nThe full transcript was too long to include.");
            } else {
                body.push_str(&transcript);
            }
        }

        match messaging.send_whatsapp(&to_number, &body).await {
            Ok(sid) => {
                info!(to = %to_number, message = %sid, "WhatsApp summary sent");
                session.record_side_effect(&effect_key, &to_number, "sent");
                "I've sent a summary of our conversation to your WhatsApp. You should \
                 receive it shortly."
                    .to_string()
            }
            Err(e) => {
                warn!(%e, "WhatsApp summary send failed");
                format!("I encountered an error while sending the WhatsApp summary: {e}")
            }
        }
    }
}

// --- send_whatsapp_info ---

pub struct SendWhatsappInfoTool;

#[async_trait]
impl Tool for SendWhatsappInfoTool {
    fn name(&self) -> &str {
        "send_whatsapp_info"
    }

    fn description(&self) -> &str {
        "Send specific information to the user's WhatsApp. Use this function ONLY when \
         a user EXPLICITLY asks for information to be sent to their WhatsApp AND you \
         know exactly what topic they want information about. Never call this function \
         with an empty query parameter."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The SPECIFIC information topic the user wants sent. \
                                    This must be extracted from the user's request and \
                                    CANNOT be empty."
                },
                "info_type": {
                    "type": "string",
                    "description": "General category of information"
                },
                "to_number": {
                    "type": "string",
                    "description": "The phone number to send the WhatsApp message to \
                                    (with country code, e.g., +1234567890)"
                },
                "custom_text": {
                    "type": "string",
                    "description": "Custom text to send instead of generating content"
                }
            },
            "required": ["query"]
        })
    }

    fn required_args(&self) -> &[&str] {
        &["query"]
    }

    fn acknowledgment(&self) -> &str {
        "I'll send that information to your WhatsApp right away. You should receive \
         it shortly."
    }

    fn is_reentrant(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        session: &mut Session,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> String {
        let Some(query) = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
        else {
            return "I'm not sure what information you'd like me to send. Could you tell \
                    me specifically what you want to know about?"
                .to_string();
        };

        let Some(messaging) = ctx.messaging.as_ref() else {
            return "I couldn't send a WhatsApp message because messaging is not configured."
                .to_string();
        };

        let Some(to_number) = resolve_number(session, args, ctx).await else {
            return "I need a phone number to send that information to.".to_string();
        };

        let body = match args.get("custom_text").and_then(|v| v.as_str()) {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => match info_text(query, ctx).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(%e, "Info generation failed");
                    return format!("I couldn't put together that information right now: {e}");
                }
            },
        };

        match messaging.send_whatsapp(&to_number, &body).await {
            Ok(sid) => {
                info!(to = %to_number, message = %sid, topic = %query, "WhatsApp info sent");
                format!(
                    "I've sent the information about {query} to your WhatsApp. You should \
                     receive it shortly."
                )
            }
            Err(e) => {
                warn!(%e, "WhatsApp info send failed");
                format!("I encountered an error while sending that information: {e}")
            }
        }
    }
}
