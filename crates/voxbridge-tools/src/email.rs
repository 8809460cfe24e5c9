//! Email delivery tools: call summary and topic info.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use voxbridge_core::session::Session;

use crate::summary::{conversation_summary, info_text, render_transcript};
use crate::{Tool, ToolContext};

/// Resolve the recipient address: explicit argument, then the address stored
/// when the call was placed.
fn resolve_address(session: &Session, args: &serde_json::Value) -> Option<String> {
    if let Some(address) = args.get("to_email").and_then(|v| v.as_str()) {
        if !address.trim().is_empty() {
            return Some(address.to_string());
        }
    }
    session.user_email.clone()
}

// --- send_email_summary ---

pub struct SendEmailSummaryTool;

#[async_trait]
impl Tool for SendEmailSummaryTool {
    fn name(&self) -> &str {
        "send_email_summary"
    }

    fn description(&self) -> &str {
        "Send a summary of the conversation to the user's email address. Use this when \
         the user explicitly asks for an email summary of the call or wants the \
         conversation details sent via email."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "to_email": {
                    "type": "string",
                    "description": "The email address to send the summary to"
                },
                "include_transcript": {
                    "type": "boolean",
                    "description": "Whether to include the full conversation transcript"
                }
            },
            "required": []
        })
    }

    fn acknowledgment(&self) -> &str {
        "I'll send a summary of our conversation to your email. You should receive \
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
        let Some(email) = ctx.email.as_ref() else {
            return "I couldn't send an email because email delivery is not configured."
                .to_string();
        };

        let Some(to_email) = resolve_address(session, args) else {
            return "I need an email address to send the summary to.".to_string();
        };

        let effect_key = format!("email_summary:{to_email}");
        if session.side_effect_recent(&effect_key) {
            info!(to = %to_email, "Email summary already sent recently, suppressing duplicate");
            return "I've already sent a summary to your email just now. Check your inbox."
                .to_string();
        }

        let mut body = conversation_summary(session, ctx).await;
        if args
            .get("include_transcript")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            body.push_str(&render_transcript(session));
        }

        match email.send(&to_email, "Your call summary", &body).await {
            Ok(()) => {
                info!(to = %to_email, "Email summary sent");
                session.record_side_effect(&effect_key, &to_email, "sent");
                "I've sent a summary of our conversation to your email. You should \
                 receive it shortly."
                    .to_string()
            }
            Err(e) => {
                warn!(%e, "Email summary send failed");
                format!("I encountered an error while sending the email summary: {e}")
            }
        }
    }
}

// --- send_email_info ---

pub struct SendEmailInfoTool;

#[async_trait]
impl Tool for SendEmailInfoTool {
    fn name(&self) -> &str {
        "send_email_info"
    }

    fn description(&self) -> &str {
        "Send specific information to the user's email address. Use this function ONLY \
         when a user EXPLICITLY asks for information to be sent to their email AND you \
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
                "to_email": {
                    "type": "string",
                    "description": "The email address to send the information to"
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
        "I'll send that information to your email right away. You should receive \
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

        let Some(email) = ctx.email.as_ref() else {
            return "I couldn't send an email because email delivery is not configured."
                .to_string();
        };

        let Some(to_email) = resolve_address(session, args) else {
            return "I need an email address to send that information to.".to_string();
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

        let subject = format!("Information about {query}");
        match email.send(&to_email, &subject, &body).await {
            Ok(()) => {
                info!(to = %to_email, topic = %query, "Email info sent");
                format!(
                    "I've sent the information about {query} to your email. You should \
                     receive it shortly."
                )
            }
            Err(e) => {
                warn!(%e, "Email info send failed");
                format!("I encountered an error while sending that information: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{context_without_integrations, session};

    #[test]
    fn test_resolve_address_prefers_argument() {
        let mut s = session();
        s.user_email = Some("stored@example.com".into());
        assert_eq!(
            resolve_address(&s, &json!({"to_email": "given@example.com"})),
            Some("given@example.com".to_string())
        );
        assert_eq!(
            resolve_address(&s, &json!({})),
            Some("stored@example.com".to_string())
        );
    }

    #[test]
    fn test_resolve_address_none_when_unknown() {
        let s = session();
        assert_eq!(resolve_address(&s, &json!({})), None);
    }

    #[tokio::test]
    async fn test_summary_without_email_client_degrades() {
        let ctx = context_without_integrations();
        let mut s = session();
        let result = SendEmailSummaryTool.execute(&mut s, &json!({}), &ctx).await;
        assert!(result.contains("not configured"));
    }

    #[tokio::test]
    async fn test_info_without_query_asks_for_clarification() {
        let ctx = context_without_integrations();
        let mut s = session();
        let result = SendEmailInfoTool.execute(&mut s, &json!({}), &ctx).await;
        assert!(result.contains("what information"));
    }
}
