//! Terminal tool: end the call once the goodbye has gone out.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use voxbridge_core::session::Session;

use crate::{Tool, ToolContext};

/// Grace period so the goodbye line reaches the caller before the leg drops.
const HANGUP_GRACE_SECS: u64 = 5;

/// Call states that mean the leg is already down.
const ENDED_STATES: [&str; 5] = ["completed", "failed", "busy", "no-answer", "canceled"];

pub struct EndCallTool;

#[async_trait]
impl Tool for EndCallTool {
    fn name(&self) -> &str {
        "end_call"
    }

    fn description(&self) -> &str {
        "End the current call. Use this when the conversation has reached a natural \
         conclusion, the user's query has been fully addressed, or the user asks to \
         end the call."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn acknowledgment(&self) -> &str {
        "Thank you for calling. Have a great day! Goodbye."
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        session: &mut Session,
        _args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> String {
        let Some(signaling) = ctx.signaling.as_ref() else {
            warn!("end_call invoked without signaling configured");
            return "I couldn't end the call because call control is not configured.".to_string();
        };

        let call_sid = session.id.as_str().to_string();
        info!(call = %call_sid, "Ending call");

        match signaling.fetch_call(&call_sid).await {
            Ok(details) => {
                if let Some(status) = details.status.as_deref() {
                    if ENDED_STATES.contains(&status) {
                        return format!("Call already ended with status: {status}");
                    }
                }
            }
            Err(e) => warn!(%e, "Could not fetch call before ending, proceeding"),
        }

        tokio::time::sleep(std::time::Duration::from_secs(HANGUP_GRACE_SECS)).await;

        match signaling.end_call(&call_sid).await {
            Ok(status) => {
                session.ended = true;
                format!("Call ended successfully. Final status: {status}")
            }
            Err(e) => {
                warn!(%e, "Failed to end call");
                format!("Error ending call: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{context_without_integrations, session};

    #[tokio::test]
    async fn test_end_call_without_signaling_degrades() {
        let ctx = context_without_integrations();
        let mut s = session();
        let result = EndCallTool.execute(&mut s, &json!({}), &ctx).await;
        assert!(result.contains("not configured"));
        assert!(!s.ended);
    }
}
