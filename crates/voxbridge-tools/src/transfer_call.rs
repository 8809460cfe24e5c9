//! Terminal tool: hand the call to a human.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use voxbridge_core::session::Session;

use crate::{Tool, ToolContext};

/// Grace period so the hand-off announcement finishes playing first.
const TRANSFER_GRACE_SECS: u64 = 8;

pub struct TransferCallTool;

#[async_trait]
impl Tool for TransferCallTool {
    fn name(&self) -> &str {
        "transfer_call"
    }

    fn description(&self) -> &str {
        "Transfer the call to a human representative only if the user explicitly \
         requests to speak with a person or if you cannot solve their problem."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn acknowledgment(&self) -> &str {
        "I'll transfer you to a human representative who can help you further. \
         Please hold the line for a moment."
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
            warn!("transfer_call invoked without signaling configured");
            return "I couldn't transfer the call because call control is not configured."
                .to_string();
        };

        let Some(transfer_number) = ctx
            .config
            .telephony
            .as_ref()
            .and_then(|t| t.transfer_number.clone())
        else {
            warn!("transfer_call invoked without a transfer number configured");
            return "I couldn't transfer the call because no transfer destination is configured."
                .to_string();
        };

        let call_sid = session.id.as_str().to_string();
        info!(call = %call_sid, to = %transfer_number, "Preparing call transfer");

        tokio::time::sleep(std::time::Duration::from_secs(TRANSFER_GRACE_SECS)).await;

        match signaling.transfer_call(&call_sid, &transfer_number).await {
            Ok(()) => {
                session.ended = true;
                format!("Call transferred successfully to {transfer_number}.")
            }
            Err(e) => {
                warn!(%e, "Failed to transfer call");
                format!("Error transferring call: {e}")
            }
        }
    }
}
