//! Tool implementations exposed to the model during a call.
//!
//! Every tool implements [`Tool`]. The manifest is closed: the registry is
//! built once at startup and duplicate or unknown names are rejected there,
//! not at call time. Tool execution never raises — every failure path
//! returns a caller-facing sentence, so the playback pipeline always
//! receives a valid turn.

use std::sync::Arc;

use async_trait::async_trait;

use voxbridge_core::config::Config;
use voxbridge_core::error::VoxbridgeError;
use voxbridge_core::session::Session;
use voxbridge_providers::{Credentials, LlmProvider, ToolDefinition};
use voxbridge_telephony::{CalendarClient, EmailClient, MessagingClient, SignalingClient};

pub mod calendar;
pub mod email;
pub mod end_call;
pub mod summary;
pub mod transfer_call;
pub mod whatsapp;

pub use calendar::AddCalendarEventTool;
pub use email::{SendEmailInfoTool, SendEmailSummaryTool};
pub use end_call::EndCallTool;
pub use transfer_call::TransferCallTool;
pub use whatsapp::{SendWhatsappInfoTool, SendWhatsappSummaryTool};

/// Shared clients handed to tools at execution time. Optional fields are
/// integrations that may be disabled by configuration.
pub struct ToolContext {
    pub config: Arc<Config>,
    pub provider: Arc<dyn LlmProvider>,
    pub credentials: Credentials,
    pub signaling: Option<Arc<SignalingClient>>,
    pub messaging: Option<Arc<MessagingClient>>,
    pub email: Option<Arc<EmailClient>>,
    pub calendar: Option<Arc<CalendarClient>>,
}

/// A capability the model can invoke mid-call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name as advertised to the model.
    fn name(&self) -> &str;

    /// Description for the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Argument names the engine should back-fill or refuse on when absent.
    fn required_args(&self) -> &[&str] {
        &[]
    }

    /// Spoken immediately when the call is detected, before execution.
    fn acknowledgment(&self) -> &str;

    /// Terminal tools end the session; the engine never continues after one.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Non-reentrant tools' results must not be fed back into the model —
    /// doing so reliably re-triggers the same tool.
    fn is_reentrant(&self) -> bool {
        true
    }

    /// Run the tool. Always returns user-facing text.
    async fn execute(
        &self,
        session: &mut Session,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> String;
}

/// Closed set of tools, constructed once at startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, rejecting duplicate names.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> voxbridge_core::error::Result<()> {
        if self.get(tool.name()).is_some() {
            return Err(VoxbridgeError::Tool(format!(
                "duplicate tool name: {}",
                tool.name()
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    /// The full built-in manifest.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for tool in [
            Box::new(TransferCallTool) as Box<dyn Tool>,
            Box::new(EndCallTool),
            Box::new(AddCalendarEventTool),
            Box::new(SendWhatsappSummaryTool),
            Box::new(SendWhatsappInfoTool),
            Box::new(SendEmailSummaryTool),
            Box::new(SendEmailInfoTool),
        ] {
            // Built-in names are distinct; a clash is a programming error
            // caught by the registry tests.
            let _ = registry.register(tool);
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for the provider's tool manifest.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters_schema: t.parameters_schema(),
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_manifest_is_complete() {
        let registry = ToolRegistry::standard();
        let mut names = registry.names();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "add_calendar_event",
                "end_call",
                "send_email_info",
                "send_email_summary",
                "send_whatsapp_info",
                "send_whatsapp_summary",
                "transfer_call",
            ]
        );
    }

    #[test]
    fn test_unknown_name_rejected() {
        let registry = ToolRegistry::standard();
        assert!(registry.get("launch_rocket").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::standard();
        let err = registry.register(Box::new(EndCallTool)).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_terminal_and_reentrancy_flags() {
        let registry = ToolRegistry::standard();
        assert!(registry.get("end_call").unwrap().is_terminal());
        assert!(registry.get("transfer_call").unwrap().is_terminal());

        // Every externally side-effecting, non-terminal tool is marked
        // non-reentrant.
        for name in [
            "add_calendar_event",
            "send_whatsapp_summary",
            "send_whatsapp_info",
            "send_email_summary",
            "send_email_info",
        ] {
            let tool = registry.get(name).unwrap();
            assert!(!tool.is_reentrant(), "{name} should be non-reentrant");
            assert!(!tool.is_terminal(), "{name} should not be terminal");
        }
    }

    #[test]
    fn test_every_tool_has_acknowledgment() {
        let registry = ToolRegistry::standard();
        for name in registry.names() {
            let tool = registry.get(name).unwrap();
            assert!(
                !tool.acknowledgment().trim().is_empty(),
                "{name} has no acknowledgment"
            );
        }
    }

    #[test]
    fn test_definitions_carry_schemas() {
        let registry = ToolRegistry::standard();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 7);
        for def in defs {
            assert_eq!(def.parameters_schema["type"], "object");
        }
    }

    #[test]
    fn test_required_args() {
        let registry = ToolRegistry::standard();
        assert_eq!(
            registry.get("send_whatsapp_info").unwrap().required_args(),
            ["query"]
        );
        assert_eq!(
            registry.get("send_email_info").unwrap().required_args(),
            ["query"]
        );
        assert!(registry.get("end_call").unwrap().required_args().is_empty());
    }
}
