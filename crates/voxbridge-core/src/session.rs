//! Session model — per-call conversation state and side-effect bookkeeping.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Duplicate side-effect dispatches inside this window are suppressed.
pub const SIDE_EFFECT_COOLDOWN_SECS: i64 = 120;

/// Opaque per-call identifier (the signaling plane's call sid).
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One entry in the append-only conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Set when `role == Tool`: the tool that produced this result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_name: Some(name.into()),
        }
    }
}

/// Per-tool invocation state, used to refuse rapid retries of a tool that
/// just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Idle,
    Processing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAttempt {
    pub status: ToolStatus,
    pub last_attempt: DateTime<Utc>,
}

/// Record of a dispatched side effect (summary/info send), keyed by
/// `"<kind>:<recipient>"` in [`Session::side_effects`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideEffectRecord {
    pub timestamp: DateTime<Utc>,
    pub recipient: String,
    pub result: String,
}

/// Mutable per-call state. Owned by the dispatcher task for the call's
/// lifetime; other components read it through the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: CallId,

    /// Transport stream identifier, set once on the start event.
    pub stream_sid: Option<String>,

    /// Resolved caller number, when known.
    pub caller_number: Option<String>,

    /// Email supplied when the call was placed from the control plane.
    pub user_email: Option<String>,

    pub system_message: String,
    pub opening_line: String,

    /// Append-only conversation transcript.
    pub turns: Vec<Turn>,

    /// Re-entrancy / retry guard state per tool name.
    pub pending_tools: HashMap<String, ToolAttempt>,

    /// Duplicate-dispatch suppression for side-effecting tools.
    pub side_effects: HashMap<String, SideEffectRecord>,

    /// Data collected during the call (e.g. the scheduled calendar event),
    /// folded into summaries.
    pub collected_data: HashMap<String, serde_json::Value>,

    pub started_at: DateTime<Utc>,
    pub ended: bool,
}

impl Session {
    pub fn new(id: CallId, system_message: String, opening_line: String) -> Self {
        // Seed the transcript so the first model exchange sees the greeting
        // it already spoke.
        let turns = vec![Turn::user("Hello"), Turn::assistant(opening_line.clone())];
        Self {
            id,
            stream_sid: None,
            caller_number: None,
            user_email: None,
            system_message,
            opening_line,
            turns,
            pending_tools: HashMap::new(),
            side_effects: HashMap::new(),
            collected_data: HashMap::new(),
            started_at: Utc::now(),
            ended: false,
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Most recent user turn, if any.
    pub fn last_user_turn(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| matches!(t.role, Role::User))
    }

    pub fn mark_tool(&mut self, name: &str, status: ToolStatus) {
        self.pending_tools.insert(
            name.to_string(),
            ToolAttempt {
                status,
                last_attempt: Utc::now(),
            },
        );
    }

    /// Whether `name` failed within the last `within_secs` seconds.
    pub fn tool_failed_recently(&self, name: &str, within_secs: i64) -> bool {
        self.pending_tools.get(name).is_some_and(|a| {
            a.status == ToolStatus::Failed
                && Utc::now() - a.last_attempt < Duration::seconds(within_secs)
        })
    }

    /// Whether a side effect with this key was dispatched inside the
    /// cool-down window.
    pub fn side_effect_recent(&self, key: &str) -> bool {
        self.side_effects.get(key).is_some_and(|r| {
            Utc::now() - r.timestamp < Duration::seconds(SIDE_EFFECT_COOLDOWN_SECS)
        })
    }

    pub fn record_side_effect(&mut self, key: &str, recipient: &str, result: &str) {
        self.side_effects.insert(
            key.to_string(),
            SideEffectRecord {
                timestamp: Utc::now(),
                recipient: recipient.to_string(),
                result: result.to_string(),
            },
        );
    }
}
