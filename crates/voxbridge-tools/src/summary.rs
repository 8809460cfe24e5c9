//! Text generation for outbound summaries and info messages, driven through
//! the same provider the engine streams from.

use chrono::Utc;
use tracing::{error, info};

use voxbridge_core::session::{Role, Session, Turn};
use voxbridge_providers::{collect_text, CompletionRequest};

use crate::ToolContext;

const SUMMARY_SYSTEM_PROMPT: &str = "You are an AI that creates concise summaries of phone \
conversations. Summarize the conversation in 3-5 bullet points, highlighting: \
1. The main purpose of the call \
2. Key information discussed \
3. Actions taken or promised \
4. Any follow-up needed \
Format the summary professionally and concisely.";

const INFO_SYSTEM_PROMPT: &str = "You are an assistant that writes short, useful text messages. \
Write a concise, informative message about the requested topic, suitable for \
sending as a single message. No greetings or sign-offs.";

/// Summarize the call so far. Falls back to an apology sentence on provider
/// failure; a calendar event collected during the call is appended.
pub async fn conversation_summary(session: &Session, ctx: &ToolContext) -> String {
    let spoken_turns: Vec<Turn> = session
        .turns
        .iter()
        .filter(|t| matches!(t.role, Role::User | Role::Assistant))
        .cloned()
        .collect();

    let request = CompletionRequest {
        model: ctx.config.model(),
        messages: ctx.provider.format_messages(&spoken_turns),
        max_tokens: 500,
        temperature: None,
        tools: None,
        system: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
    };

    let mut summary = match ctx.provider.stream(&request, &ctx.credentials).await {
        Ok(stream) => match collect_text(stream).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(_) => {
                error!("Summary generation produced no text");
                return "An error occurred while generating the call summary.".to_string();
            }
        },
        Err(e) => {
            error!(%e, "Summary generation failed");
            return "An error occurred while generating the call summary.".to_string();
        }
    };

    if let Some(event) = session.collected_data.get("calendar_event") {
        let title = event.get("title").and_then(|v| v.as_str()).unwrap_or("?");
        let date = event.get("date").and_then(|v| v.as_str()).unwrap_or("?");
        let start = event
            .get("start_time")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let end = event.get("end_time").and_then(|v| v.as_str()).unwrap_or("?");
        summary.push_str(&format!(
            "\n\nScheduled event:\n- Event: {title}\n- Date: {date}\n- Time: {start} to {end}"
        ));
    }

    summary.push_str(&format!(
        "\n\nSummary generated on {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));

    info!(chars = summary.len(), "Generated conversation summary");
    summary
}

/// Generate a short informational text about `query`.
pub async fn info_text(query: &str, ctx: &ToolContext) -> anyhow::Result<String> {
    let request = CompletionRequest {
        model: ctx.config.model(),
        messages: vec![serde_json::json!({
            "role": "user",
            "content": format!("Write a short informative message about: {query}"),
        })],
        max_tokens: 500,
        temperature: None,
        tools: None,
        system: Some(INFO_SYSTEM_PROMPT.to_string()),
    };

    let stream = ctx.provider.stream(&request, &ctx.credentials).await?;
    let text = collect_text(stream).await?;
    if text.trim().is_empty() {
        anyhow::bail!("info generation produced no text");
    }
    Ok(text)
}

/// Render the spoken transcript for inclusion in a summary message.
pub fn render_transcript(session: &Session) -> String {
    let mut transcript = String::from("\n\nFull conversation transcript:\n");
    for turn in &session.turns {
        match turn.role {
            Role::User => transcript.push_str(&format!("\nYou: {}\n", turn.content)),
            Role::Assistant => transcript.push_str(&format!("\nAssistant: {}\n", turn.content)),
            Role::Tool => {}
        }
    }
    transcript
}
