//! Calendar scheduling tool.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

use voxbridge_core::session::{Session, ToolStatus};
use voxbridge_telephony::calendar::CalendarEvent;

use crate::{Tool, ToolContext};

/// A failed attempt inside this window is not retried automatically.
const RETRY_GUARD_SECS: i64 = 10;

pub struct AddCalendarEventTool;

fn arg_str(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Validate arguments into an event, or name what is missing/wrong.
fn validate_event(args: &serde_json::Value) -> Result<CalendarEvent, String> {
    let title = arg_str(args, "title");
    let date = arg_str(args, "date");
    let start_time = arg_str(args, "start_time");
    let end_time = arg_str(args, "end_time");

    let mut missing = Vec::new();
    if title.is_none() {
        missing.push("title");
    }
    if date.is_none() {
        missing.push("date");
    }
    if start_time.is_none() {
        missing.push("start time");
    }
    if end_time.is_none() {
        missing.push("end time");
    }

    if !missing.is_empty() {
        return Err(format!(
            "I need all the event details to schedule it. Please provide the following: {}.",
            missing.join(", ")
        ));
    }

    let date = date.unwrap_or_default();
    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return Err(
            "The date format seems incorrect. Please say the month, day and year clearly."
                .to_string(),
        );
    }

    Ok(CalendarEvent {
        title: title.unwrap_or_default(),
        date,
        start_time: start_time.unwrap_or_default(),
        end_time: end_time.unwrap_or_default(),
        description: arg_str(args, "description"),
    })
}

#[async_trait]
impl Tool for AddCalendarEventTool {
    fn name(&self) -> &str {
        "add_calendar_event"
    }

    fn description(&self) -> &str {
        "Add an event to the user's calendar. Use this when a user wants to schedule \
         an appointment, meeting, or any other event. Collect all necessary details \
         like date, time, title, and duration in a natural conversation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "The title or name of the event"
                },
                "date": {
                    "type": "string",
                    "description": "The date of the event in YYYY-MM-DD format"
                },
                "start_time": {
                    "type": "string",
                    "description": "The starting time of the event in HH:MM format 24-hour"
                },
                "end_time": {
                    "type": "string",
                    "description": "The ending time of the event in HH:MM format 24-hour"
                },
                "description": {
                    "type": "string",
                    "description": "Optional description of the event"
                }
            },
            "required": ["title", "date", "start_time", "end_time"]
        })
    }

    fn required_args(&self) -> &[&str] {
        &["title", "date", "start_time", "end_time"]
    }

    fn acknowledgment(&self) -> &str {
        "I'll schedule that event for you. Just a moment while I add it to your calendar."
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
        if session.tool_failed_recently(self.name(), RETRY_GUARD_SECS) {
            return "I'm still having trouble scheduling your event. Let me know if you'd \
                    like to try again with complete details."
                .to_string();
        }
        session.mark_tool(self.name(), ToolStatus::Processing);

        let event = match validate_event(args) {
            Ok(event) => event,
            Err(message) => {
                session.mark_tool(self.name(), ToolStatus::Failed);
                return message;
            }
        };

        let Some(calendar) = ctx.calendar.as_ref() else {
            session.mark_tool(self.name(), ToolStatus::Failed);
            return "I couldn't access your calendar. The authentication credentials are missing."
                .to_string();
        };

        match calendar.insert_event(&event).await {
            Ok(()) => {
                session.mark_tool(self.name(), ToolStatus::Succeeded);
                session.collected_data.insert(
                    "calendar_event".to_string(),
                    json!({
                        "title": event.title,
                        "date": event.date,
                        "start_time": event.start_time,
                        "end_time": event.end_time,
                    }),
                );
                info!(title = %event.title, "Calendar event added");
                event.confirmation()
            }
            Err(e) => {
                warn!(%e, "Calendar insert failed");
                session.mark_tool(self.name(), ToolStatus::Failed);
                format!("I'm having trouble adding this event to your calendar: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{context_without_integrations, session};
    use voxbridge_core::session::ToolStatus;

    #[test]
    fn test_validate_event_names_missing_fields() {
        let err = validate_event(&json!({
            "title": "Standup",
            "date": "2026-08-07",
            "start_time": "15:00",
        }))
        .unwrap_err();
        assert!(err.contains("end time"));
        assert!(!err.contains("start time,"));
    }

    #[test]
    fn test_validate_event_rejects_bad_date() {
        let err = validate_event(&json!({
            "title": "Standup",
            "date": "tomorrow",
            "start_time": "15:00",
            "end_time": "15:30",
        }))
        .unwrap_err();
        assert!(err.contains("date format"));
    }

    #[test]
    fn test_validate_event_complete() {
        let event = validate_event(&json!({
            "title": "Standup",
            "date": "2026-08-07",
            "start_time": "15:00",
            "end_time": "15:30",
        }))
        .unwrap();
        assert_eq!(event.title, "Standup");
        assert!(event.description.is_none());
    }

    #[tokio::test]
    async fn test_missing_field_reports_and_marks_failed() {
        let ctx = context_without_integrations();
        let mut s = session();
        let result = AddCalendarEventTool
            .execute(
                &mut s,
                &json!({
                    "title": "Standup",
                    "date": "2026-08-07",
                    "start_time": "15:00",
                }),
                &ctx,
            )
            .await;
        assert!(result.contains("end time"));
        assert_eq!(
            s.pending_tools["add_calendar_event"].status,
            ToolStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_fast_retry_after_failure_is_refused() {
        let ctx = context_without_integrations();
        let mut s = session();
        let incomplete = json!({ "title": "Standup" });

        let first = AddCalendarEventTool.execute(&mut s, &incomplete, &ctx).await;
        assert!(first.contains("I need all the event details"));

        // Complete args this time, but the guard still refuses inside 10s
        // and never touches the calendar client.
        let complete = json!({
            "title": "Standup",
            "date": "2026-08-07",
            "start_time": "15:00",
            "end_time": "15:30",
        });
        let second = AddCalendarEventTool.execute(&mut s, &complete, &ctx).await;
        assert!(second.contains("still having trouble"));
    }

    #[tokio::test]
    async fn test_unconfigured_calendar_degrades() {
        let ctx = context_without_integrations();
        let mut s = session();
        let result = AddCalendarEventTool
            .execute(
                &mut s,
                &json!({
                    "title": "Standup",
                    "date": "2026-08-07",
                    "start_time": "15:00",
                    "end_time": "15:30",
                }),
                &ctx,
            )
            .await;
        assert!(result.contains("credentials are missing"));
    }
}
