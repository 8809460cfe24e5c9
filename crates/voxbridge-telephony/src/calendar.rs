//! Calendar event insertion via a bearer-token REST API.

use chrono::NaiveDate;
use serde_json::json;
use tracing::info;

use voxbridge_core::config::CalendarConfig;

/// A fully validated event ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub title: String,
    /// YYYY-MM-DD
    pub date: String,
    /// HH:MM, 24-hour
    pub start_time: String,
    /// HH:MM, 24-hour
    pub end_time: String,
    pub description: Option<String>,
}

impl CalendarEvent {
    /// Spoken confirmation, with the date rendered long-form.
    pub fn confirmation(&self) -> String {
        let friendly_date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map(|d| d.format("%A, %B %d, %Y").to_string())
            .unwrap_or_else(|_| self.date.clone());
        format!(
            "I've scheduled '{}' for {} from {} to {}. The event has been added to your calendar.",
            self.title, friendly_date, self.start_time, self.end_time
        )
    }
}

pub struct CalendarClient {
    api_base: String,
    token: String,
    calendar_id: String,
    time_zone: String,
    client: reqwest::Client,
}

impl CalendarClient {
    pub fn from_config(config: &CalendarConfig) -> Option<Self> {
        let token = config.resolve_token()?;
        Some(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            calendar_id: config
                .calendar_id
                .clone()
                .unwrap_or_else(|| "primary".to_string()),
            time_zone: config
                .time_zone
                .clone()
                .unwrap_or_else(|| "UTC".to_string()),
            client: reqwest::Client::new(),
        })
    }

    pub async fn insert_event(&self, event: &CalendarEvent) -> anyhow::Result<()> {
        info!(title = %event.title, date = %event.date, "Inserting calendar event");

        let response = self
            .client
            .post(format!(
                "{}/calendars/{}/events",
                self.api_base, self.calendar_id
            ))
            .header("authorization", format!("Bearer {}", self.token))
            .json(&json!({
                "summary": event.title,
                "description": event.description.clone().unwrap_or_default(),
                "start": {
                    "dateTime": format!("{}T{}:00", event.date, event.start_time),
                    "timeZone": self.time_zone,
                },
                "end": {
                    "dateTime": format!("{}T{}:00", event.date, event.end_time),
                    "timeZone": self.time_zone,
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("calendar insert failed {status}: {body}");
        }
        Ok(())
    }
}
