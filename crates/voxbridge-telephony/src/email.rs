//! Outbound email through a JSON send API.

use serde_json::json;
use tracing::info;

use voxbridge_core::config::EmailConfig;

pub struct EmailClient {
    api_base: String,
    api_key: String,
    from_address: String,
    client: reqwest::Client,
}

impl EmailClient {
    pub fn from_config(config: &EmailConfig) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        Some(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            from_address: config.from_address.clone(),
            client: reqwest::Client::new(),
        })
    }

    pub async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        info!(to = %to, subject = %subject, "Sending email");

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.api_base))
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&json!({
                "personalizations": [{ "to": [{ "email": to }] }],
                "from": { "email": self.from_address },
                "subject": subject,
                "content": [{ "type": "text/plain", "value": body }],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("email send failed {status}: {body}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_key() {
        let config = EmailConfig {
            api_base: "https://mail.test".into(),
            api_key: None,
            api_key_env: Some("VOXBRIDGE_MISSING_MAIL_KEY".into()),
            from_address: "bot@example.com".into(),
        };
        assert!(EmailClient::from_config(&config).is_none());
    }

    #[test]
    fn test_from_config_trims_base() {
        let config = EmailConfig {
            api_base: "https://mail.test/".into(),
            api_key: Some("key".into()),
            api_key_env: None,
            from_address: "bot@example.com".into(),
        };
        let client = EmailClient::from_config(&config).unwrap();
        assert_eq!(client.api_base, "https://mail.test");
    }
}
