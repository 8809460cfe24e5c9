//! Outbound WhatsApp text messages through the signaling provider's
//! messaging API.

use tracing::info;

use voxbridge_core::config::TelephonyConfig;

/// WhatsApp bodies beyond this length are truncated by the provider; we cap
/// client-side and tell the user instead.
pub const MAX_BODY_CHARS: usize = 1600;

pub struct MessagingClient {
    api_base: String,
    account_sid: String,
    auth_token: String,
    whatsapp_number: String,
    client: reqwest::Client,
}

impl MessagingClient {
    pub fn from_config(config: &TelephonyConfig) -> Option<Self> {
        let auth_token = config.resolve_auth_token()?;
        let whatsapp_number = config.whatsapp_number.clone()?;
        Some(Self {
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.twilio.com/2010-04-01".to_string())
                .trim_end_matches('/')
                .to_string(),
            account_sid: config.account_sid.clone(),
            auth_token,
            whatsapp_number: normalize_whatsapp(&whatsapp_number),
            client: reqwest::Client::new(),
        })
    }

    /// Send a WhatsApp text. Returns the provider's message sid.
    pub async fn send_whatsapp(&self, to_number: &str, body: &str) -> anyhow::Result<String> {
        if body.len() > MAX_BODY_CHARS {
            anyhow::bail!("message body exceeds {MAX_BODY_CHARS} characters");
        }

        let to = normalize_whatsapp(to_number);
        info!(to = %to, chars = body.len(), "Sending WhatsApp message");

        let response = self
            .client
            .post(format!(
                "{}/Accounts/{}/Messages.json",
                self.api_base, self.account_sid
            ))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to.as_str()),
                ("From", self.whatsapp_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("message send failed {status}: {body}");
        }

        let value: serde_json::Value = response.json().await?;
        Ok(value
            .get("sid")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string())
    }
}

/// Prefix a number with the `whatsapp:` scheme if not already present.
pub fn normalize_whatsapp(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whatsapp() {
        assert_eq!(normalize_whatsapp("+15550001111"), "whatsapp:+15550001111");
        assert_eq!(
            normalize_whatsapp("whatsapp:+15550001111"),
            "whatsapp:+15550001111"
        );
    }

    #[test]
    fn test_from_config_requires_whatsapp_number() {
        let config = voxbridge_core::config::TelephonyConfig {
            account_sid: "AC1".into(),
            auth_token: Some("tok".into()),
            auth_token_env: None,
            app_number: "+1555APP".into(),
            transfer_number: None,
            whatsapp_number: None,
            api_base: None,
        };
        assert!(MessagingClient::from_config(&config).is_none());
    }
}
