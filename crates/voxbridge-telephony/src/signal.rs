//! Call-signaling REST client.
//!
//! Drives a Twilio-style call API: fetch a call's legs, place an outbound
//! call, end a call, and redirect a call to a human.

use serde::Deserialize;
use tracing::{debug, info};

use voxbridge_core::config::TelephonyConfig;

const DEFAULT_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// The two legs of a call as the signaling plane sees them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallDetails {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

pub struct SignalingClient {
    api_base: String,
    account_sid: String,
    auth_token: String,
    app_number: String,
    client: reqwest::Client,
}

impl SignalingClient {
    /// Build from config. Returns `None` when credentials are missing; the
    /// caller treats signaling as a disabled integration.
    pub fn from_config(config: &TelephonyConfig) -> Option<Self> {
        let auth_token = config.resolve_auth_token()?;
        Some(Self {
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            account_sid: config.account_sid.clone(),
            auth_token,
            app_number: config.app_number.clone(),
            client: reqwest::Client::new(),
        })
    }

    /// The system's own number on the leg.
    pub fn app_number(&self) -> &str {
        &self.app_number
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_sid
        )
    }

    /// Fetch a call's details from the signaling plane.
    pub async fn fetch_call(&self, call_sid: &str) -> anyhow::Result<CallDetails> {
        let response = self
            .client
            .get(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("call fetch failed: {status}");
        }

        let body: serde_json::Value = response.json().await?;
        Ok(CallDetails {
            from: body.get("from").and_then(|v| v.as_str()).map(String::from),
            to: body.get("to").and_then(|v| v.as_str()).map(String::from),
            status: body
                .get("status")
                .and_then(|v| v.as_str())
                .map(String::from),
        })
    }

    /// Place an outbound call whose media is answered at `answer_url`.
    /// Returns the new call sid.
    pub async fn create_call(&self, to_number: &str, answer_url: &str) -> anyhow::Result<String> {
        info!(to = %to_number, "Placing outbound call");

        let response = self
            .client
            .post(format!(
                "{}/Accounts/{}/Calls.json",
                self.api_base, self.account_sid
            ))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to_number),
                ("From", self.app_number.as_str()),
                ("Url", answer_url),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("call creation failed {status}: {body}");
        }

        let body: serde_json::Value = response.json().await?;
        body.get("sid")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("call creation response missing sid"))
    }

    /// Mark a call completed.
    pub async fn end_call(&self, call_sid: &str) -> anyhow::Result<String> {
        debug!(call = %call_sid, "Ending call");

        let response = self
            .client
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("call end failed: {status}");
        }

        let body: serde_json::Value = response.json().await?;
        Ok(body
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("completed")
            .to_string())
    }

    /// Redirect the call to a forwarding endpoint for `transfer_number`.
    pub async fn transfer_call(
        &self,
        call_sid: &str,
        transfer_number: &str,
    ) -> anyhow::Result<()> {
        info!(call = %call_sid, to = %transfer_number, "Transferring call");

        let forward_url =
            format!("http://twimlets.com/forward?PhoneNumber={transfer_number}");
        let response = self
            .client
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Url", forward_url.as_str()), ("Method", "POST")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("call transfer failed: {status}");
        }
        Ok(())
    }

    /// Pick the leg that is not the system's own number.
    pub fn counterparty(&self, details: &CallDetails) -> Option<String> {
        counterparty_of(details, &self.app_number)
    }
}

/// Which of the two numbers on a leg belongs to the caller: the one that is
/// not `own_number`.
pub fn counterparty_of(details: &CallDetails, own_number: &str) -> Option<String> {
    match (&details.from, &details.to) {
        (Some(from), _) if from != own_number => Some(from.clone()),
        (_, Some(to)) if to != own_number => Some(to.clone()),
        _ => None,
    }
}
