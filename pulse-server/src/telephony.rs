//! Telephony provider: outbound voice calls and SMS
//!
//! `TwilioClient` speaks the Twilio REST API (basic auth, form-encoded
//! `Calls.json` / `Messages.json`). `UnconfiguredTelephony` stands in when
//! credentials are absent and fails every request, so the HTTP layer still
//! answers with a structured error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pulse_core::config::TelephonyConfig;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telephony API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Twilio not configured")]
    NotConfigured,

    #[error("No {0} number configured")]
    MissingNumber(&'static str),
}

#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Place a voice call that plays `script`. Returns the call SID.
    async fn place_call(&self, to: &str, script: &str) -> Result<String, TelephonyError>;

    /// Send an SMS. Returns the message SID.
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, TelephonyError>;

    fn is_configured(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
}

impl TwilioCredentials {
    /// `TWILIO_ACCOUNT_SID` + `TWILIO_AUTH_TOKEN`; `None` if either is unset or empty.
    pub fn from_env() -> Option<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok()?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").ok()?;
        if account_sid.trim().is_empty() || auth_token.trim().is_empty() {
            return None;
        }
        Some(Self {
            account_sid,
            auth_token,
        })
    }
}

/// Twilio when credentials and a sender number are present, otherwise the
/// unconfigured provider.
pub fn create_telephony(
    credentials: Option<TwilioCredentials>,
    config: &TelephonyConfig,
) -> Result<Arc<dyn TelephonyProvider>, TelephonyError> {
    match (credentials, config.from_number.clone()) {
        (Some(credentials), Some(from_number)) => Ok(Arc::new(TwilioClient::new(
            credentials,
            from_number,
            &config.base_url,
        )?)),
        _ => {
            tracing::warn!("Twilio credentials or sender number missing, dispatch requests will fail");
            Ok(Arc::new(UnconfiguredTelephony))
        }
    }
}

// ============================================================================
// Twilio REST
// ============================================================================

#[derive(Debug, Deserialize)]
struct TwilioResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorResponse {
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TwilioClient {
    client: Client,
    credentials: TwilioCredentials,
    from_number: String,
    base_url: String,
}

impl TwilioClient {
    pub fn new(
        credentials: TwilioCredentials,
        from_number: String,
        base_url: &str,
    ) -> Result<Self, TelephonyError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            credentials,
            from_number,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn create(&self, resource: &str, form: &[(&str, &str)]) -> Result<String, TelephonyError> {
        let url = format!(
            "{}/Accounts/{}/{}.json",
            self.base_url, self.credentials.account_sid, resource
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.credentials.account_sid, Some(&self.credentials.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TwilioErrorResponse>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(body);
            return Err(TelephonyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let created: TwilioResource = response.json().await?;
        Ok(created.sid)
    }
}

#[async_trait]
impl TelephonyProvider for TwilioClient {
    async fn place_call(&self, to: &str, script: &str) -> Result<String, TelephonyError> {
        self.create(
            "Calls",
            &[("To", to), ("From", self.from_number.as_str()), ("Twiml", script)],
        )
        .await
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<String, TelephonyError> {
        self.create(
            "Messages",
            &[("To", to), ("From", self.from_number.as_str()), ("Body", body)],
        )
        .await
    }

    fn is_configured(&self) -> bool {
        true
    }
}

// ============================================================================
// Unconfigured
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTelephony;

#[async_trait]
impl TelephonyProvider for UnconfiguredTelephony {
    async fn place_call(&self, _to: &str, _script: &str) -> Result<String, TelephonyError> {
        Err(TelephonyError::NotConfigured)
    }

    async fn send_sms(&self, _to: &str, _body: &str) -> Result<String, TelephonyError> {
        Err(TelephonyError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}
