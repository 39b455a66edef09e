//! Reasoning gateway: the remote multimodal model behind one narrow contract
//!
//! Provides a `ReasoningGateway` trait with implementations for:
//! - **Gemini**: `generateContent` over HTTPS, optional inline JPEG frame
//! - **Canned**: zero-configuration mode with a deterministic script keyed by
//!   turn count, used when no API key is present
//!
//! Both paths run raw model text through `signals::extract_marker`, so callers
//! only ever see clean instruction text plus an optional marker name.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::GatewayConfig;
use crate::models::{Message, Role};
use crate::signals::extract_marker;

const PLACEHOLDER_API_KEY: &str = "your_gemini_api_key_here";

const SYSTEM_PROMPT: &str = "You are an emergency medical assistant guiding a bystander to help an unconscious person.

CRITICAL RULES:
1. Ask ONE question at a time and wait for the response
2. Keep responses under 25 words - be concise and clear
3. Be calm but urgent - lives may depend on your guidance
4. Follow the ABCDE assessment: Airway, Breathing, Circulation, Disability, Exposure

ASSESSMENT FLOW:
1. First check if they are responsive (shake shoulders, call out)
2. Check airway (look in mouth for obstructions)
3. Check breathing (look, listen, feel for 10 seconds)
4. Check pulse (at neck/carotid for 10 seconds)
5. If no pulse, begin CPR immediately

MARKER INSTRUCTIONS:
When you direct the user's attention to a place on the body, include exactly one marker tag:
- [MARKER:neck] - for pulse check at carotid artery
- [MARKER:chest] - for CPR compressions
- [MARKER:chin] - for chin lift to open airway

Always be encouraging and supportive. The person may be scared.";

const GREETING_PROMPT: &str = "This is the start of a new emergency. The user just opened the app and is pointing their camera at someone who may need help. Give a brief initial instruction to begin the assessment. Keep it under 20 words.";

const DESCRIBE_PROMPT: &str = "Look at this image and provide a VERY BRIEF description of the person for emergency services. Include:
- Apparent gender
- Approximate age range
- Skin tone
- Any notable features visible

Keep it under 20 words. Example: \"Adult male, appears 30-40 years old, light skin tone, wearing blue shirt\"

Just describe what you see, nothing else.";

const CANNED_GREETING: &str =
    "Point your camera at the patient. I'll guide you through the assessment.";

const CANNED_SCRIPT: &[&str] = &[
    "I'm here to help. Is the person responsive? Shake their shoulders and call out.",
    "Okay, check if they are breathing. Watch their chest for 10 seconds. [MARKER:chest]",
    "Now feel for a pulse at their neck. Use two fingers. [MARKER:neck]",
    "If there's no pulse, begin CPR. Push hard and fast on the chest. [MARKER:chest]",
    "Keep going with CPR. 30 compressions, then 2 breaths. You're doing great. [MARKER:chest]",
];

// ============================================================================
// ReasoningGateway trait
// ============================================================================

/// Clean instruction text plus the first marker tag the model emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    pub text: String,
    pub marker: Option<String>,
}

impl GatewayReply {
    fn from_raw(raw: &str) -> Result<Self, GatewayError> {
        let extracted = extract_marker(raw);
        if extracted.clean_text.is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        Ok(Self {
            text: extracted.clean_text,
            marker: extracted.marker,
        })
    }
}

/// Abstraction over the remote completion provider.
#[async_trait]
pub trait ReasoningGateway: Send + Sync {
    /// Next instruction for the bystander given the full conversation.
    async fn respond(
        &self,
        image: Option<&Bytes>,
        history: &[Message],
    ) -> Result<GatewayReply, GatewayError>;

    /// Opening instruction for a fresh incident (no history).
    async fn greeting(&self) -> Result<GatewayReply, GatewayError>;

    /// Short patient description for the emergency report (no history).
    async fn describe_patient(&self, image: &Bytes) -> Result<String, GatewayError>;

    /// False for the zero-configuration backend.
    fn is_configured(&self) -> bool;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Model returned no usable text")]
    EmptyResponse,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Reasoning backend is not configured")]
    NotConfigured,

    #[error("Gateway unavailable after {attempts} attempts")]
    Unavailable { attempts: usize },
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub api_key: String,
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl GatewaySettings {
    /// Falls back to `GEMINI_API_KEY` when no key is passed.
    pub fn new(api_key: Option<String>, config: &GatewayConfig) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: config.model.clone(),
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            timeout_seconds: config.timeout_seconds,
        }
    }

    pub fn has_credential(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && key != PLACEHOLDER_API_KEY
    }
}

/// Gemini when a credential is present, otherwise the canned script.
pub fn create_gateway(settings: GatewaySettings) -> Result<Box<dyn ReasoningGateway>, GatewayError> {
    if !settings.has_credential() {
        tracing::warn!("No Gemini API key configured, using canned responses");
        return Ok(Box::new(CannedReasoning));
    }
    Ok(Box::new(GeminiReasoningClient::new(settings)?))
}

/// Prompt text for one conversational turn.
pub fn build_prompt(history: &[Message], has_image: bool) -> String {
    let history_text = if history.is_empty() {
        "No conversation yet - this is the start.".to_string()
    } else {
        history
            .iter()
            .map(Message::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    };

    let image_note = if has_image {
        "I can see the patient in the image."
    } else {
        ""
    };

    format!(
        "{SYSTEM_PROMPT}\n\nCurrent conversation:\n{history_text}\n\n{image_note}\n\nProvide your next instruction to help the user. Remember to include a [MARKER:location] tag if you need to show them where to look or act."
    )
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiReasoningClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiReasoningClient {
    client: Client,
    settings: GatewaySettings,
    base_url: String,
}

impl GeminiReasoningClient {
    pub fn new(settings: GatewaySettings) -> Result<Self, GatewayError> {
        Self::with_base_url(
            settings,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    /// Create a client with a custom base URL (for testing / proxies)
    pub fn with_base_url(settings: GatewaySettings, base_url: String) -> Result<Self, GatewayError> {
        if !settings.has_credential() {
            return Err(GatewayError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            settings,
            base_url,
        })
    }

    fn request(&self, prompt: String, image: Option<&Bytes>) -> GenerateRequest {
        let mut parts = vec![GeminiPart::Text { text: prompt }];
        if let Some(image) = image {
            parts.push(GeminiPart::Inline {
                inline_data: InlineData {
                    mime_type: "image/jpeg",
                    data: BASE64.encode(image),
                },
            });
        }

        GenerateRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.settings.max_output_tokens,
                temperature: self.settings.temperature,
            },
        }
    }

    /// One completion with retry; returns the raw concatenated text.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, GatewayError> {
        let attempts = self.settings.max_retries + 1;
        let retry_strategy = ExponentialBackoff::from_millis(self.settings.retry_delay_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.settings.max_retries);

        match Retry::spawn(retry_strategy, || self.generate_once(request)).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(attempts, error = %e, "All reasoning attempts failed");
                Err(GatewayError::Unavailable { attempts })
            }
        }
    }

    async fn generate_once(&self, request: &GenerateRequest) -> Result<String, GatewayError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.settings.model, self.settings.api_key
        );

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Gemini API error");

            return Err(GatewayError::Api { code, message });
        }

        let body: GenerateResponse = response.json().await?;
        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GatewayError::EmptyResponse);
        }

        Ok(text)
    }
}

#[async_trait]
impl ReasoningGateway for GeminiReasoningClient {
    async fn respond(
        &self,
        image: Option<&Bytes>,
        history: &[Message],
    ) -> Result<GatewayReply, GatewayError> {
        let request = self.request(build_prompt(history, image.is_some()), image);
        let raw = self.generate(&request).await?;
        tracing::debug!(raw = %raw, with_image = image.is_some(), "Gemini response");
        GatewayReply::from_raw(&raw)
    }

    async fn greeting(&self) -> Result<GatewayReply, GatewayError> {
        let request = self.request(format!("{SYSTEM_PROMPT}\n\n{GREETING_PROMPT}"), None);
        let raw = self.generate(&request).await?;
        GatewayReply::from_raw(&raw)
    }

    async fn describe_patient(&self, image: &Bytes) -> Result<String, GatewayError> {
        let request = self.request(DESCRIBE_PROMPT.to_string(), Some(image));
        let raw = self.generate(&request).await?;
        Ok(raw.trim().to_string())
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// CannedReasoning
// ============================================================================

/// Zero-configuration backend: scripted replies indexed by the number of
/// bystander messages so far, clamped to the last entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct CannedReasoning;

#[async_trait]
impl ReasoningGateway for CannedReasoning {
    async fn respond(
        &self,
        _image: Option<&Bytes>,
        history: &[Message],
    ) -> Result<GatewayReply, GatewayError> {
        let turns = history.iter().filter(|m| m.role == Role::User).count();
        let index = turns.saturating_sub(1).min(CANNED_SCRIPT.len() - 1);
        GatewayReply::from_raw(CANNED_SCRIPT[index])
    }

    async fn greeting(&self) -> Result<GatewayReply, GatewayError> {
        GatewayReply::from_raw(CANNED_GREETING)
    }

    async fn describe_patient(&self, _image: &Bytes) -> Result<String, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "canned"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATE_PATH: &str = "/models/gemini-2.0-flash-exp:generateContent";

    fn test_settings(api_key: &str) -> GatewaySettings {
        GatewaySettings {
            api_key: api_key.to_string(),
            model: "gemini-2.0-flash-exp".to_string(),
            max_output_tokens: 100,
            temperature: 0.7,
            max_retries: 2,
            retry_delay_ms: 10,
            timeout_seconds: 5,
        }
    }

    fn mock_reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
        })
    }

    fn client_for(server: &MockServer) -> GeminiReasoningClient {
        GeminiReasoningClient::with_base_url(test_settings("test-api-key"), server.uri())
            .expect("Failed to create client")
    }

    #[tokio::test]
    async fn test_respond_strips_marker_and_returns_text() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(query_param("key", "test-api-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_reply(
                "Feel for a pulse at the neck for 10 seconds. [MARKER:neck]",
            )))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let history = vec![Message::user("He's not moving")];
        let reply = client.respond(None, &history).await.unwrap();

        assert_eq!(reply.text, "Feel for a pulse at the neck for 10 seconds.");
        assert_eq!(reply.marker.as_deref(), Some("neck"));
    }

    #[tokio::test]
    async fn test_respond_sends_prompt_history_and_image() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_reply("Stay with them.")))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let history = vec![
            Message::assistant("Is the person responsive?"),
            Message::user("No"),
        ];
        let image = Bytes::from_static(b"\xff\xd8jpeg");
        client.respond(Some(&image), &history).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();

        let parts = &body["contents"][0]["parts"];
        let prompt = parts[0]["text"].as_str().unwrap();
        assert!(prompt.contains("ABCDE"));
        assert!(prompt.contains("Assistant: Is the person responsive?\nUser: No"));
        assert!(prompt.contains("I can see the patient in the image."));
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], BASE64.encode(&image));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
    }

    #[tokio::test]
    async fn test_text_only_request_has_single_part() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_reply("Okay.")))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        client.respond(None, &[Message::user("hi")]).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_respond_unavailable_after_retries_on_500() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "Internal server error" }
            })))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let result = client.respond(None, &[Message::user("help")]).await;

        match result {
            Err(GatewayError::Unavailable { attempts }) => assert_eq!(attempts, 3),
            other => panic!("Expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_respond_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_reply("Call out to them.")))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let reply = client.respond(None, &[Message::user("help")]).await.unwrap();
        assert_eq!(reply.text, "Call out to them.");
    }

    #[tokio::test]
    async fn test_marker_only_reply_is_unusable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_reply("[MARKER:chest]")))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let result = client.respond(None, &[Message::user("help")]).await;
        assert!(matches!(result, Err(GatewayError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_no_candidates_is_unavailable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let result = client.respond(None, &[Message::user("help")]).await;
        assert!(matches!(result, Err(GatewayError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_describe_patient_trims_text() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_reply(
                "  Adult male, appears 40-50 years old, wearing a grey jacket\n",
            )))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let description = client
            .describe_patient(&Bytes::from_static(b"jpeg"))
            .await
            .unwrap();
        assert_eq!(description, "Adult male, appears 40-50 years old, wearing a grey jacket");

        let requests = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.starts_with("Look at this image"));
        assert!(!prompt.contains("Current conversation"));
    }

    #[test]
    fn test_missing_or_placeholder_key_rejected() {
        assert!(matches!(
            GeminiReasoningClient::new(test_settings("")),
            Err(GatewayError::MissingApiKey)
        ));
        assert!(matches!(
            GeminiReasoningClient::new(test_settings(PLACEHOLDER_API_KEY)),
            Err(GatewayError::MissingApiKey)
        ));
    }

    #[test]
    fn test_create_gateway_falls_back_to_canned() {
        let gateway = create_gateway(test_settings("")).unwrap();
        assert_eq!(gateway.name(), "canned");
        assert!(!gateway.is_configured());

        let gateway = create_gateway(test_settings("real-key")).unwrap();
        assert_eq!(gateway.name(), "gemini");
        assert!(gateway.is_configured());
    }

    #[test]
    fn test_build_prompt_empty_history() {
        let prompt = build_prompt(&[], false);
        assert!(prompt.contains("No conversation yet - this is the start."));
        assert!(!prompt.contains("I can see the patient"));
    }

    // --- canned backend ---

    #[tokio::test]
    async fn test_canned_first_turn_is_first_script_entry() {
        let reply = CannedReasoning
            .respond(None, &[Message::user("He's not moving")])
            .await
            .unwrap();
        assert_eq!(
            reply.text,
            "I'm here to help. Is the person responsive? Shake their shoulders and call out."
        );
        assert_eq!(reply.marker, None);
    }

    #[tokio::test]
    async fn test_canned_counts_only_user_turns_and_clamps() {
        let mut history = vec![Message::assistant("Point your camera at the patient.")];
        history.push(Message::user("a"));
        history.push(Message::assistant("x"));
        history.push(Message::user("b"));

        let reply = CannedReasoning.respond(None, &history).await.unwrap();
        assert_eq!(reply.marker.as_deref(), Some("chest"));
        assert!(reply.text.starts_with("Okay, check if they are breathing."));
        assert!(!reply.text.contains("[MARKER"));

        let long: Vec<Message> = (0..12).map(|i| Message::user(i.to_string())).collect();
        let reply = CannedReasoning.respond(None, &long).await.unwrap();
        assert!(reply.text.starts_with("Keep going with CPR."));
    }

    #[tokio::test]
    async fn test_canned_cannot_describe_patient() {
        let result = CannedReasoning
            .describe_patient(&Bytes::from_static(b"jpeg"))
            .await;
        assert!(matches!(result, Err(GatewayError::NotConfigured)));
    }
}
