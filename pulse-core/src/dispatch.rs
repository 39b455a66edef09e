//! Emergency dispatch client: talks to the dispatch backend
//!
//! Transport errors, non-2xx statuses and `success: false` bodies all come
//! back as `DispatchError`. Nothing is retried: a failed alert is reported,
//! not re-sent.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::api::{DispatchResponse, EmergencyCallRequest, FamilyAlertRequest};
use crate::config::DispatchConfig;
use crate::models::AssessmentRecord;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Backend rejected request: {reason}")]
    Rejected { reason: String },
}

/// Provider-side identifier of a placed call or sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub sid: Option<String>,
}

#[async_trait]
pub trait EmergencyDispatch: Send + Sync {
    async fn emergency_call(
        &self,
        record: &AssessmentRecord,
    ) -> Result<DispatchReceipt, DispatchError>;

    async fn family_alert(&self, record: &AssessmentRecord)
        -> Result<DispatchReceipt, DispatchError>;
}

#[derive(Debug, Clone)]
pub struct HttpDispatchClient {
    client: Client,
    base_url: String,
    emergency_number: Option<String>,
    family_number: Option<String>,
}

impl HttpDispatchClient {
    pub fn new(config: &DispatchConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            emergency_number: config.emergency_number.clone(),
            family_number: config.family_number.clone(),
        })
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        route: &str,
        body: &T,
    ) -> Result<DispatchResponse, DispatchError> {
        let url = format!("{}{}", self.base_url, route);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<DispatchResponse>(&error_body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(error_body);
            return Err(DispatchError::Status {
                code: status.as_u16(),
                message,
            });
        }

        let body: DispatchResponse = response.json().await?;
        if !body.success {
            return Err(DispatchError::Rejected {
                reason: body.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl EmergencyDispatch for HttpDispatchClient {
    async fn emergency_call(
        &self,
        record: &AssessmentRecord,
    ) -> Result<DispatchReceipt, DispatchError> {
        let request = EmergencyCallRequest {
            to_number: self.emergency_number.clone(),
            patient_data: record.clone(),
        };

        let response = self.post("/api/emergency-call", &request).await?;
        tracing::info!(call_sid = ?response.call_sid, "Emergency call placed");
        Ok(DispatchReceipt {
            sid: response.call_sid,
        })
    }

    async fn family_alert(
        &self,
        record: &AssessmentRecord,
    ) -> Result<DispatchReceipt, DispatchError> {
        let request = FamilyAlertRequest {
            to_number: self.family_number.clone(),
            patient_data: record.clone(),
            location: Some(record.location.clone()),
        };

        let response = self.post("/api/family-alert", &request).await?;
        tracing::info!(message_sid = ?response.message_sid, "Family alert sent");
        Ok(DispatchReceipt {
            sid: response.message_sid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssessmentUpdate, Pulse};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, numbers: bool) -> HttpDispatchClient {
        HttpDispatchClient::new(&DispatchConfig {
            backend_url: format!("{}/", server.uri()),
            emergency_number: numbers.then(|| "+15550001".to_string()),
            family_number: numbers.then(|| "+15550002".to_string()),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    fn record() -> AssessmentRecord {
        AssessmentRecord::create_initial().merge(&AssessmentUpdate {
            pulse: Some(Pulse::Absent),
            location: Some("51.500000, -0.120000".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_emergency_call_posts_patient_data() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/emergency-call"))
            .and(body_partial_json(serde_json::json!({
                "toNumber": "+15550001",
                "patientData": { "pulse": "absent", "location": "51.500000, -0.120000" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "callSid": "CA123", "message": "Emergency call initiated"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let receipt = client_for(&mock_server, true)
            .emergency_call(&record())
            .await
            .unwrap();
        assert_eq!(receipt.sid.as_deref(), Some("CA123"));
    }

    #[tokio::test]
    async fn test_family_alert_sends_location_field() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/family-alert"))
            .and(body_partial_json(serde_json::json!({
                "location": "51.500000, -0.120000"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "messageSid": "SM9"
            })))
            .mount(&mock_server)
            .await;

        let receipt = client_for(&mock_server, false)
            .family_alert(&record())
            .await
            .unwrap();
        assert_eq!(receipt.sid.as_deref(), Some("SM9"));

        let requests = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("toNumber").is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_status_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "success": false, "error": "Twilio not configured"
            })))
            .mount(&mock_server)
            .await;

        let result = client_for(&mock_server, true).emergency_call(&record()).await;
        match result {
            Err(DispatchError::Status { code, message }) => {
                assert_eq!(code, 500);
                assert_eq!(message, "Twilio not configured");
            }
            other => panic!("Expected Status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_false_is_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false, "error": "invalid number"
            })))
            .mount(&mock_server)
            .await;

        let result = client_for(&mock_server, true).family_alert(&record()).await;
        assert!(matches!(result, Err(DispatchError::Rejected { reason }) if reason == "invalid number"));
    }
}
