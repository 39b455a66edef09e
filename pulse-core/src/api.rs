//! JSON bodies exchanged with the dispatch backend.

use serde::{Deserialize, Serialize};

use crate::models::AssessmentRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyCallRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_number: Option<String>,
    #[serde(default)]
    pub patient_data: AssessmentRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyAlertRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_number: Option<String>,
    #[serde(default)]
    pub patient_data: AssessmentRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResponse {
    pub fn call_placed(call_sid: impl Into<String>, report: impl Into<String>) -> Self {
        Self {
            success: true,
            call_sid: Some(call_sid.into()),
            message: Some("Emergency call initiated".to_string()),
            report: Some(report.into()),
            ..Default::default()
        }
    }

    pub fn alert_sent(message_sid: impl Into<String>) -> Self {
        Self {
            success: true,
            message_sid: Some(message_sid.into()),
            message: Some("Family alert sent".to_string()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
