//! Emergency escalation: the one-shot call + family alert sequence
//!
//! Steps, each degrading instead of aborting:
//! 1. Resolve location (falls back to "Location unavailable")
//! 2. Describe the patient from the last frame, when a live model is
//!    configured (falls back to "Patient description unavailable")
//! 3. Merge location, description and a fresh timestamp into the record
//! 4. Place the emergency call and send the family alert concurrently;
//!    neither outcome affects the other
//! 5. Announce completion to the bystander
//!
//! Single invocation per incident is guaranteed by the engine's latch; this
//! type does no locking of its own.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;

use crate::capabilities::{LocationProvider, SpeechOutput};
use crate::dispatch::{DispatchError, DispatchReceipt, EmergencyDispatch};
use crate::models::{AssessmentRecord, AssessmentUpdate};
use crate::reasoning::ReasoningGateway;

pub const LOCATION_UNAVAILABLE: &str = "Location unavailable";
pub const DESCRIPTION_UNAVAILABLE: &str = "Patient description unavailable";
pub const COMPLETION_ANNOUNCEMENT: &str = "Emergency services have been contacted. Continue CPR.";

/// What happened during one escalation.
#[derive(Debug)]
pub struct EscalationReport {
    pub record: AssessmentRecord,
    pub call: Result<DispatchReceipt, DispatchError>,
    pub alert: Result<DispatchReceipt, DispatchError>,
}

impl EscalationReport {
    pub fn fully_delivered(&self) -> bool {
        self.call.is_ok() && self.alert.is_ok()
    }
}

pub struct EmergencyEscalation {
    gateway: Arc<dyn ReasoningGateway>,
    location: Arc<dyn LocationProvider>,
    dispatch: Arc<dyn EmergencyDispatch>,
    speech: Arc<dyn SpeechOutput>,
}

impl EmergencyEscalation {
    pub fn new(
        gateway: Arc<dyn ReasoningGateway>,
        location: Arc<dyn LocationProvider>,
        dispatch: Arc<dyn EmergencyDispatch>,
        speech: Arc<dyn SpeechOutput>,
    ) -> Self {
        Self {
            gateway,
            location,
            dispatch,
            speech,
        }
    }

    pub async fn run(&self, record: AssessmentRecord, last_image: Option<Bytes>) -> EscalationReport {
        tracing::warn!("Escalation started: contacting emergency services");

        let (location, description) = tokio::join!(
            self.resolve_location(),
            self.describe_patient(last_image.as_ref())
        );

        let finalized = record.merge(&AssessmentUpdate {
            location: Some(location),
            patient_description: Some(description),
            timestamp: Some(Utc::now()),
            ..Default::default()
        });

        let (call, alert) = tokio::join!(
            self.dispatch.emergency_call(&finalized),
            self.dispatch.family_alert(&finalized)
        );

        match &call {
            Ok(receipt) => tracing::info!(sid = ?receipt.sid, "Emergency call dispatched"),
            Err(e) => tracing::error!(error = %e, "Emergency call dispatch failed"),
        }
        match &alert {
            Ok(receipt) => tracing::info!(sid = ?receipt.sid, "Family alert dispatched"),
            Err(e) => tracing::error!(error = %e, "Family alert dispatch failed"),
        }

        self.speech.speak(COMPLETION_ANNOUNCEMENT);

        EscalationReport {
            record: finalized,
            call,
            alert,
        }
    }

    async fn resolve_location(&self) -> String {
        match self.location.current_location().await {
            Ok(coords) => coords.describe(),
            Err(e) => {
                tracing::warn!(error = %e, "Location lookup failed");
                LOCATION_UNAVAILABLE.to_string()
            }
        }
    }

    async fn describe_patient(&self, image: Option<&Bytes>) -> String {
        let image = match image {
            Some(image) if self.gateway.is_configured() => image,
            _ => return DESCRIPTION_UNAVAILABLE.to_string(),
        };

        match self.gateway.describe_patient(image).await {
            Ok(description) if !description.is_empty() => description,
            Ok(_) => DESCRIPTION_UNAVAILABLE.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, backend = self.gateway.name(), "Patient description failed");
                DESCRIPTION_UNAVAILABLE.to_string()
            }
        }
    }
}
