//! Pulse dispatch backend HTTP API
//!
//! Axum server that turns an escalation from the device into an outbound
//! voice call to emergency services and an SMS to a family contact.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`, testable without a listener.
//!
//! Endpoints:
//! - `GET /`: liveness
//! - `POST /api/emergency-call`: spoken patient report to the emergency number
//! - `POST /api/family-alert`: SMS to the family number

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use pulse_core::{DispatchResponse, EmergencyCallRequest, FamilyAlertRequest, PulseConfig};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::report::{build_call_script, build_family_sms, build_patient_report};
use crate::telephony::{TelephonyError, TelephonyProvider};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub telephony: Arc<dyn TelephonyProvider>,
    pub config: PulseConfig,
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/api/emergency-call", post(emergency_call_handler))
        .route("/api/family-alert", post(family_alert_handler))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    telephony: Arc<dyn TelephonyProvider>,
    config: PulseConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let configured = telephony.is_configured();
    let state = Arc::new(HttpState { telephony, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(telephony_configured = configured, "Pulse dispatch backend listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub fn health_inner() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "Pulse dispatch backend running",
            "timestamp": Utc::now().to_rfc3339(),
        }),
    )
}

/// Request number if given, else the configured fallback.
fn destination(
    requested: Option<&str>,
    configured: Option<&str>,
    kind: &'static str,
) -> Result<String, TelephonyError> {
    let usable = |n: &&str| !n.trim().is_empty();
    requested
        .filter(usable)
        .or(configured.filter(usable))
        .map(|n| n.trim().to_string())
        .ok_or(TelephonyError::MissingNumber(kind))
}

fn to_http(result: Result<DispatchResponse, TelephonyError>) -> (StatusCode, serde_json::Value) {
    let (status, body) = match result {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, DispatchResponse::failure(e.to_string())),
    };
    (status, serde_json::to_value(body).unwrap_or_default())
}

pub async fn emergency_call_inner(
    state: &HttpState,
    req: EmergencyCallRequest,
) -> (StatusCode, serde_json::Value) {
    tracing::warn!(record = ?req.patient_data, "Emergency call triggered");

    let result = place_emergency_call(state, req).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Emergency call failed");
    }
    to_http(result)
}

pub async fn family_alert_inner(
    state: &HttpState,
    req: FamilyAlertRequest,
) -> (StatusCode, serde_json::Value) {
    tracing::warn!(location = ?req.location, "Family alert triggered");

    let result = send_family_alert(state, req).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Family alert failed");
    }
    to_http(result)
}

async fn place_emergency_call(
    state: &HttpState,
    req: EmergencyCallRequest,
) -> Result<DispatchResponse, TelephonyError> {
    let telephony = &state.config.telephony;
    let to = destination(
        req.to_number.as_deref(),
        telephony.emergency_number.as_deref(),
        "emergency",
    )?;
    let report = build_patient_report(&req.patient_data);
    let script = build_call_script(&report, &telephony.voice, &telephony.language);

    let call_sid = state.telephony.place_call(&to, &script).await?;
    tracing::info!(call_sid = %call_sid, "Emergency call initiated");
    Ok(DispatchResponse::call_placed(call_sid, report))
}

async fn send_family_alert(
    state: &HttpState,
    req: FamilyAlertRequest,
) -> Result<DispatchResponse, TelephonyError> {
    let to = destination(
        req.to_number.as_deref(),
        state.config.telephony.family_number.as_deref(),
        "family",
    )?;
    let body = build_family_sms(&req.patient_data, req.location.as_deref());

    let message_sid = state.telephony.send_sms(&to, &body).await?;
    tracing::info!(message_sid = %message_sid, "Family alert sent");
    Ok(DispatchResponse::alert_sent(message_sid))
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn health_handler() -> impl IntoResponse {
    let (status, body) = health_inner();
    (status, Json(body))
}

pub async fn emergency_call_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<EmergencyCallRequest>,
) -> impl IntoResponse {
    let (status, body) = emergency_call_inner(&state, req).await;
    (status, Json(body))
}

pub async fn family_alert_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<FamilyAlertRequest>,
) -> impl IntoResponse {
    let (status, body) = family_alert_inner(&state, req).await;
    (status, Json(body))
}
