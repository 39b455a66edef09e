//! Conversation engine: turn-taking state machine for one incident
//!
//! One `process_input` call is one turn:
//! 1. Reject blank input, or any input while a turn is in flight
//! 2. Append the bystander message
//! 3. Capture a frame on the first turn (until one succeeds) and every
//!    `frame_interval`-th turn after; capture failures degrade to text-only
//! 4. Merge bystander-text signals into the record
//! 5. Ask the gateway for the next instruction (apology on failure)
//! 6. Append and surface the instruction with its marker
//! 7. Merge model-text signals into the record
//! 8. If the merged record or the instruction calls for it, latch the
//!    emergency and spawn the escalation sequence exactly once
//! 9. Release the in-flight guard
//!
//! The engine owns the record and history; everything else reaches it only
//! through the capability traits it was constructed with.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::capabilities::{FrameSource, SpeechOutput, TranscriptSink};
use crate::config::EngineConfig;
use crate::escalation::{EmergencyEscalation, EscalationReport};
use crate::models::{AssessmentRecord, AssessmentUpdate, Message};
use crate::reasoning::{GatewayReply, ReasoningGateway};
use crate::signals::{parse_model_text, parse_user_text, should_escalate};

pub const APOLOGY_INSTRUCTION: &str = "I'm having trouble connecting. Please try again.";
pub const FALLBACK_GREETING: &str = "Point your camera at the patient. Are they responsive?";

// ============================================================================
// Public types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Blank,
    TurnInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    /// 1-based count of bystander turns in this incident.
    pub turn: usize,
    pub instruction: String,
    pub marker: Option<String>,
    pub image_attached: bool,
    pub gateway_failed: bool,
    /// True only on the turn that fired the escalation.
    pub escalated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed(TurnReport),
    Rejected(RejectReason),
}

#[derive(Debug, Clone)]
pub struct IncidentSnapshot {
    pub incident_id: Uuid,
    pub record: AssessmentRecord,
    pub history: Vec<Message>,
    pub current_instruction: Option<String>,
    pub current_marker: Option<String>,
    pub emergency_active: bool,
}

/// Capabilities injected into one engine.
pub struct EngineDeps {
    pub gateway: Arc<dyn ReasoningGateway>,
    pub frames: Arc<dyn FrameSource>,
    pub speech: Arc<dyn SpeechOutput>,
    pub transcript: Arc<dyn TranscriptSink>,
    pub escalation: Arc<EmergencyEscalation>,
}

/// Whether this turn attaches a fresh frame.
pub fn should_capture_frame(turn: usize, has_image: bool, frame_interval: usize) -> bool {
    !has_image || (frame_interval > 0 && turn % frame_interval == 0)
}

// ============================================================================
// Engine
// ============================================================================

struct IncidentState {
    record: AssessmentRecord,
    history: Vec<Message>,
    turns: usize,
    has_image: bool,
    last_image: Option<Bytes>,
    current_instruction: Option<String>,
    current_marker: Option<String>,
}

/// Clears the in-flight flag however the turn ends.
struct TurnGuard<'a>(&'a AtomicBool);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ConversationEngine {
    incident_id: Uuid,
    config: EngineConfig,
    gateway: Arc<dyn ReasoningGateway>,
    frames: Arc<dyn FrameSource>,
    speech: Arc<dyn SpeechOutput>,
    transcript: Arc<dyn TranscriptSink>,
    escalation: Arc<EmergencyEscalation>,
    in_flight: AtomicBool,
    emergency_active: AtomicBool,
    state: Arc<Mutex<IncidentState>>,
    escalation_task: Mutex<Option<JoinHandle<EscalationReport>>>,
}

impl ConversationEngine {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        Self::with_record(deps, config, AssessmentRecord::create_initial())
    }

    /// Start an incident from an existing record (e.g. handed over from a
    /// previous screen).
    pub fn with_record(deps: EngineDeps, config: EngineConfig, record: AssessmentRecord) -> Self {
        let incident_id = Uuid::new_v4();
        tracing::info!(incident = %incident_id, gateway = deps.gateway.name(), "Incident started");

        Self {
            incident_id,
            config,
            gateway: deps.gateway,
            frames: deps.frames,
            speech: deps.speech,
            transcript: deps.transcript,
            escalation: deps.escalation,
            in_flight: AtomicBool::new(false),
            emergency_active: AtomicBool::new(false),
            state: Arc::new(Mutex::new(IncidentState {
                record,
                history: Vec::new(),
                turns: 0,
                has_image: false,
                last_image: None,
                current_instruction: None,
                current_marker: None,
            })),
            escalation_task: Mutex::new(None),
        }
    }

    pub fn incident_id(&self) -> Uuid {
        self.incident_id
    }

    pub fn phase(&self) -> EnginePhase {
        if self.in_flight.load(Ordering::Acquire) {
            EnginePhase::Processing
        } else {
            EnginePhase::Idle
        }
    }

    pub fn is_emergency_active(&self) -> bool {
        self.emergency_active.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> IncidentSnapshot {
        let s = self.state.lock().await;
        IncidentSnapshot {
            incident_id: self.incident_id,
            record: s.record.clone(),
            history: s.history.clone(),
            current_instruction: s.current_instruction.clone(),
            current_marker: s.current_marker.clone(),
            emergency_active: self.is_emergency_active(),
        }
    }

    fn try_acquire(&self) -> Option<TurnGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TurnGuard(&self.in_flight))
    }

    /// Opening instruction; not counted as a turn. Returns `None` if a turn
    /// is already in flight.
    pub async fn begin(&self) -> Option<String> {
        let _guard = self.try_acquire()?;

        let reply = match self.gateway.greeting().await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(incident = %self.incident_id, error = %e, "Greeting failed, using fallback");
                GatewayReply {
                    text: FALLBACK_GREETING.to_string(),
                    marker: None,
                }
            }
        };

        self.surface(&reply).await;
        Some(reply.text)
    }

    /// Run one bystander turn. Never fails: every error degrades in place.
    pub async fn process_input(&self, user_text: &str) -> TurnOutcome {
        if user_text.trim().is_empty() {
            return TurnOutcome::Rejected(RejectReason::Blank);
        }

        let Some(_guard) = self.try_acquire() else {
            tracing::debug!(incident = %self.incident_id, "Turn rejected, previous turn still in flight");
            return TurnOutcome::Rejected(RejectReason::TurnInFlight);
        };

        let user_message = Message::user(user_text);
        let (turn, capture) = {
            let mut s = self.state.lock().await;
            s.history.push(user_message.clone());
            s.turns += 1;
            let capture = should_capture_frame(s.turns, s.has_image, self.config.frame_interval);
            (s.turns, capture)
        };
        self.transcript.append(&user_message);
        tracing::info!(incident = %self.incident_id, turn, capture, "Turn started");

        let image = if capture { self.capture_frame().await } else { None };

        let history = {
            let mut s = self.state.lock().await;
            let update = parse_user_text(user_text, &s.record);
            if !update.is_empty() {
                tracing::info!(incident = %self.incident_id, turn, ?update, "Assessment update from bystander");
                s.record = s.record.merge(&AssessmentUpdate {
                    timestamp: Some(Utc::now()),
                    ..update
                });
            }
            if let Some(frame) = &image {
                s.has_image = true;
                s.last_image = Some(frame.clone());
            }
            s.history.clone()
        };

        let (reply, gateway_failed) = match self.gateway.respond(image.as_ref(), &history).await {
            Ok(reply) => (reply, false),
            Err(e) => {
                tracing::warn!(incident = %self.incident_id, turn, error = %e, "Gateway failed, substituting apology");
                (
                    GatewayReply {
                        text: APOLOGY_INSTRUCTION.to_string(),
                        marker: None,
                    },
                    true,
                )
            }
        };

        self.surface(&reply).await;

        let trigger = {
            let mut s = self.state.lock().await;
            let update = parse_model_text(&reply.text);
            if !update.is_empty() {
                tracing::info!(incident = %self.incident_id, turn, ?update, "Assessment update from model");
                s.record = s.record.merge(&AssessmentUpdate {
                    timestamp: Some(Utc::now()),
                    ..update
                });
            }
            should_escalate(&reply.text, &s.record)
                .then(|| (s.record.clone(), s.last_image.clone()))
        };

        let escalated = match trigger {
            Some((record, image)) => self.fire_escalation(record, image).await,
            None => false,
        };

        TurnOutcome::Completed(TurnReport {
            turn,
            instruction: reply.text,
            marker: reply.marker,
            image_attached: image.is_some(),
            gateway_failed,
            escalated,
        })
    }

    /// Await the background escalation, if one was fired and not yet awaited.
    pub async fn wait_for_escalation(&self) -> Option<EscalationReport> {
        let handle = self.escalation_task.lock().await.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(incident = %self.incident_id, error = %e, "Escalation task failed");
                None
            }
        }
    }

    /// Append an assistant instruction to history and push it to the
    /// transcript and speech output.
    async fn surface(&self, reply: &GatewayReply) {
        let message = Message::assistant(reply.text.clone());
        {
            let mut s = self.state.lock().await;
            s.history.push(message.clone());
            s.current_instruction = Some(reply.text.clone());
            s.current_marker = reply.marker.clone();
        }
        self.transcript.append(&message);
        self.transcript.instruction(&reply.text, reply.marker.as_deref());
        self.speech.speak(&reply.text);
    }

    async fn capture_frame(&self) -> Option<Bytes> {
        let timeout_ms = self.config.frame_capture_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.frames.capture_frame())
            .await
        {
            Ok(Ok(frame)) if !frame.is_empty() => {
                tracing::debug!(incident = %self.incident_id, bytes = frame.len(), "Frame captured");
                Some(frame)
            }
            Ok(Ok(_)) => {
                tracing::warn!(incident = %self.incident_id, "Frame capture returned no data, continuing text-only");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(incident = %self.incident_id, error = %e, "Frame capture failed, continuing text-only");
                None
            }
            Err(_) => {
                tracing::warn!(incident = %self.incident_id, timeout_ms, "Frame capture timed out, continuing text-only");
                None
            }
        }
    }

    /// Latch the emergency and spawn the escalation. Returns false if the
    /// latch was already set.
    async fn fire_escalation(&self, record: AssessmentRecord, image: Option<Bytes>) -> bool {
        if self
            .emergency_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        tracing::warn!(incident = %self.incident_id, "Cardiac arrest suspected, escalating");

        let escalation = Arc::clone(&self.escalation);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let report = escalation.run(record, image).await;
            let mut s = state.lock().await;
            s.record = s.record.merge(&AssessmentUpdate {
                location: Some(report.record.location.clone()),
                patient_description: Some(report.record.patient_description.clone()),
                timestamp: Some(report.record.timestamp),
                ..Default::default()
            });
            report
        });

        *self.escalation_task.lock().await = Some(handle);
        true
    }
}
