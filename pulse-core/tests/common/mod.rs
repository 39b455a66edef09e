//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use pulse_core::config::EngineConfig;
use pulse_core::{
    AssessmentRecord, CannedReasoning, ConversationEngine, Coordinates, DispatchError,
    DispatchReceipt, EmergencyDispatch, EmergencyEscalation, EngineDeps, FrameSource,
    GatewayError, GatewayReply, LocationProvider, Message, PulseError, ReasoningGateway,
    SpeechOutput, TranscriptSink,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Frames
// ============================================================================

pub enum FrameBehavior {
    Jpeg,
    Fail,
    Hang,
}

pub struct FakeFrames {
    behavior: FrameBehavior,
    pub calls: AtomicUsize,
}

impl FakeFrames {
    pub fn new(behavior: FrameBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FrameSource for FakeFrames {
    async fn capture_frame(&self) -> Result<Bytes, PulseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            FrameBehavior::Jpeg => Ok(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00])),
            FrameBehavior::Fail => Err(PulseError::PermissionDenied("camera".to_string())),
            FrameBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Bytes::from_static(&[0xFF, 0xD8]))
            }
        }
    }
}

// ============================================================================
// Speech + transcript
// ============================================================================

#[derive(Default)]
pub struct RecordingSpeech {
    pub spoken: Mutex<Vec<String>>,
}

impl RecordingSpeech {
    pub fn lines(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechOutput for RecordingSpeech {
    fn speak(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
    }
}

#[derive(Default)]
pub struct RecordingTranscript {
    pub messages: Mutex<Vec<Message>>,
    pub instructions: Mutex<Vec<(String, Option<String>)>>,
}

impl TranscriptSink for RecordingTranscript {
    fn append(&self, message: &Message) {
        self.messages.lock().unwrap().push(message.clone());
    }

    fn instruction(&self, text: &str, marker: Option<&str>) {
        self.instructions
            .lock()
            .unwrap()
            .push((text.to_string(), marker.map(str::to_string)));
    }
}

// ============================================================================
// Location
// ============================================================================

pub struct FixedLocation(pub Option<Coordinates>);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Result<Coordinates, PulseError> {
        self.0
            .ok_or_else(|| PulseError::Unavailable("location services off".to_string()))
    }
}

// ============================================================================
// Dispatch
// ============================================================================

#[derive(Default)]
pub struct RecordingDispatch {
    pub fail_call: bool,
    pub fail_alert: bool,
    pub calls: Mutex<Vec<AssessmentRecord>>,
    pub alerts: Mutex<Vec<AssessmentRecord>>,
}

impl RecordingDispatch {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl EmergencyDispatch for RecordingDispatch {
    async fn emergency_call(
        &self,
        record: &AssessmentRecord,
    ) -> Result<DispatchReceipt, DispatchError> {
        self.calls.lock().unwrap().push(record.clone());
        if self.fail_call {
            return Err(DispatchError::Rejected {
                reason: "line busy".to_string(),
            });
        }
        Ok(DispatchReceipt {
            sid: Some("CA-test".to_string()),
        })
    }

    async fn family_alert(
        &self,
        record: &AssessmentRecord,
    ) -> Result<DispatchReceipt, DispatchError> {
        self.alerts.lock().unwrap().push(record.clone());
        if self.fail_alert {
            return Err(DispatchError::Status {
                code: 500,
                message: "Twilio not configured".to_string(),
            });
        }
        Ok(DispatchReceipt {
            sid: Some("SM-test".to_string()),
        })
    }
}

// ============================================================================
// Gateways
// ============================================================================

/// Replies with a fixed text every turn; records what it was given.
pub struct ScriptedGateway {
    pub reply: String,
    pub configured: bool,
    pub description: Result<String, ()>,
    pub images_seen: Mutex<Vec<bool>>,
    pub describe_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            configured: true,
            description: Ok("Adult male, 40-50, blue shirt".to_string()),
            images_seen: Mutex::new(Vec::new()),
            describe_calls: AtomicUsize::new(0),
        }
    }

    pub fn images(&self) -> Vec<bool> {
        self.images_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningGateway for ScriptedGateway {
    async fn respond(
        &self,
        image: Option<&Bytes>,
        _history: &[Message],
    ) -> Result<GatewayReply, GatewayError> {
        self.images_seen.lock().unwrap().push(image.is_some());
        Ok(GatewayReply {
            text: self.reply.clone(),
            marker: None,
        })
    }

    async fn greeting(&self) -> Result<GatewayReply, GatewayError> {
        Ok(GatewayReply {
            text: "Tap their shoulders and shout.".to_string(),
            marker: None,
        })
    }

    async fn describe_patient(&self, _image: &Bytes) -> Result<String, GatewayError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.description
            .clone()
            .map_err(|_| GatewayError::Unavailable { attempts: 3 })
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Always fails, as if the network were down.
pub struct FailingGateway;

#[async_trait]
impl ReasoningGateway for FailingGateway {
    async fn respond(
        &self,
        _image: Option<&Bytes>,
        _history: &[Message],
    ) -> Result<GatewayReply, GatewayError> {
        Err(GatewayError::Unavailable { attempts: 3 })
    }

    async fn greeting(&self) -> Result<GatewayReply, GatewayError> {
        Err(GatewayError::Unavailable { attempts: 3 })
    }

    async fn describe_patient(&self, _image: &Bytes) -> Result<String, GatewayError> {
        Err(GatewayError::Unavailable { attempts: 3 })
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Blocks every `respond` until released, so a turn can be held in flight.
pub struct BlockingGateway {
    pub entered: Notify,
    pub release: Notify,
}

impl BlockingGateway {
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ReasoningGateway for BlockingGateway {
    async fn respond(
        &self,
        _image: Option<&Bytes>,
        _history: &[Message],
    ) -> Result<GatewayReply, GatewayError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(GatewayReply {
            text: "Keep watching their chest.".to_string(),
            marker: Some("chest".to_string()),
        })
    }

    async fn greeting(&self) -> Result<GatewayReply, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn describe_patient(&self, _image: &Bytes) -> Result<String, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "blocking"
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub engine: Arc<ConversationEngine>,
    pub frames: Arc<FakeFrames>,
    pub speech: Arc<RecordingSpeech>,
    pub transcript: Arc<RecordingTranscript>,
    pub dispatch: Arc<RecordingDispatch>,
}

pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        frame_capture_timeout_ms: 100,
        frame_interval: 5,
    }
}

pub fn harness_with(
    gateway: Arc<dyn ReasoningGateway>,
    frames: FrameBehavior,
    dispatch: RecordingDispatch,
    record: AssessmentRecord,
) -> Harness {
    let frames = Arc::new(FakeFrames::new(frames));
    let speech = Arc::new(RecordingSpeech::default());
    let transcript = Arc::new(RecordingTranscript::default());
    let dispatch = Arc::new(dispatch);
    let location = Arc::new(FixedLocation(Some(Coordinates {
        latitude: 51.5,
        longitude: -0.125,
    })));

    let escalation = Arc::new(EmergencyEscalation::new(
        gateway.clone(),
        location,
        dispatch.clone(),
        speech.clone(),
    ));

    let engine = ConversationEngine::with_record(
        EngineDeps {
            gateway,
            frames: frames.clone(),
            speech: speech.clone(),
            transcript: transcript.clone(),
            escalation,
        },
        test_engine_config(),
        record,
    );

    Harness {
        engine: Arc::new(engine),
        frames,
        speech,
        transcript,
        dispatch,
    }
}

pub fn canned_harness() -> Harness {
    harness_with(
        Arc::new(CannedReasoning),
        FrameBehavior::Jpeg,
        RecordingDispatch::default(),
        AssessmentRecord::create_initial(),
    )
}
