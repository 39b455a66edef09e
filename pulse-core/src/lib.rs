pub mod api;
pub mod capabilities;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod models;
pub mod reasoning;
pub mod signals;

pub use api::{DispatchResponse, EmergencyCallRequest, FamilyAlertRequest};
pub use capabilities::{Coordinates, FrameSource, LocationProvider, SpeechOutput, TranscriptSink};
pub use config::PulseConfig;
pub use dispatch::{DispatchError, DispatchReceipt, EmergencyDispatch, HttpDispatchClient};
pub use engine::{
    ConversationEngine, EngineDeps, EnginePhase, IncidentSnapshot, RejectReason, TurnOutcome,
    TurnReport, APOLOGY_INSTRUCTION, FALLBACK_GREETING,
};
pub use error::PulseError;
pub use escalation::{
    EmergencyEscalation, EscalationReport, COMPLETION_ANNOUNCEMENT, DESCRIPTION_UNAVAILABLE,
    LOCATION_UNAVAILABLE,
};
pub use models::{AssessmentRecord, AssessmentUpdate, Message, Role};
pub use reasoning::{
    create_gateway, CannedReasoning, GatewayError, GatewayReply, GatewaySettings,
    GeminiReasoningClient, ReasoningGateway,
};
pub use signals::BodyMarker;
