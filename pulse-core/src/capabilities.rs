//! Device-side collaborators the engine is constructed with.
//!
//! Camera, speech synthesis, location and the presentation transcript live
//! outside this crate; the engine only sees these traits.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PulseError;
use crate::models::Message;

/// Camera frame capture. Expected to return a small (~320x240) JPEG.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture_frame(&self) -> Result<Bytes, PulseError>;
}

/// Text-to-speech. Fire-and-forget: implementations must not block.
pub trait SpeechOutput: Send + Sync {
    fn speak(&self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Human-readable form used in the emergency report.
    pub fn describe(&self) -> String {
        format!("{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<Coordinates, PulseError>;
}

/// Presentation-side record of the conversation.
pub trait TranscriptSink: Send + Sync {
    fn append(&self, message: &Message);

    /// The instruction currently shown to the bystander, with its AR marker.
    fn instruction(&self, _text: &str, _marker: Option<&str>) {}
}
