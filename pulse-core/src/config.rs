use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::PulseError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PulseConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub telephony: TelephonyConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-exp".to_string(),
            max_output_tokens: 100,
            temperature: 0.7,
            max_retries: 2,
            retry_delay_ms: 250,
            timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard ceiling on a single camera capture.
    pub frame_capture_timeout_ms: u64,
    /// A fresh frame is attached when the turn count is a multiple of this.
    pub frame_interval: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_capture_timeout_ms: 1500,
            frame_interval: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub backend_url: String,
    pub emergency_number: Option<String>,
    pub family_number: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:3001".to_string(),
            emergency_number: None,
            family_number: None,
            timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelephonyConfig {
    pub base_url: String,
    pub from_number: Option<String>,
    pub emergency_number: Option<String>,
    pub family_number: Option<String>,
    pub voice: String,
    pub language: String,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twilio.com/2010-04-01".to_string(),
            from_number: None,
            emergency_number: None,
            family_number: None,
            voice: "Polly.Amy".to_string(),
            language: "en-GB".to_string(),
        }
    }
}

impl PulseConfig {
    /// Load `path` (extension optional) layered with `PULSE__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, PulseError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("PULSE").separator("__"))
            .build()?;
        Ok(s.try_deserialize()?)
    }
}
