//! pulse-cli: run a guided emergency assessment from a terminal
//!
//! Each stdin line is one bystander transcript. Spoken instructions are
//! printed to stdout; an optional JPEG stands in for the camera.
//!
//! # Subcommands
//! - `run [--frame <jpeg>] [--lat <f64> --long <f64>]`: one incident
//! - `status`: dispatch backend health

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use pulse_core::{
    create_gateway, BodyMarker, ConversationEngine, Coordinates, EmergencyEscalation,
    EngineDeps, FrameSource, GatewaySettings, HttpDispatchClient, LocationProvider, Message,
    PulseConfig, PulseError, RejectReason, SpeechOutput, TranscriptSink, TurnOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "pulse-cli", version, about = "Pulse guided emergency response terminal harness")]
struct Cli {
    /// Config file (defaults are used if it cannot be loaded)
    #[arg(short, long, default_value = "pulse.toml")]
    config: String,

    /// Dispatch backend URL (overrides `[dispatch].backend_url`)
    #[arg(long, env = "PULSE_BACKEND_URL")]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one incident, reading bystander lines from stdin
    Run {
        /// JPEG attached whenever the engine captures a frame
        #[arg(long)]
        frame: Option<PathBuf>,

        /// Latitude reported on escalation
        #[arg(long, requires = "long", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude reported on escalation
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        long: Option<f64>,
    },

    /// Show dispatch backend status
    Status,
}

// ============================================================================
// Terminal capabilities
// ============================================================================

struct FileFrames(Option<PathBuf>);

#[async_trait]
impl FrameSource for FileFrames {
    async fn capture_frame(&self) -> Result<Bytes, PulseError> {
        match &self.0 {
            Some(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            None => Err(PulseError::Unavailable("no camera attached".to_string())),
        }
    }
}

struct FixedLocation(Option<Coordinates>);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Result<Coordinates, PulseError> {
        self.0
            .ok_or_else(|| PulseError::PermissionDenied("no location given".to_string()))
    }
}

struct StdoutSpeech;

impl SpeechOutput for StdoutSpeech {
    fn speak(&self, text: &str) {
        println!("🔊 {}", text);
    }
}

struct StdoutTranscript;

impl TranscriptSink for StdoutTranscript {
    fn append(&self, message: &Message) {
        tracing::debug!("{}", message);
    }

    fn instruction(&self, _text: &str, marker: Option<&str>) {
        if let Some(label) = marker.and_then(marker_label) {
            println!("   ↳ {}", label);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(path: &str, server: Option<String>) -> PulseConfig {
    let mut config = PulseConfig::load(path).unwrap_or_else(|e| {
        tracing::warn!("Using default config ({}): {}", path, e);
        PulseConfig::default()
    });
    if let Some(server) = server {
        config.dispatch.backend_url = server;
    }
    config
}

fn coordinates(lat: Option<f64>, long: Option<f64>) -> Option<Coordinates> {
    Some(Coordinates {
        latitude: lat?,
        longitude: long?,
    })
}

/// Overlay hint for a marker the AR layer can draw; anything else is dropped.
fn marker_label(marker: &str) -> Option<&'static str> {
    BodyMarker::parse(marker).map(|m| match m {
        BodyMarker::Neck => "neck: pulse check",
        BodyMarker::Chest => "chest: compressions",
        BodyMarker::Chin => "chin: head tilt, chin lift",
    })
}

fn is_exit_command(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "quit" | "exit" | ":q")
}

fn describe_rejection(reason: RejectReason) -> &'static str {
    match reason {
        RejectReason::Blank => "(nothing heard)",
        RejectReason::TurnInFlight => "(still thinking, try again)",
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn do_run(
    config: PulseConfig,
    frame: Option<PathBuf>,
    location: Option<Coordinates>,
) -> anyhow::Result<()> {
    let settings = GatewaySettings::new(None, &config.gateway);
    let gateway: Arc<dyn pulse_core::ReasoningGateway> = Arc::from(create_gateway(settings)?);
    let dispatch = Arc::new(HttpDispatchClient::new(&config.dispatch)?);
    let speech: Arc<dyn SpeechOutput> = Arc::new(StdoutSpeech);

    let escalation = Arc::new(EmergencyEscalation::new(
        gateway.clone(),
        Arc::new(FixedLocation(location)),
        dispatch,
        speech.clone(),
    ));

    let engine = ConversationEngine::new(
        EngineDeps {
            gateway,
            frames: Arc::new(FileFrames(frame)),
            speech,
            transcript: Arc::new(StdoutTranscript),
            escalation,
        },
        config.engine.clone(),
    );

    engine.begin().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if is_exit_command(&line) {
            break;
        }

        match engine.process_input(&line).await {
            TurnOutcome::Completed(report) if report.escalated => {
                println!("🚨 Emergency services are being contacted");
            }
            TurnOutcome::Completed(_) => {}
            TurnOutcome::Rejected(reason) => println!("{}", describe_rejection(reason)),
        }
    }

    if let Some(report) = engine.wait_for_escalation().await {
        match &report.call {
            Ok(receipt) => println!("Emergency call: placed ({})", receipt.sid.as_deref().unwrap_or("-")),
            Err(e) => println!("Emergency call: FAILED: {}", e),
        }
        match &report.alert {
            Ok(receipt) => println!("Family alert:   sent ({})", receipt.sid.as_deref().unwrap_or("-")),
            Err(e) => println!("Family alert:   FAILED: {}", e),
        }
    }

    let snapshot = engine.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot.record)?);
    Ok(())
}

async fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/", server.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().await.unwrap_or_default();
            println!("Backend:   {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Timestamp: {}", body["timestamp"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("pulse-cli: backend unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("pulse-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config, cli.server);

    let result = match cli.command {
        Commands::Run { frame, lat, long } => do_run(config, frame, coordinates(lat, long)).await,
        Commands::Status => do_status(&config.dispatch.backend_url).await,
    };

    if let Err(e) = result {
        eprintln!("pulse-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
