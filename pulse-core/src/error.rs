use thiserror::Error;

/// Failures reported by the device-side collaborators (camera, location).
#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}
