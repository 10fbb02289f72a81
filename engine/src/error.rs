//! Engine error types

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid scheduling parameters, detected when polling starts
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device already registered: {0}")]
    DuplicateDevice(String),

    #[error("Recording error: {0}")]
    Recording(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
