//! Error types for pulsecast.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Text generation errors
    #[error("Model call failed: {message}")]
    Model { message: String },

    #[error("Generation exhausted after {attempts} attempt(s): {message}")]
    GenerationExhausted { attempts: u32, message: String },

    // Side-channel errors (always absorbed by the orchestrator)
    #[error("Speech synthesis failed: {message}")]
    Speech { message: String },

    #[error("Media generation failed: {message}")]
    Media { message: String },

    #[error("Persistence failed: {message}")]
    Persistence { message: String },

    // Client stream errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    // Background task errors
    #[error("Background task failed: {message}")]
    Task { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PulseError>;
