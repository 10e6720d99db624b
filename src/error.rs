//! # Error Types
//!
//! Custom error types for the BLE WebSocket forwarder using `thiserror`.

use thiserror::Error;

/// Main error type for the forwarder
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// Transport could not start a connection attempt
    #[error("Transport connect failure: {0}")]
    TransportConnect(String),

    /// Transport refused or failed to accept an outbound frame
    #[error("Transport send failure: {0}")]
    TransportSend(String),

    /// Transport is healthy but cannot take another frame right now
    #[error("Transport busy: outbound queue full")]
    TransportBusy,

    /// Inbound frame could not be understood
    #[error("Malformed inbound message: {0}")]
    MalformedInbound(String),

    /// Configuration values failed validation
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// BLE client rejected an operation
    #[error("BLE link error: {0}")]
    BleLink(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the forwarder
pub type Result<T> = std::result::Result<T, ForwarderError>;
