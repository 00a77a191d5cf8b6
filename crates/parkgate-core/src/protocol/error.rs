//! Protocol errors

use thiserror::Error;

/// Errors that can occur during controller communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Access denied to port {0} (is another application using it?)")]
    AccessDenied(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Not connected to controller")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Malformed message ({reason}): {line}")]
    Decode { line: String, reason: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Build a decode error that keeps the offending line for diagnostics
    pub fn decode(line: &str, reason: impl Into<String>) -> Self {
        ProtocolError::Decode {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Classify a `serialport` failure for a given port name
    pub fn from_serial(port: &str, err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(port.to_string()),
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                ProtocolError::PortNotFound(port.to_string())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                ProtocolError::AccessDenied(port.to_string())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut) => ProtocolError::Timeout,
            _ => ProtocolError::SerialError(err.to_string()),
        }
    }
}
