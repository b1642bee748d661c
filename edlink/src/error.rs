//! Error types for edlink.

use std::io;
use thiserror::Error;

/// Result type for edlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for edlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed command tag (empty or not exactly 4 ASCII bytes).
    ///
    /// Rejected before any bytes are written to the wire.
    #[error("Invalid command tag: {0:?}")]
    InvalidTag(String),

    /// ROM image cannot be prepared for transfer.
    #[error("Malformed ROM image: {0}")]
    MalformedImage(String),

    /// The device did not answer the pre-transfer test command.
    #[error("No response from device")]
    NoResponse,

    /// No usable serial port was found.
    #[error("Device not found")]
    DeviceNotFound,

    /// A long-running loop was cancelled by the embedding application.
    #[error("Interrupted")]
    Interrupted,
}
