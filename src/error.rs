//! Error types for CNC link operations.

use thiserror::Error;

/// Result type alias for CNC link operations.
pub type Result<T> = std::result::Result<T, CncError>;

/// Error types for controller communication and EEPROM decoding.
#[derive(Error, Debug)]
pub enum CncError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No terminator line arrived within the command deadline
    #[error("Command timeout: {command:?}")]
    Timeout {
        /// Command text that timed out
        command: String,
    },

    /// Connection dropped while commands were pending
    #[error("Connection lost")]
    Disconnected,

    /// EEPROM image signature does not match the expected marker
    #[error("Invalid EEPROM image (signature mismatch)")]
    InvalidEepromImage,

    /// A `$n=value` reply line could not be parsed
    #[error("Malformed reply line: {0:?}")]
    MalformedReply(String),

    /// Axis index outside the supported range
    #[error("Axis index out of range: {axis} (max {max})")]
    AxisOutOfRange {
        /// Requested axis index
        axis: usize,
        /// Highest valid axis index
        max: usize,
    },
}
