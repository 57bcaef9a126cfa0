//! Error types for sleep assay operations.

use thiserror::Error;

/// Result type alias for assay operations.
pub type Result<T> = std::result::Result<T, AssayError>;

/// Error types for relay board communication and experiment control.
#[derive(Error, Debug)]
pub enum AssayError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or invalid experiment configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A write was attempted before the minimum inter-write delay elapsed
    #[error("Write rate exceeded: {elapsed_ms}ms since last write (minimum {required_ms}ms)")]
    WriteRateExceeded {
        /// Milliseconds elapsed since the previous write
        elapsed_ms: u64,
        /// Configured minimum inter-write delay in milliseconds
        required_ms: u64,
    },

    /// The serial channel closed underneath an operation
    #[error("Transport closed")]
    TransportClosed,

    /// A query response could not be decoded
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// PWM frequency must be positive
    #[error("Invalid frequency: {0} Hz")]
    InvalidFrequency(f64),

    /// A command must carry between 1 and 3 nested PWM levels
    #[error("Invalid cycle spec: {0} levels (expected 1 to 3)")]
    InvalidCycleSpec(usize),

    /// Durations must be non-negative and cycle periods non-zero
    #[error("Invalid duration: {0}")]
    InvalidDuration(f64),
}

impl AssayError {
    /// Whether the polling loop may skip the current tick and carry on.
    ///
    /// Everything else (connection loss, I/O failure, encoding bugs) is
    /// fatal to the operation that hit it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AssayError::MalformedResponse(_) | AssayError::WriteRateExceeded { .. }
        )
    }

    /// Whether this error came out of PWM command encoding.
    ///
    /// Encoding failures abort the current phase's command issuance but
    /// leave patterns already running on the board untouched.
    pub fn is_encoding(&self) -> bool {
        matches!(
            self,
            AssayError::InvalidFrequency(_)
                | AssayError::InvalidCycleSpec(_)
                | AssayError::InvalidDuration(_)
        )
    }
}
