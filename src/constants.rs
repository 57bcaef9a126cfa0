//! Protocol and timing constants for the relay board.
//!
//! This module defines the constants used on the serial link to the board,
//! including method ids, timing parameters, and the base unit-conversion
//! factors shared by the whole crate.

/// Baud rate of the relay board's serial interface
pub const BAUD_RATE: u32 = 9600;

/// Serial read timeout in milliseconds
pub const TIMEOUT_MS: u64 = 50;

/// Minimum delay between consecutive writes to the board, in milliseconds
pub const WRITE_WRITE_DELAY_MS: u64 = 50;

/// The board resets when its serial port is opened; time to wait before it
/// is ready to accept commands, in milliseconds
pub const RESET_DELAY_MS: u64 = 2000;

/// Number of relay channels on the board
pub const RELAY_COUNT: u8 = 8;

/// Duty cycle used for the camera trigger output, in percent
pub const CAMERA_TRIGGER_DUTY_CYCLE: f64 = 50.0;

/// Minimum number of nested PWM levels in one command
pub const PWM_LEVEL_COUNT_MIN: usize = 1;

/// Maximum number of nested PWM levels in one command
pub const PWM_LEVEL_COUNT_MAX: usize = 3;

/// Method id: start a (possibly nested) PWM pattern on one relay
pub const METHOD_ID_START_PWM: i64 = 0;

/// Method id: stop every running pulse and open all relays
pub const METHOD_ID_STOP_ALL_PULSES: i64 = 1;

/// Method id: query the power value of every relay
pub const METHOD_ID_GET_POWER: i64 = 2;

/// Method id: query the per-level PWM status of every relay
pub const METHOD_ID_GET_PWM_STATUS: i64 = 3;

/// Maximum relay power value
pub const POWER_MAX: u8 = 255;

/// Repeat count meaning "repeat the pattern forever"
pub const REPEAT_FOREVER: i64 = -1;

/// Upper bound on a single response line from the board, in bytes
pub const RESPONSE_LENGTH_MAX: usize = 256;

/// Milliseconds per second at real-time scale
pub const MILLISECONDS_PER_SECOND: u32 = 1000;

/// Seconds per minute
pub const SECONDS_PER_MINUTE: u32 = 60;

/// Minutes per hour
pub const MINUTES_PER_HOUR: u32 = 60;

/// Hours per day
pub const HOURS_PER_DAY: u32 = 24;
