//! # Sleep Assay
//!
//! A Rust library for driving multi-phase light/camera sleep assays on a
//! microcontroller-attached SSR relay board via serial communication. The
//! board runs nested PWM patterns autonomously; this crate encodes them,
//! sequences the experiment's phases against wall-clock deadlines, and logs
//! the board's observable state as a run-length-compressed trace.
//!
//! ## Features
//!
//! - Encode light cycles (strobe, hours window, days window) into the
//!   board's nested PWM command format
//! - Rate-limited request/response serial client with guaranteed
//!   stop-all-pulses on release
//! - Phase scheduling (entrainment, experiment runs, recovery) with
//!   absolute or offset start times
//! - Change-triggered status logging that keeps both boundary frames of
//!   every state run
//! - Time compression for accelerated dry runs of multi-day experiments
//!
//! ## Example
//!
//! ```no_run
//! use sleep_assay::{Assay, AssayConfig, CsvSink, RelayBoard};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AssayConfig::from_file(Path::new("assay.yaml"))?;
//!     let mut board = RelayBoard::open(&config.port)?;
//!     let mut sink = CsvSink::new(std::fs::File::create("assay_log.csv")?);
//!     Assay::new(&mut board, &config, &mut sink).run()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod encoder;
pub mod error;
pub mod logger;
pub mod scheduler;
pub mod transport;
pub mod types;
pub mod units;

pub use config::{AssayConfig, StartSpec};
pub use error::{AssayError, Result};
pub use logger::{CsvSink, LogSink, MemorySink, RunLengthLogger};
pub use scheduler::Assay;
pub use transport::RelayBoard;
pub use types::*;
pub use units::TimeBase;
