use crate::constants::RELAY_COUNT;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Clamp a raw relay index to the board's addressing rules.
///
/// Negative indices clamp to 0. Indices past the last channel clamp to
/// `RELAY_COUNT` itself, which is an out-of-range sentinel rather than a
/// valid channel; the board's handling of the sentinel is its own business.
pub fn clamp_relay(relay: i32) -> u8 {
    if relay < 0 {
        0
    } else if relay > (RELAY_COUNT as i32 - 1) {
        RELAY_COUNT
    } else {
        relay as u8
    }
}

/// One square wave: a period and the on-duration within it, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmLevel {
    pub period_ms: u32,
    pub on_duration_ms: u32,
}

/// A fully-encoded PWM command, ready for the wire.
///
/// `levels` holds 1 to 3 nested square waves, innermost first; the order
/// defines the nesting on the board and is never reshuffled. Built once by
/// the encoder and sent once.
#[derive(Debug, Clone, PartialEq)]
pub struct PwmCommand {
    pub relay: u8,
    pub power: u8,
    pub delay_ms: i64,
    /// Number of repetitions of the outermost pattern; -1 repeats forever.
    pub repeat_count: i64,
    pub levels: Vec<PwmLevel>,
}

/// Semantic description of one cycle level, before unit conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleSpec {
    /// Sub-second square wave given as frequency and duty cycle.
    FrequencyDutyCycle {
        frequency_hz: f64,
        duty_cycle_percent: f64,
    },
    /// On/off window measured in hours.
    HoursOnOff { on_hours: f64, off_hours: f64 },
    /// On/off window measured in days.
    DaysOnOff { on_days: f64, off_days: f64 },
}

/// Which stage of the experiment timeline a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseLabel {
    Entrainment,
    ExperimentRun(usize),
    Recovery,
}

impl fmt::Display for PhaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseLabel::Entrainment => write!(f, "entrainment"),
            PhaseLabel::ExperimentRun(index) => write!(f, "experiment run {}", index),
            PhaseLabel::Recovery => write!(f, "recovery"),
        }
    }
}

/// One observation of the board, as used for change detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Power value per relay, `RELAY_COUNT` entries.
    pub power: Vec<u8>,
    /// Per-relay, per-level PWM status flags, `RELAY_COUNT` rows.
    pub pwm_status: Vec<Vec<u8>>,
    pub phase: PhaseLabel,
}

/// One emitted record of the run-length-compressed status log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub video_frame: i64,
    pub timestamp: DateTime<Utc>,
    pub phase_label: String,
    pub white_light_power: u8,
    pub red_light_pwm_status: Vec<u8>,
}
