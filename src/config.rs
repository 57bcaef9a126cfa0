//! Experiment configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! port: /dev/ttyUSB0
//! frame_rate: 15.0
//! relays:
//!   camera: 0
//!   white_light: 1
//!   red_light: 2
//! start:
//!   offset_days: 0.5
//! entrainment:
//!   duration_days: 3.0
//!   white_light:
//!     pwm_on_duration_hours: 12.0
//!     pwm_off_duration_hours: 12.0
//! experiment:
//!   - duration_days: 7.0
//!     white_light:
//!       pwm_on_duration_hours: 12.0
//!       pwm_off_duration_hours: 12.0
//!       pattern_on_duration_days: 5.0
//!       pattern_off_duration_days: 2.0
//!     red_light:
//!       pwm_frequency_hz: 10.0
//!       pwm_duty_cycle_percent: 50.0
//!       pattern_on_duration_hours: 12.0
//!       pattern_off_duration_hours: 12.0
//!       delay_days: 2.0
//! recovery:
//!   duration_days: 2.0
//!   white_light:
//!     pwm_on_duration_hours: 12.0
//!     pwm_off_duration_hours: 12.0
//! ```
//!
//! Parsing builds plain typed structs once, up front; nothing in the hot
//! polling path looks anything up dynamically.

use crate::constants::{BAUD_RATE, MILLISECONDS_PER_SECOND, POWER_MAX};
use crate::error::{AssayError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

/// Top-level experiment configuration, one YAML document.
#[derive(Debug, Clone, Deserialize)]
pub struct AssayConfig {
    /// Serial port of the relay board. Required.
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Camera frame rate in Hz; also the status polling cadence.
    pub frame_rate: f64,
    /// Milliseconds per simulated second; 1000 is real time, smaller values
    /// compress the whole experiment for accelerated runs.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    pub relays: RelayAssignments,
    #[serde(default)]
    pub start: StartSpec,
    pub entrainment: SteadyPhaseConfig,
    #[serde(default)]
    pub experiment: Vec<RunConfig>,
    pub recovery: SteadyPhaseConfig,
}

/// Which relay drives which output.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RelayAssignments {
    pub camera: i32,
    pub white_light: i32,
    pub red_light: i32,
}

/// When the first phase starts.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum StartSpec {
    /// Explicit start instant; clamped to "now" if already past.
    At { at: DateTime<Utc> },
    /// Start this many days from now.
    OffsetDays { offset_days: f64 },
}

impl Default for StartSpec {
    fn default() -> Self {
        StartSpec::OffsetDays { offset_days: 0.0 }
    }
}

/// A steady phase (entrainment or recovery): each configured light runs one
/// hours-on/hours-off cycle for the whole phase.
#[derive(Debug, Clone, Deserialize)]
pub struct SteadyPhaseConfig {
    pub duration_days: f64,
    pub white_light: Option<HoursCycle>,
    pub red_light: Option<HoursCycle>,
}

/// One hours-on/hours-off light cycle.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HoursCycle {
    pub pwm_on_duration_hours: f64,
    pub pwm_off_duration_hours: f64,
    #[serde(default = "default_power")]
    pub power: u8,
}

/// One experiment run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub duration_days: f64,
    pub white_light: Option<RunWhiteLight>,
    pub red_light: Option<RunRedLight>,
}

/// White light program for a run: an hours window nested inside a days
/// window.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RunWhiteLight {
    pub pwm_on_duration_hours: f64,
    pub pwm_off_duration_hours: f64,
    pub pattern_on_duration_days: f64,
    pub pattern_off_duration_days: f64,
    #[serde(default = "default_power")]
    pub power: u8,
}

/// Red light program for a run: a strobe nested inside an hours window,
/// optionally starting `delay_days` into the run.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RunRedLight {
    pub pwm_frequency_hz: f64,
    pub pwm_duty_cycle_percent: f64,
    pub pattern_on_duration_hours: f64,
    pub pattern_off_duration_hours: f64,
    #[serde(default)]
    pub delay_days: f64,
    #[serde(default = "default_power")]
    pub power: u8,
}

fn default_baud_rate() -> u32 {
    BAUD_RATE
}

fn default_time_scale() -> f64 {
    MILLISECONDS_PER_SECOND as f64
}

fn default_power() -> u8 {
    POWER_MAX
}

impl AssayConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AssayError::Config(format!("cannot open {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: AssayConfig =
            serde_yaml::from_str(content).map_err(|e| AssayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(AssayError::Config("must specify serial port".to_string()));
        }
        if self.frame_rate <= 0.0 {
            return Err(AssayError::Config(format!(
                "frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.time_scale <= 0.0 {
            return Err(AssayError::Config(format!(
                "time_scale must be positive, got {}",
                self.time_scale
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
port: /dev/ttyUSB0
frame_rate: 15.0
relays:
  camera: 0
  white_light: 1
  red_light: 2
entrainment:
  duration_days: 3.0
  white_light:
    pwm_on_duration_hours: 12.0
    pwm_off_duration_hours: 12.0
recovery:
  duration_days: 2.0
  white_light:
    pwm_on_duration_hours: 12.0
    pwm_off_duration_hours: 12.0
"#;

    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = AssayConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, BAUD_RATE);
        assert_eq!(config.time_scale, 1000.0);
        assert!(config.experiment.is_empty());
        assert!(matches!(
            config.start,
            StartSpec::OffsetDays { offset_days } if offset_days == 0.0
        ));
        let white = config.entrainment.white_light.unwrap();
        assert_eq!(white.power, POWER_MAX);
        assert!(config.entrainment.red_light.is_none());
    }

    #[test]
    fn load_from_file() {
        let f = yaml_tempfile(MINIMAL);
        let config = AssayConfig::from_file(f.path()).unwrap();
        assert_eq!(config.frame_rate, 15.0);
    }

    #[test]
    fn missing_port_is_a_config_error() {
        let yaml = MINIMAL.replacen("port: /dev/ttyUSB0\n", "", 1);
        let result = AssayConfig::from_yaml(&yaml);
        assert!(matches!(result, Err(AssayError::Config(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = AssayConfig::from_file(Path::new("/nonexistent/assay.yaml"));
        assert!(matches!(result, Err(AssayError::Config(_))));
    }

    #[test]
    fn absolute_start_time_parses() {
        let yaml = format!("{}start:\n  at: 2026-03-01T08:00:00Z\n", MINIMAL);
        let config = AssayConfig::from_yaml(&yaml).unwrap();
        match config.start {
            StartSpec::At { at } => {
                assert_eq!(at.to_rfc3339(), "2026-03-01T08:00:00+00:00");
            }
            other => panic!("expected absolute start, got {:?}", other),
        }
    }

    #[test]
    fn experiment_runs_parse_with_red_light_delay() {
        let yaml = format!(
            "{}experiment:
  - duration_days: 7.0
    white_light:
      pwm_on_duration_hours: 12.0
      pwm_off_duration_hours: 12.0
      pattern_on_duration_days: 5.0
      pattern_off_duration_days: 2.0
    red_light:
      pwm_frequency_hz: 10.0
      pwm_duty_cycle_percent: 50.0
      pattern_on_duration_hours: 12.0
      pattern_off_duration_hours: 12.0
      delay_days: 2.0
",
            MINIMAL
        );
        let config = AssayConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.experiment.len(), 1);
        let red = config.experiment[0].red_light.unwrap();
        assert_eq!(red.delay_days, 2.0);
        assert_eq!(red.pwm_frequency_hz, 10.0);
    }

    #[test]
    fn nonpositive_frame_rate_is_rejected() {
        let yaml = MINIMAL.replacen("frame_rate: 15.0", "frame_rate: 0.0", 1);
        assert!(matches!(
            AssayConfig::from_yaml(&yaml),
            Err(AssayError::Config(_))
        ));
    }
}
