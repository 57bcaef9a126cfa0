//! Experiment phase sequencing and the poll/log loop.
//!
//! An assay is a fixed sequence of phases (entrainment, N experiment runs,
//! recovery) executed back to back against wall-clock deadlines. Each phase
//! issues one or two PWM commands and then polls the board at camera
//! frame-rate cadence, feeding samples to the run-length logger. The whole
//! lifecycle is one thread of control; the only shared resource is the
//! board handle, which `&mut` access keeps exclusive.

use crate::config::{AssayConfig, HoursCycle, RunRedLight, RunWhiteLight, StartSpec};
use crate::constants::{CAMERA_TRIGGER_DUTY_CYCLE, HOURS_PER_DAY, POWER_MAX, REPEAT_FOREVER};
use crate::encoder::encode;
use crate::error::{AssayError, Result};
use crate::logger::{Emitted, LogSink, RunLengthLogger};
use crate::transport::RelayBoard;
use crate::types::{clamp_relay, CycleSpec, LogRow, PhaseLabel, Sample};
use crate::units::TimeBase;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{error, info, warn};
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

/// One phase of the experiment timeline, before schedule resolution.
#[derive(Debug, Clone)]
pub struct Phase {
    pub label: PhaseLabel,
    pub duration_days: f64,
    pub lights: PhaseLights,
}

/// The light programs a phase issues at entry.
#[derive(Debug, Clone)]
pub enum PhaseLights {
    /// Entrainment and recovery: one hours cycle per configured light.
    Steady {
        white: Option<HoursCycle>,
        red: Option<HoursCycle>,
    },
    /// Experiment run: nested white window, optionally delayed red strobe.
    Run {
        white: Option<RunWhiteLight>,
        red: Option<RunRedLight>,
    },
}

/// A phase pinned to absolute start and end instants.
#[derive(Debug, Clone)]
pub struct ScheduledPhase {
    pub phase: Phase,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The scheduler's mutable cursor, advanced once per poll tick.
#[derive(Debug)]
pub struct ScheduleState {
    pub current_phase: usize,
    pub phase_end: DateTime<Utc>,
    /// Camera frame counter; -1 until the first trigger edge is seen.
    pub video_frame: i64,
    pub logger: RunLengthLogger<Sample>,
}

impl ScheduleState {
    fn new() -> Self {
        Self {
            current_phase: 0,
            phase_end: Utc::now(),
            video_frame: -1,
            logger: RunLengthLogger::new(),
        }
    }
}

/// Build the phase sequence from configuration: entrainment, each
/// experiment run in order, recovery.
pub fn build_phases(config: &AssayConfig) -> Vec<Phase> {
    let mut phases = Vec::with_capacity(config.experiment.len() + 2);
    phases.push(Phase {
        label: PhaseLabel::Entrainment,
        duration_days: config.entrainment.duration_days,
        lights: PhaseLights::Steady {
            white: config.entrainment.white_light,
            red: config.entrainment.red_light,
        },
    });
    for (index, run) in config.experiment.iter().enumerate() {
        phases.push(Phase {
            label: PhaseLabel::ExperimentRun(index),
            duration_days: run.duration_days,
            lights: PhaseLights::Run {
                white: run.white_light,
                red: run.red_light,
            },
        });
    }
    phases.push(Phase {
        label: PhaseLabel::Recovery,
        duration_days: config.recovery.duration_days,
        lights: PhaseLights::Steady {
            white: config.recovery.white_light,
            red: config.recovery.red_light,
        },
    });
    phases
}

/// Pin each phase to absolute instants.
///
/// The first phase starts at the configured instant (clamped to `now` if
/// already past) or `now` plus the configured offset. Every later phase
/// starts exactly where the previous one ends. End instants come from the
/// cumulative day total converted through the time base in one step, so
/// chaining accumulates no per-phase conversion drift.
pub fn resolve_schedule(
    phases: &[Phase],
    start: StartSpec,
    now: DateTime<Utc>,
    time: &TimeBase,
) -> Result<Vec<ScheduledPhase>> {
    let first_start = match start {
        StartSpec::At { at } => {
            if at < now {
                now
            } else {
                at
            }
        }
        StartSpec::OffsetDays { offset_days } => {
            if offset_days <= 0.0 {
                now
            } else {
                now + ChronoDuration::milliseconds(time.days_to_ms(offset_days)? as i64)
            }
        }
    };

    let mut schedule = Vec::with_capacity(phases.len());
    let mut cumulative_days = 0.0;
    let mut previous_end = first_start;
    for phase in phases {
        cumulative_days += phase.duration_days;
        let end =
            first_start + ChronoDuration::milliseconds(time.days_to_ms(cumulative_days)? as i64);
        schedule.push(ScheduledPhase {
            phase: phase.clone(),
            start: previous_end,
            end,
        });
        previous_end = end;
    }
    Ok(schedule)
}

/// Repeat count for a light that starts with its phase: how many whole
/// periods fit in the phase.
fn steady_repeat_count(duration_days: f64, period_days: f64) -> Result<i64> {
    if period_days <= 0.0 {
        return Err(AssayError::InvalidDuration(period_days));
    }
    Ok((duration_days / period_days) as i64)
}

/// Repeat count for a light delayed into its phase. Ceiling division: a
/// trailing partial cycle is still issued, unlike the undelayed case.
fn delayed_repeat_count(duration_days: f64, delay_days: f64, period_days: f64) -> Result<i64> {
    if period_days <= 0.0 {
        return Err(AssayError::InvalidDuration(period_days));
    }
    Ok(((duration_days - delay_days) / period_days).ceil() as i64)
}

/// Driver for one experiment: owns the schedule cursor, issues phase
/// commands, and runs the poll/log loop against one board.
pub struct Assay<'a, C: Read + Write, S: LogSink> {
    board: &'a mut RelayBoard<C>,
    config: &'a AssayConfig,
    sink: &'a mut S,
    time: TimeBase,
    camera_relay: usize,
    white_relay: usize,
    red_relay: usize,
}

impl<'a, C: Read + Write, S: LogSink> Assay<'a, C, S> {
    pub fn new(board: &'a mut RelayBoard<C>, config: &'a AssayConfig, sink: &'a mut S) -> Self {
        Self {
            board,
            config,
            sink,
            time: TimeBase::with_scale(config.time_scale),
            camera_relay: clamp_relay(config.relays.camera) as usize,
            white_relay: clamp_relay(config.relays.white_light) as usize,
            red_relay: clamp_relay(config.relays.red_light) as usize,
        }
    }

    /// Run the whole experiment: camera trigger, then every phase in order.
    ///
    /// Returns when the last phase's end time passes. Transport loss is
    /// fatal; per-tick query hiccups are logged and skipped; an encoding
    /// error aborts one phase's command issuance and nothing else, since
    /// patterns already on the board keep running by themselves.
    pub fn run(&mut self) -> Result<()> {
        let phases = build_phases(self.config);
        let schedule = resolve_schedule(&phases, self.config.start, Utc::now(), &self.time)?;
        let mut state = ScheduleState::new();

        self.start_camera_trigger(schedule[0].start)?;

        for (index, scheduled) in schedule.iter().enumerate() {
            state.current_phase = index;
            state.phase_end = scheduled.end;
            info!(
                "{}: {} days, until {}",
                scheduled.phase.label, scheduled.phase.duration_days, scheduled.end
            );
            if let Err(e) = self.issue_phase_commands(scheduled) {
                if e.is_encoding() {
                    error!(
                        "{}: command issuance aborted: {}",
                        scheduled.phase.label, e
                    );
                } else {
                    return Err(e);
                }
            }
            self.poll_until(scheduled, &mut state)?;
        }
        info!("assay complete after frame {}", state.video_frame);
        Ok(())
    }

    /// Start the camera trigger square wave at the configured frame rate.
    fn start_camera_trigger(&mut self, first_start: DateTime<Utc>) -> Result<()> {
        let delay_ms = (first_start - Utc::now()).num_milliseconds().max(0);
        let command = encode(
            self.config.relays.camera,
            POWER_MAX,
            delay_ms,
            REPEAT_FOREVER,
            &[CycleSpec::FrequencyDutyCycle {
                frequency_hz: self.config.frame_rate,
                duty_cycle_percent: CAMERA_TRIGGER_DUTY_CYCLE,
            }],
            &self.time,
        )?;
        self.board.send(&command)?;
        Ok(())
    }

    /// Issue the phase's light commands, delayed to the phase boundary.
    fn issue_phase_commands(&mut self, scheduled: &ScheduledPhase) -> Result<()> {
        let base_delay_ms = (scheduled.start - Utc::now()).num_milliseconds().max(0);
        let duration_days = scheduled.phase.duration_days;

        match &scheduled.phase.lights {
            PhaseLights::Steady { white, red } => {
                let assignments = [
                    (self.config.relays.white_light, white),
                    (self.config.relays.red_light, red),
                ];
                for (relay, cycle) in assignments {
                    let Some(cycle) = cycle else { continue };
                    let period_days = (cycle.pwm_on_duration_hours + cycle.pwm_off_duration_hours)
                        / HOURS_PER_DAY as f64;
                    let repeat_count = steady_repeat_count(duration_days, period_days)?;
                    let command = encode(
                        relay,
                        cycle.power,
                        base_delay_ms,
                        repeat_count,
                        &[CycleSpec::HoursOnOff {
                            on_hours: cycle.pwm_on_duration_hours,
                            off_hours: cycle.pwm_off_duration_hours,
                        }],
                        &self.time,
                    )?;
                    self.board.send(&command)?;
                }
            }
            PhaseLights::Run { white, red } => {
                if let Some(white) = white {
                    let period_days =
                        white.pattern_on_duration_days + white.pattern_off_duration_days;
                    let repeat_count = steady_repeat_count(duration_days, period_days)?;
                    let command = encode(
                        self.config.relays.white_light,
                        white.power,
                        base_delay_ms,
                        repeat_count,
                        &[
                            CycleSpec::HoursOnOff {
                                on_hours: white.pwm_on_duration_hours,
                                off_hours: white.pwm_off_duration_hours,
                            },
                            CycleSpec::DaysOnOff {
                                on_days: white.pattern_on_duration_days,
                                off_days: white.pattern_off_duration_days,
                            },
                        ],
                        &self.time,
                    )?;
                    self.board.send(&command)?;
                }
                if let Some(red) = red {
                    let period_days = (red.pattern_on_duration_hours
                        + red.pattern_off_duration_hours)
                        / HOURS_PER_DAY as f64;
                    let repeat_count =
                        delayed_repeat_count(duration_days, red.delay_days, period_days)?;
                    if repeat_count <= 0 {
                        warn!(
                            "{}: red light delay of {} days leaves no cycles to run",
                            scheduled.phase.label, red.delay_days
                        );
                    } else {
                        let delay_ms =
                            base_delay_ms + self.time.days_to_ms(red.delay_days)? as i64;
                        let command = encode(
                            self.config.relays.red_light,
                            red.power,
                            delay_ms,
                            repeat_count,
                            &[
                                CycleSpec::FrequencyDutyCycle {
                                    frequency_hz: red.pwm_frequency_hz,
                                    duty_cycle_percent: red.pwm_duty_cycle_percent,
                                },
                                CycleSpec::HoursOnOff {
                                    on_hours: red.pattern_on_duration_hours,
                                    off_hours: red.pattern_off_duration_hours,
                                },
                            ],
                            &self.time,
                        )?;
                        self.board.send(&command)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Poll at frame-rate cadence until the phase's end time passes.
    fn poll_until(&mut self, scheduled: &ScheduledPhase, state: &mut ScheduleState) -> Result<()> {
        let tick = Duration::from_secs_f64(1.0 / self.config.frame_rate);
        while Utc::now() < scheduled.end {
            let tick_start = Instant::now();
            match self.poll_once(scheduled.phase.label, state) {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("{}: skipping poll tick: {}", scheduled.phase.label, e)
                }
                Err(e) => return Err(e),
            }
            let elapsed = tick_start.elapsed();
            if elapsed < tick {
                thread::sleep(tick - elapsed);
            }
        }
        Ok(())
    }

    /// One poll tick: query the board, and on a camera trigger edge record
    /// the sample through the run-length logger.
    fn poll_once(&mut self, label: PhaseLabel, state: &mut ScheduleState) -> Result<()> {
        let power = self.board.get_power()?;
        let pwm_status = self.board.get_pwm_status()?;

        // frames are taken only while the camera trigger output is high;
        // the innermost level is the one toggling at frame rate
        let camera_high = pwm_status
            .get(self.camera_relay)
            .and_then(|levels| levels.first())
            .map(|&flag| flag != 0)
            .unwrap_or(false);
        if !camera_high {
            return Ok(());
        }

        state.video_frame += 1;
        let sample = Sample {
            power,
            pwm_status,
            phase: label,
        };
        for emitted in state
            .logger
            .observe(state.video_frame, Utc::now(), sample)
        {
            let row = self.log_row(&emitted);
            self.sink.write_row(&row)?;
        }
        Ok(())
    }

    fn log_row(&self, emitted: &Emitted<Sample>) -> LogRow {
        LogRow {
            video_frame: emitted.frame,
            timestamp: emitted.timestamp,
            phase_label: emitted.sample.phase.to_string(),
            white_light_power: emitted
                .sample
                .power
                .get(self.white_relay)
                .copied()
                .unwrap_or(0),
            red_light_pwm_status: emitted
                .sample
                .pwm_status
                .get(self.red_relay)
                .cloned()
                .unwrap_or_default(),
        }
    }
}
