//! PWM command encoding.
//!
//! Translates semantic cycle descriptions (frequency/duty, hours on/off,
//! days on/off) into the board's integer millisecond fields. The board only
//! accepts integers, so every converted value is truncated, never rounded;
//! the resulting sub-millisecond timing error is accepted and reproducible.

use crate::constants::{PWM_LEVEL_COUNT_MAX, PWM_LEVEL_COUNT_MIN};
use crate::error::{AssayError, Result};
use crate::types::{clamp_relay, CycleSpec, PwmCommand, PwmLevel};
use crate::units::TimeBase;

/// Build a [`PwmCommand`] from an ordered list of cycle specs.
///
/// `cycle_specs` must hold 1 to 3 entries, innermost level first. Order is
/// preserved exactly; it defines the nesting on the board. The relay index
/// is clamped here (see [`clamp_relay`]), not in the transport.
pub fn encode(
    relay: i32,
    power: u8,
    delay_ms: i64,
    repeat_count: i64,
    cycle_specs: &[CycleSpec],
    time: &TimeBase,
) -> Result<PwmCommand> {
    if cycle_specs.len() < PWM_LEVEL_COUNT_MIN || cycle_specs.len() > PWM_LEVEL_COUNT_MAX {
        return Err(AssayError::InvalidCycleSpec(cycle_specs.len()));
    }

    let mut levels = Vec::with_capacity(cycle_specs.len());
    for spec in cycle_specs {
        levels.push(encode_level(spec, time)?);
    }

    Ok(PwmCommand {
        relay: clamp_relay(relay),
        power,
        delay_ms,
        repeat_count,
        levels,
    })
}

fn encode_level(spec: &CycleSpec, time: &TimeBase) -> Result<PwmLevel> {
    let (period_ms, on_duration_ms) = match *spec {
        CycleSpec::FrequencyDutyCycle {
            frequency_hz,
            duty_cycle_percent,
        } => {
            if frequency_hz <= 0.0 {
                return Err(AssayError::InvalidFrequency(frequency_hz));
            }
            // the board clamps power the same way; out-of-range duty cycles
            // are clamped rather than rejected
            let duty = duty_cycle_percent.clamp(0.0, 100.0);
            let period = time.ms_per_second() / frequency_hz;
            (period, (duty / 100.0) * period)
        }
        CycleSpec::HoursOnOff { on_hours, off_hours } => {
            let on = time.hours_to_ms(on_hours)?;
            let off = time.hours_to_ms(off_hours)?;
            (on + off, on)
        }
        CycleSpec::DaysOnOff { on_days, off_days } => {
            let on = time.days_to_ms(on_days)?;
            let off = time.days_to_ms(off_days)?;
            (on + off, on)
        }
    };

    // integer wire fields: truncate toward zero, never round
    Ok(PwmLevel {
        period_ms: period_ms as u32,
        on_duration_ms: on_duration_ms as u32,
    })
}
