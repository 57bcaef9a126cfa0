//! Serial transport client for the relay board.
//!
//! Commands travel as one ASCII frame per line, `[f0,f1,...]\n`, where `f0`
//! is the method id and the remaining fields are the flattened integer
//! arguments in call order. Query responses come back as a single line
//! holding a JSON array. Writes are rate limited: the board drops bytes if
//! frames arrive closer together than [`WRITE_WRITE_DELAY_MS`].

use crate::constants::*;
use crate::error::{AssayError, Result};
use crate::types::PwmCommand;
use log::{debug, warn};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

/// Client for one serial-attached relay board.
///
/// The handle exists only while the channel is ready: `open` performs the
/// connect-and-reset dance and hands back a usable board, and dropping the
/// handle sends `stop_all_pulses` best-effort before the channel is
/// released. Patterns already issued keep running on the board either way.
///
/// All writes go through one rate-limit gate; exclusive `&mut` access is
/// what serializes callers. Wrap the board in a `Mutex` if it must be
/// shared.
pub struct RelayBoard<C: Read + Write> {
    channel: C,
    last_write: Option<Instant>,
    write_write_delay: Duration,
    stopped: bool,
}

impl RelayBoard<Box<dyn SerialPort>> {
    /// Open the board on a serial port at the default baud rate.
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baud(port_name, BAUD_RATE)
    }

    /// Open the board on a serial port.
    ///
    /// The board resets when the port is opened, so this blocks for
    /// [`RESET_DELAY_MS`] before returning a ready handle.
    pub fn open_with_baud(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(TIMEOUT_MS))
            .open()?;
        thread::sleep(Duration::from_millis(RESET_DELAY_MS));
        Ok(Self::over(port))
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }
}

impl<C: Read + Write> RelayBoard<C> {
    /// Wrap an already-ready byte channel.
    ///
    /// `open` is the entry point for real hardware; this one exists for
    /// driving the protocol over any ordered byte channel, tests included.
    pub fn over(channel: C) -> Self {
        Self {
            channel,
            last_write: None,
            write_write_delay: Duration::from_millis(WRITE_WRITE_DELAY_MS),
            stopped: false,
        }
    }

    /// Override the minimum inter-write delay.
    pub fn set_write_delay(&mut self, delay: Duration) {
        self.write_write_delay = delay;
    }

    /// Send a PWM command, waiting out the rate limiter if needed.
    ///
    /// Returns the number of bytes written.
    pub fn send(&mut self, command: &PwmCommand) -> Result<usize> {
        self.write_frame(&frame(&command_fields(command)), true)
    }

    /// Send a PWM command, failing with `WriteRateExceeded` instead of
    /// waiting when the previous write was too recent.
    pub fn try_send(&mut self, command: &PwmCommand) -> Result<usize> {
        self.write_frame(&frame(&command_fields(command)), false)
    }

    /// Stop every running pulse and open all relays.
    pub fn stop_all_pulses(&mut self) -> Result<usize> {
        self.write_frame(&frame(&[METHOD_ID_STOP_ALL_PULSES]), true)
    }

    /// Query the power value of every relay.
    pub fn get_power(&mut self) -> Result<Vec<u8>> {
        let line = self.query(METHOD_ID_GET_POWER)?;
        let power: Vec<u8> = serde_json::from_str(&line)
            .map_err(|e| AssayError::MalformedResponse(format!("power {:?}: {}", line, e)))?;
        if power.len() != RELAY_COUNT as usize {
            return Err(AssayError::MalformedResponse(format!(
                "power response has {} entries, expected {}",
                power.len(),
                RELAY_COUNT
            )));
        }
        Ok(power)
    }

    /// Query the per-level PWM status flags of every relay.
    ///
    /// One row per relay, one flag per nesting level; a flag is non-zero
    /// while that level's square wave is in its on half.
    pub fn get_pwm_status(&mut self) -> Result<Vec<Vec<u8>>> {
        let line = self.query(METHOD_ID_GET_PWM_STATUS)?;
        let status: Vec<Vec<u8>> = serde_json::from_str(&line)
            .map_err(|e| AssayError::MalformedResponse(format!("pwm status {:?}: {}", line, e)))?;
        if status.len() != RELAY_COUNT as usize
            || status.iter().any(|row| row.len() != PWM_LEVEL_COUNT_MAX)
        {
            return Err(AssayError::MalformedResponse(format!(
                "pwm status shape mismatch: {:?}",
                status
            )));
        }
        Ok(status)
    }

    /// Send `stop_all_pulses` and release the channel.
    ///
    /// Dropping the handle does the same best-effort; closing explicitly
    /// surfaces the stop command's result.
    pub fn close(mut self) -> Result<()> {
        self.stopped = true;
        self.write_frame(&frame(&[METHOD_ID_STOP_ALL_PULSES]), true)?;
        Ok(())
    }

    /// Blocking request/response round trip for a no-argument query method.
    fn query(&mut self, method_id: i64) -> Result<String> {
        self.write_frame(&frame(&[method_id]), true)?;
        self.read_line()
    }

    /// Write one frame, observing the rate limiter.
    ///
    /// With `delay_write` the call sleeps out the remainder of the minimum
    /// inter-write delay; without it the call fails fast so the caller can
    /// back off.
    fn write_frame(&mut self, request: &str, delay_write: bool) -> Result<usize> {
        if let Some(last) = self.last_write {
            let elapsed = last.elapsed();
            if elapsed < self.write_write_delay {
                if delay_write {
                    thread::sleep(self.write_write_delay - elapsed);
                } else {
                    return Err(AssayError::WriteRateExceeded {
                        elapsed_ms: elapsed.as_millis() as u64,
                        required_ms: self.write_write_delay.as_millis() as u64,
                    });
                }
            }
        }

        debug!("request {}", request.trim_end());
        self.channel.write_all(request.as_bytes())?;
        self.channel.flush()?;
        self.last_write = Some(Instant::now());
        Ok(request.len())
    }

    /// Read exactly one response line from the board.
    ///
    /// Read timeouts are treated as "keep waiting": the round trip blocks
    /// until a full line arrives, so a stuck board stalls the caller. A
    /// closed channel surfaces as `TransportClosed`.
    fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.channel.read(&mut byte) {
                Ok(0) => return Err(AssayError::TransportClosed),
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => {
                    if byte[0] != b'\r' {
                        line.push(byte[0]);
                    }
                    if line.len() > RESPONSE_LENGTH_MAX {
                        return Err(AssayError::MalformedResponse(format!(
                            "response exceeded {} bytes",
                            RESPONSE_LENGTH_MAX
                        )));
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            }
        }
        let response = String::from_utf8(line)
            .map_err(|_| AssayError::MalformedResponse("non-utf8 response".to_string()))?;
        debug!("response {}", response);
        Ok(response)
    }
}

impl<C: Read + Write> Drop for RelayBoard<C> {
    fn drop(&mut self) {
        if !self.stopped {
            if let Err(e) = self.write_frame(&frame(&[METHOD_ID_STOP_ALL_PULSES]), true) {
                warn!("stop_all_pulses on drop failed: {}", e);
            }
        }
    }
}

/// Format fields as one wire frame: `[f0,f1,...]` plus the line terminator.
fn frame(fields: &[i64]) -> String {
    let joined = fields
        .iter()
        .map(|field| field.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{}]\n", joined)
}

/// Flatten a command into its wire fields: method id, relay, power, delay,
/// repeat count, level count, then each level's (period, on-duration) pair
/// in nesting order.
fn command_fields(command: &PwmCommand) -> Vec<i64> {
    let mut fields = vec![
        METHOD_ID_START_PWM,
        command.relay as i64,
        command.power as i64,
        command.delay_ms,
        command.repeat_count,
        command.levels.len() as i64,
    ];
    for level in &command.levels {
        fields.push(level.period_ms as i64);
        fields.push(level.on_duration_ms as i64);
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PwmLevel;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// In-memory stand-in for the board: records every frame written and
    /// serves scripted responses to the query methods.
    struct ScriptedBoard {
        written: Rc<RefCell<Vec<String>>>,
        partial: Vec<u8>,
        pending: VecDeque<u8>,
        power: Vec<u8>,
        pwm_status: Vec<Vec<u8>>,
        canned_response: Option<String>,
    }

    impl ScriptedBoard {
        fn new(written: Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                written,
                partial: Vec::new(),
                pending: VecDeque::new(),
                power: vec![0; RELAY_COUNT as usize],
                pwm_status: vec![vec![0; PWM_LEVEL_COUNT_MAX]; RELAY_COUNT as usize],
                canned_response: None,
            }
        }

        fn respond(&mut self, line: String) {
            self.pending.extend(line.into_bytes());
            self.pending.push_back(b'\n');
        }

        fn handle(&mut self, request: String) {
            if let Some(line) = self.canned_response.clone() {
                self.respond(line);
            } else if request == format!("[{}]", METHOD_ID_GET_POWER) {
                let line = serde_json::to_string(&self.power).unwrap();
                self.respond(line);
            } else if request == format!("[{}]", METHOD_ID_GET_PWM_STATUS) {
                let line = serde_json::to_string(&self.pwm_status).unwrap();
                self.respond(line);
            }
            self.written.borrow_mut().push(request);
        }
    }

    impl Write for ScriptedBoard {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            for &b in buf {
                if b == b'\n' {
                    let request = String::from_utf8(std::mem::take(&mut self.partial)).unwrap();
                    self.handle(request);
                } else {
                    self.partial.push(b);
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ScriptedBoard {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.pending.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Ok(0),
            }
        }
    }

    fn scripted_board() -> (RelayBoard<ScriptedBoard>, Rc<RefCell<Vec<String>>>) {
        let written = Rc::new(RefCell::new(Vec::new()));
        let mut board = RelayBoard::over(ScriptedBoard::new(written.clone()));
        board.set_write_delay(Duration::from_millis(0));
        (board, written)
    }

    fn test_command() -> PwmCommand {
        PwmCommand {
            relay: 2,
            power: 255,
            delay_ms: 1500,
            repeat_count: -1,
            levels: vec![
                PwmLevel {
                    period_ms: 43_200_000,
                    on_duration_ms: 21_600_000,
                },
                PwmLevel {
                    period_ms: 172_800_000,
                    on_duration_ms: 86_400_000,
                },
            ],
        }
    }

    #[test]
    fn send_writes_one_flat_frame() {
        let (mut board, written) = scripted_board();
        let bytes = board.send(&test_command()).unwrap();
        let expected = "[0,2,255,1500,-1,2,43200000,21600000,172800000,86400000]";
        assert_eq!(written.borrow().as_slice(), &[expected.to_string()]);
        assert_eq!(bytes, expected.len() + 1);
    }

    #[test]
    fn rate_limiter_spaces_back_to_back_writes() {
        let (mut board, _written) = scripted_board();
        let delay = Duration::from_millis(30);
        board.set_write_delay(delay);

        let start = Instant::now();
        board.send(&test_command()).unwrap();
        board.send(&test_command()).unwrap();
        board.send(&test_command()).unwrap();
        // burst of three writes: at least two full delays on the wire
        assert!(start.elapsed() >= delay * 2);
    }

    #[test]
    fn try_send_surfaces_write_rate_errors() {
        let (mut board, _written) = scripted_board();
        board.set_write_delay(Duration::from_millis(500));
        board.send(&test_command()).unwrap();
        assert!(matches!(
            board.try_send(&test_command()),
            Err(AssayError::WriteRateExceeded { .. })
        ));
    }

    #[test]
    fn get_power_decodes_one_entry_per_relay() {
        let written = Rc::new(RefCell::new(Vec::new()));
        let mut scripted = ScriptedBoard::new(written.clone());
        scripted.power = vec![0, 255, 0, 0, 128, 0, 0, 0];
        let mut board = RelayBoard::over(scripted);
        board.set_write_delay(Duration::from_millis(0));

        let power = board.get_power().unwrap();
        assert_eq!(power, vec![0, 255, 0, 0, 128, 0, 0, 0]);
        assert_eq!(written.borrow().as_slice(), &["[2]".to_string()]);
    }

    #[test]
    fn get_pwm_status_decodes_level_flags() {
        let written = Rc::new(RefCell::new(Vec::new()));
        let mut scripted = ScriptedBoard::new(written.clone());
        scripted.pwm_status[3] = vec![1, 1, 0];
        let mut board = RelayBoard::over(scripted);
        board.set_write_delay(Duration::from_millis(0));

        let status = board.get_pwm_status().unwrap();
        assert_eq!(status.len(), RELAY_COUNT as usize);
        assert_eq!(status[3], vec![1, 1, 0]);
        assert_eq!(written.borrow().as_slice(), &["[3]".to_string()]);
    }

    #[test]
    fn malformed_responses_are_surfaced_not_panicked() {
        let written = Rc::new(RefCell::new(Vec::new()));
        let mut scripted = ScriptedBoard::new(written);
        scripted.canned_response = Some("[1,2,garbage".to_string());
        let mut board = RelayBoard::over(scripted);
        board.set_write_delay(Duration::from_millis(0));
        assert!(matches!(
            board.get_power(),
            Err(AssayError::MalformedResponse(_))
        ));
    }

    #[test]
    fn short_power_response_is_malformed() {
        let written = Rc::new(RefCell::new(Vec::new()));
        let mut scripted = ScriptedBoard::new(written);
        scripted.power = vec![0, 1, 2]; // wrong arity
        let mut board = RelayBoard::over(scripted);
        board.set_write_delay(Duration::from_millis(0));
        assert!(matches!(
            board.get_power(),
            Err(AssayError::MalformedResponse(_))
        ));
    }

    #[test]
    fn closed_channel_is_fatal_for_queries() {
        let (mut board, _written) = scripted_board();
        // no pending response bytes: the scripted channel reports EOF
        let result = board.read_line();
        assert!(matches!(result, Err(AssayError::TransportClosed)));
    }

    #[test]
    fn drop_sends_stop_all_pulses() {
        let (board, written) = scripted_board();
        drop(board);
        assert_eq!(
            written.borrow().last().map(String::as_str),
            Some("[1]"),
            "dropping the handle must stop all pulses"
        );
    }

    #[test]
    fn close_sends_stop_all_pulses_once() {
        let (board, written) = scripted_board();
        board.close().unwrap();
        let frames = written.borrow();
        assert_eq!(
            frames.iter().filter(|f| f.as_str() == "[1]").count(),
            1,
            "close must stop pulses exactly once, with no second frame from drop"
        );
    }
}
