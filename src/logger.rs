//! Change-triggered, run-length-compressed status logging.
//!
//! The poll loop produces one sample per recorded camera frame; writing all
//! of them floods the log and writing only changes loses the last frame
//! before each transition. [`RunLengthLogger`] keeps a single pending slot
//! so the emitted trace carries both the entry and the exit frame of every
//! maximal run of identical samples, and nothing else.

use crate::error::Result;
use crate::types::LogRow;
use chrono::{DateTime, Utc};
use std::io::Write;

/// One sample due to be written, with the frame and timestamp at which it
/// was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted<S> {
    pub frame: i64,
    pub timestamp: DateTime<Utc>,
    pub sample: S,
}

#[derive(Debug, Clone)]
struct Slot<S> {
    sample: S,
    frame: i64,
    timestamp: DateTime<Utc>,
    written: bool,
}

/// Run-length compressor over a stream of per-frame samples.
///
/// `observe` is fed every recorded frame in order and returns the rows that
/// must be written for that frame: nothing while a run continues, and on a
/// transition the still-unwritten final frame of the old run followed by
/// the first frame of the new one.
#[derive(Debug, Default)]
pub struct RunLengthLogger<S> {
    slot: Option<Slot<S>>,
}

impl<S: Clone + PartialEq> RunLengthLogger<S> {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Feed one recorded frame; returns 0, 1, or 2 rows to emit.
    ///
    /// The pending slot advances on every call, written or not. That is
    /// what keeps the pre-transition frame available: when a change
    /// arrives, the slot still holds the previous frame's sample, and it is
    /// flushed first unless it already went out as a post-transition row.
    pub fn observe(&mut self, frame: i64, timestamp: DateTime<Utc>, sample: S) -> Vec<Emitted<S>> {
        let mut emitted = Vec::new();
        match self.slot.take() {
            None => {
                self.slot = Some(Slot {
                    sample,
                    frame,
                    timestamp,
                    written: false,
                });
            }
            Some(previous) if previous.sample == sample => {
                self.slot = Some(Slot {
                    sample,
                    frame,
                    timestamp,
                    written: false,
                });
            }
            Some(previous) => {
                if !previous.written {
                    emitted.push(Emitted {
                        frame: previous.frame,
                        timestamp: previous.timestamp,
                        sample: previous.sample,
                    });
                }
                emitted.push(Emitted {
                    frame,
                    timestamp,
                    sample: sample.clone(),
                });
                self.slot = Some(Slot {
                    sample,
                    frame,
                    timestamp,
                    written: true,
                });
            }
        }
        emitted
    }
}

/// Append-only sink for emitted log rows.
///
/// The logger decides which rows exist; the sink decides how they are
/// stored.
pub trait LogSink {
    fn write_row(&mut self, row: &LogRow) -> Result<()>;
}

/// CSV-style sink: a header line, then one comma-separated row per record.
pub struct CsvSink<W: Write> {
    writer: W,
    header_written: bool,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }
}

impl<W: Write> LogSink for CsvSink<W> {
    fn write_row(&mut self, row: &LogRow) -> Result<()> {
        if !self.header_written {
            writeln!(
                self.writer,
                "video_frame,timestamp,phase,white_light_power,red_light_pwm_status"
            )?;
            self.header_written = true;
        }
        let status = row
            .red_light_pwm_status
            .iter()
            .map(|flag| flag.to_string())
            .collect::<Vec<_>>()
            .join("|");
        writeln!(
            self.writer,
            "{},{},{},{},{}",
            row.video_frame,
            row.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            row.phase_label,
            row.white_light_power,
            status
        )?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Sink that keeps rows in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<LogRow>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogSink for MemorySink {
    fn write_row(&mut self, row: &LogRow) -> Result<()> {
        self.rows.push(row.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(frame: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + frame, 0).single().unwrap()
    }

    fn feed(samples: &[&str]) -> Vec<(i64, String)> {
        let mut logger = RunLengthLogger::new();
        let mut out = Vec::new();
        for (frame, sample) in samples.iter().enumerate() {
            let frame = frame as i64;
            for emitted in logger.observe(frame, at(frame), sample.to_string()) {
                out.push((emitted.frame, emitted.sample));
            }
        }
        out
    }

    #[test]
    fn entry_and_exit_of_every_run_are_emitted() {
        // changes at frame 3 (A->B) and frame 5 (B->C); frame 4 goes out as
        // the exit frame of the B run even though nothing changed there
        let rows = feed(&["A", "A", "A", "B", "B", "C"]);
        assert_eq!(
            rows,
            vec![
                (2, "A".to_string()),
                (3, "B".to_string()),
                (4, "B".to_string()),
                (5, "C".to_string()),
            ]
        );
    }

    #[test]
    fn unchanged_stream_emits_nothing() {
        assert!(feed(&["A", "A", "A", "A"]).is_empty());
    }

    #[test]
    fn every_frame_changing_emits_every_frame_once() {
        let rows = feed(&["A", "B", "C"]);
        assert_eq!(
            rows,
            vec![
                (0, "A".to_string()),
                (1, "B".to_string()),
                (2, "C".to_string()),
            ]
        );
    }

    #[test]
    fn no_consecutive_duplicate_rows() {
        let rows = feed(&["A", "A", "B", "B", "B", "A", "A", "B"]);
        for pair in rows.windows(2) {
            assert!(
                pair[0] != pair[1],
                "duplicate consecutive rows: {:?}",
                pair
            );
        }
        // both boundaries of each interior run are present
        assert_eq!(
            rows,
            vec![
                (1, "A".to_string()),
                (2, "B".to_string()),
                (4, "B".to_string()),
                (5, "A".to_string()),
                (6, "A".to_string()),
                (7, "B".to_string()),
            ]
        );
    }

    #[test]
    fn csv_sink_writes_header_once() {
        let mut buffer = Vec::new();
        {
            let mut sink = CsvSink::new(&mut buffer);
            for frame in 0..2 {
                sink.write_row(&LogRow {
                    video_frame: frame,
                    timestamp: at(frame),
                    phase_label: "entrainment".to_string(),
                    white_light_power: 255,
                    red_light_pwm_status: vec![1, 0, 0],
                })
                .unwrap();
            }
        }
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("video_frame,"));
        assert!(lines[1].contains(",entrainment,255,1|0|0"));
    }
}
