//! Console output for a capture session
//!
//! Frames are printed verbatim; status lines and faults are colored.

use crate::config::PortConfiguration;
use crate::serial::SessionEvent;
use chrono::{DateTime, Local};
use colored::Colorize;
use std::io::{self, Write};

pub const CONNECTED_MESSAGE: &str = "Settings are valid and connection established.";
pub const CLOSED_MESSAGE: &str = "Disconnected from COM port.";
pub const UNPLUGGED_MESSAGE: &str = "COM port has been physically disconnected.";

/// What the console should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue,
    /// The device is gone; tear the session down
    Teardown,
}

/// Renders session events to a writer (stdout in the binary)
pub struct Console<W: Write> {
    out: W,
    frames: usize,
    bytes: usize,
    started: DateTime<Local>,
}

impl Console<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            frames: 0,
            bytes: 0,
            started: Local::now(),
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn header(&mut self, config: &PortConfiguration) -> io::Result<()> {
        self.started = Local::now();
        writeln!(self.out, "{}", "=".repeat(70).dimmed())?;
        writeln!(self.out, "{}: {}", "Port".cyan(), config.port_name().white())?;
        writeln!(self.out, "{}: {}", "Baud".cyan(), config.baud_rate())?;
        writeln!(self.out, "{}: {}", "Stop bits".cyan(), config.stop_bits())?;
        writeln!(self.out, "{}: {}", "Parity".cyan(), config.parity())?;
        writeln!(self.out, "{}: {} ms", "Idle gap".cyan(), config.idle_gap_ms())?;
        writeln!(
            self.out,
            "{}: {}",
            "Started".cyan(),
            self.started.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(self.out, "{}", "=".repeat(70).dimmed())?;
        writeln!(self.out, "{}", CONNECTED_MESSAGE.green())?;
        self.out.flush()
    }

    pub fn status(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{}", message.yellow())?;
        self.out.flush()
    }

    pub fn error(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{}", message.red().bold())?;
        self.out.flush()
    }

    pub fn render(&mut self, event: &SessionEvent) -> io::Result<Next> {
        match event {
            SessionEvent::Frame(frame) => {
                self.frames += 1;
                self.bytes += frame.payload.len();
                writeln!(self.out, "{}", frame)?;
                self.out.flush()?;
                Ok(Next::Continue)
            }
            SessionEvent::Fault(text) => {
                self.error(text)?;
                Ok(Next::Continue)
            }
            SessionEvent::Disconnected => {
                self.status(UNPLUGGED_MESSAGE)?;
                Ok(Next::Teardown)
            }
        }
    }

    pub fn summary(&mut self) -> io::Result<()> {
        let duration = Local::now().signed_duration_since(self.started);
        writeln!(self.out, "\n{}", "=".repeat(70).dimmed())?;
        writeln!(self.out, "{}", "--- Session Summary ---".cyan().bold())?;
        writeln!(self.out, "Frames: {}", self.frames())?;
        writeln!(self.out, "Bytes: {}", self.bytes)?;
        writeln!(
            self.out,
            "Duration: {}.{:03}s",
            duration.num_seconds(),
            duration.num_milliseconds().rem_euclid(1000)
        )?;
        writeln!(self.out, "{}", "=".repeat(70).dimmed())?;
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
