//! Port configuration
//!
//! A [`PortConfiguration`] is validated once and frozen; changing settings
//! means closing the session and opening a new one. [`PortSettings`] is the
//! partial form read from a TOML file or the command line.

use crate::error::ConfigurationError;
use log::warn;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Baud rates offered by the console
pub const STANDARD_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200];

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default idle gap in milliseconds
pub const DEFAULT_IDLE_GAP_MS: f64 = 1.0;

/// Bounds a single read call on the transport. Unrelated to the idle gap.
pub const TRANSPORT_READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    OneAndHalf,
    Two,
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopBits::One => write!(f, "1"),
            StopBits::OneAndHalf => write!(f, "1.5"),
            StopBits::Two => write!(f, "2"),
        }
    }
}

impl FromStr for StopBits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(StopBits::One),
            "1.5" => Ok(StopBits::OneAndHalf),
            "2" => Ok(StopBits::Two),
            other => Err(format!("invalid stop bits '{}' (expected 1, 1.5 or 2)", other)),
        }
    }
}

impl<'de> Deserialize<'de> for StopBits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Accept both `stop_bits = 2` and `stop_bits = "1.5"`
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) if n == 1.0 => Ok(StopBits::One),
            Raw::Number(n) if n == 1.5 => Ok(StopBits::OneAndHalf),
            Raw::Number(n) if n == 2.0 => Ok(StopBits::Two),
            Raw::Number(n) => Err(serde::de::Error::custom(format!(
                "invalid stop bits {} (expected 1, 1.5 or 2)",
                n
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Parity::None => "none",
            Parity::Even => "even",
            Parity::Odd => "odd",
            Parity::Mark => "mark",
            Parity::Space => "space",
        };
        f.write_str(name)
    }
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "even" | "e" => Ok(Parity::Even),
            "odd" | "o" => Ok(Parity::Odd),
            "mark" | "m" => Ok(Parity::Mark),
            "space" | "s" => Ok(Parity::Space),
            other => Err(format!(
                "invalid parity '{}' (expected none, even, odd, mark or space)",
                other
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Parity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Validated, immutable settings for one serial session
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfiguration {
    port_name: String,
    baud_rate: u32,
    stop_bits: StopBits,
    parity: Parity,
    idle_gap_ms: f64,
    idle_gap: Duration,
}

impl PortConfiguration {
    pub fn new(
        port_name: impl Into<String>,
        baud_rate: u32,
        stop_bits: StopBits,
        parity: Parity,
        idle_gap_ms: f64,
    ) -> Result<Self, ConfigurationError> {
        let port_name = port_name.into();
        if port_name.trim().is_empty() {
            return Err(ConfigurationError::EmptyPortName);
        }
        if baud_rate == 0 {
            return Err(ConfigurationError::InvalidBaudRate(baud_rate));
        }
        if !idle_gap_ms.is_finite() || idle_gap_ms <= 0.0 {
            return Err(ConfigurationError::InvalidIdleGap(idle_gap_ms));
        }
        // Too large for a Duration, or so small it rounds to zero
        let idle_gap = Duration::try_from_secs_f64(idle_gap_ms / 1000.0)
            .ok()
            .filter(|gap| !gap.is_zero())
            .ok_or(ConfigurationError::InvalidIdleGap(idle_gap_ms))?;
        if !STANDARD_BAUD_RATES.contains(&baud_rate) {
            warn!("Non-standard baud rate {} for {}", baud_rate, port_name);
        }

        Ok(Self {
            port_name,
            baud_rate,
            stop_bits,
            parity,
            idle_gap_ms,
            idle_gap,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn stop_bits(&self) -> StopBits {
        self.stop_bits
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn idle_gap_ms(&self) -> f64 {
        self.idle_gap_ms
    }

    /// Inactivity after which pending bytes form a frame
    pub fn idle_gap(&self) -> Duration {
        self.idle_gap
    }
}

impl fmt::Display for PortConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} baud, stop bits {}, parity {}, idle gap {} ms",
            self.port_name, self.baud_rate, self.stop_bits, self.parity, self.idle_gap_ms
        )
    }
}

/// Partially specified settings, merged from a config file and CLI flags
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortSettings {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub stop_bits: Option<StopBits>,
    pub parity: Option<Parity>,
    pub idle_gap_ms: Option<f64>,
}

impl PortSettings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Values present in `overrides` win
    pub fn merge(self, overrides: PortSettings) -> PortSettings {
        PortSettings {
            port: overrides.port.or(self.port),
            baud_rate: overrides.baud_rate.or(self.baud_rate),
            stop_bits: overrides.stop_bits.or(self.stop_bits),
            parity: overrides.parity.or(self.parity),
            idle_gap_ms: overrides.idle_gap_ms.or(self.idle_gap_ms),
        }
    }

    /// Fill in defaults and validate. `detect_port` is only consulted when
    /// no port was given.
    pub fn resolve<F>(self, detect_port: F) -> Result<PortConfiguration, ConfigurationError>
    where
        F: FnOnce() -> Option<String>,
    {
        let port = match self.port {
            Some(port) => port,
            None => detect_port().ok_or(ConfigurationError::NoPortAvailable)?,
        };

        PortConfiguration::new(
            port,
            self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
            self.stop_bits.unwrap_or_default(),
            self.parity.unwrap_or_default(),
            self.idle_gap_ms.unwrap_or(DEFAULT_IDLE_GAP_MS),
        )
    }
}
