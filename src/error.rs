//! Error types for configuration, connection and run-time transport failures

use std::path::PathBuf;
use thiserror::Error;

/// Rejected before any transport call is attempted
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("port name must not be empty")]
    EmptyPortName,

    #[error("baud rate must be positive, got {0}")]
    InvalidBaudRate(u32),

    #[error("idle gap must be a positive number of milliseconds, got {0}")]
    InvalidIdleGap(f64),

    #[error("no serial port given and none could be detected")]
    NoPortAvailable,

    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Open-time failure; the session never starts
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not open port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("could not open port {port}: {setting} is not supported by the serial driver")]
    Unsupported { port: String, setting: String },

    #[error("could not start reader thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// The device went away mid-session (unplugged, I/O error)
#[derive(Debug, Clone, Error)]
#[error("transport fault on {port}: {reason}")]
pub struct TransportFault {
    pub port: String,
    pub reason: String,
}

/// Outcome of a failed channel query
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Closed by its owner; not an error path for the reader
    #[error("serial channel is closed")]
    Closed,

    #[error(transparent)]
    Fault(#[from] TransportFault),
}
