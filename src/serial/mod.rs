//! Serial capture: the port channel and the idle-gap frame reader
//!
//! This module provides:
//! - Opening a configured port and polling it without blocking
//! - Splitting the received byte stream into frames on inactivity
//! - Rendering frames as timestamped hex

pub mod frame;
pub mod port;
pub mod segmenter;

pub use port::SerialChannel;
pub use segmenter::{FrameSegmenter, SegmenterExit, SessionEvent, SystemClock};
