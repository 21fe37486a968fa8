//! Idle-gap framing
//!
//! The reader sleeps half an idle gap, then asks the channel how many bytes
//! are waiting. Bytes are appended to the pending buffer and restart the idle
//! clock. Once the buffer has been quiet for strictly longer than the idle gap
//! the next poll flushes it as one [`Frame`], before appending anything that
//! poll read. A frame is therefore emitted between one and one and a half idle
//! gaps after its last byte, and the pending buffer is dropped unflushed if the
//! transport faults.

use crate::error::ChannelError;
use crate::serial::frame::Frame;
use crate::serial::port::SerialChannel;
use log::{debug, info, log_enabled, trace, warn, Level};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Events delivered from the reader to the console
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Frame(Frame),
    /// Error text shown inline with the frames
    Fault(String),
    /// Always the last event of a session
    Disconnected,
}

/// Text shown when the device disappears
pub const DISCONNECT_MESSAGE: &str = "Error: COM port disconnected.";

/// Why the read loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterExit {
    /// The channel was closed by its owner
    Closed,
    /// The transport faulted
    Disconnected,
    /// Nobody is listening for events anymore
    ConsumerGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Accumulating,
}

/// Source of time for the read loop
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Bytes waiting for an idle gap
#[derive(Debug, Default)]
pub struct FrameBuffer {
    accumulated: Vec<u8>,
    last_receipt: Option<Instant>,
}

impl FrameBuffer {
    pub fn push(&mut self, bytes: &[u8], now: Instant) {
        self.accumulated.extend_from_slice(bytes);
        self.last_receipt = Some(now);
    }

    pub fn is_empty(&self) -> bool {
        self.last_receipt.is_none()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.accumulated
    }

    pub fn last_receipt(&self) -> Option<Instant> {
        self.last_receipt
    }

    /// Hand out the pending bytes and reset
    pub fn take(&mut self) -> Vec<u8> {
        self.last_receipt = None;
        std::mem::take(&mut self.accumulated)
    }
}

/// Turns a byte stream into frames separated by inactivity
pub struct FrameSegmenter {
    idle_gap: Duration,
    started: Instant,
    buffer: FrameBuffer,
}

impl FrameSegmenter {
    /// `started` is the session origin used for every frame's timestamp
    pub fn new(idle_gap: Duration, started: Instant) -> Self {
        Self {
            idle_gap,
            started,
            buffer: FrameBuffer::default(),
        }
    }

    pub fn idle_gap(&self) -> Duration {
        self.idle_gap
    }

    pub fn poll_interval(&self) -> Duration {
        self.idle_gap / 2
    }

    pub fn state(&self) -> SegmenterState {
        if self.buffer.is_empty() {
            SegmenterState::Idle
        } else {
            SegmenterState::Accumulating
        }
    }

    pub fn pending(&self) -> &[u8] {
        self.buffer.bytes()
    }

    /// Append a successful read. Empty reads leave the idle clock alone.
    pub fn accumulate(&mut self, bytes: &[u8], now: Instant) {
        if bytes.is_empty() {
            return;
        }
        self.buffer.push(bytes, now);
    }

    /// Flush when the buffer has been quiet for strictly longer than the gap
    pub fn flush_if_idle(&mut self, now: Instant) -> Option<Frame> {
        let last = self.buffer.last_receipt()?;
        if now.saturating_duration_since(last) <= self.idle_gap {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.started);
        Some(Frame::new(elapsed, self.buffer.take()))
    }

    /// Drop pending bytes without emitting them
    pub fn discard(&mut self) -> usize {
        self.buffer.take().len()
    }

    /// Poll `channel` until it closes, faults, or the receiver goes away
    pub fn run<C: Clock>(
        &mut self,
        channel: &SerialChannel,
        clock: &mut C,
        events: &UnboundedSender<SessionEvent>,
    ) -> SegmenterExit {
        let interval = self.poll_interval();
        info!(
            "Reading {} (idle gap {:?}, poll every {:?})",
            channel.port_name(),
            self.idle_gap(),
            interval
        );

        while channel.is_open() {
            clock.sleep(interval);

            let read = match channel.bytes_available() {
                Ok(0) => Ok(Vec::new()),
                Ok(_) => channel.read_available(),
                Err(e) => Err(e),
            };

            match read {
                Ok(bytes) => {
                    let now = clock.now();
                    // A burst that went quiet for longer than the gap closes
                    // before the next one starts, even if that one is already waiting
                    if let Some(frame) = self.flush_if_idle(now) {
                        log_frame(&frame);
                        if events.send(SessionEvent::Frame(frame)).is_err() {
                            debug!("Event receiver dropped, stopping reader");
                            return SegmenterExit::ConsumerGone;
                        }
                    }
                    if !bytes.is_empty() {
                        trace!("Read {} bytes from {}", bytes.len(), channel.port_name());
                        self.accumulate(&bytes, now);
                    }
                }
                Err(ChannelError::Closed) => break,
                Err(ChannelError::Fault(fault)) => {
                    let dropped = self.discard();
                    warn!("{} ({} pending bytes dropped)", fault, dropped);
                    let _ = events.send(SessionEvent::Fault(DISCONNECT_MESSAGE.to_string()));
                    let _ = events.send(SessionEvent::Disconnected);
                    return SegmenterExit::Disconnected;
                }
            }
        }

        if self.state() == SegmenterState::Accumulating {
            debug!(
                "Dropping {} pending bytes from {} on close",
                self.pending().len(),
                channel.port_name()
            );
        }
        debug!("Reader for {} stopped: channel closed", channel.port_name());
        SegmenterExit::Closed
    }
}

fn log_frame(frame: &Frame) {
    debug!(
        "Frame at {:.4}s, {} bytes",
        frame.elapsed_seconds(),
        frame.payload.len()
    );
    if log_enabled!(Level::Trace) {
        for line in hexdump::hexdump_iter(&frame.payload) {
            trace!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port::Transport;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    const GAP: Duration = Duration::from_millis(100);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_bytes_within_gap_form_one_frame() {
        let t0 = Instant::now();
        let mut seg = FrameSegmenter::new(GAP, t0);

        seg.accumulate(&[0x01, 0x02], t0);
        assert_eq!(seg.state(), SegmenterState::Accumulating);
        assert_eq!(seg.flush_if_idle(t0 + ms(50)), None);

        seg.accumulate(&[0x03], t0 + ms(50));
        assert_eq!(seg.flush_if_idle(t0 + ms(100)), None);
        assert_eq!(seg.flush_if_idle(t0 + ms(150)), None);

        let frame = seg.flush_if_idle(t0 + ms(200)).expect("frame after gap");
        assert_eq!(frame.payload_hex(), "01-02-03");
        assert_eq!(frame.elapsed, ms(200));
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert_eq!(seg.flush_if_idle(t0 + ms(400)), None);
    }

    #[test]
    fn test_gap_equal_to_threshold_does_not_flush() {
        let t0 = Instant::now();
        let mut seg = FrameSegmenter::new(GAP, t0);

        seg.accumulate(&[0xaa], t0);
        assert_eq!(seg.flush_if_idle(t0 + GAP), None);
        assert!(seg.flush_if_idle(t0 + GAP + seg.poll_interval()).is_some());
    }

    #[test]
    fn test_empty_read_keeps_idle_state() {
        let t0 = Instant::now();
        let mut seg = FrameSegmenter::new(GAP, t0);

        seg.accumulate(&[], t0);
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert_eq!(seg.flush_if_idle(t0 + ms(500)), None);
    }

    #[test]
    fn test_discard_drops_pending_bytes() {
        let t0 = Instant::now();
        let mut seg = FrameSegmenter::new(GAP, t0);

        seg.accumulate(&[1, 2, 3, 4], t0);
        assert_eq!(seg.pending(), &[1, 2, 3, 4]);
        assert_eq!(seg.discard(), 4);
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert_eq!(seg.flush_if_idle(t0 + ms(500)), None);
    }

    /// Virtual time shared between the clock and the transport
    #[derive(Clone)]
    struct ManualClock {
        origin: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        fn elapsed(&self) -> Duration {
            *self.offset.lock().unwrap()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn sleep(&mut self, duration: Duration) {
            *self.offset.lock().unwrap() += duration;
        }
    }

    enum Arrival {
        Bytes(Vec<u8>),
        Fault,
    }

    /// Delivers each arrival once virtual time has reached it
    struct TimedTransport {
        clock: ManualClock,
        script: Vec<(Duration, Arrival)>,
        buffered: Vec<u8>,
        faulted: bool,
    }

    impl TimedTransport {
        fn pump(&mut self) {
            let now = self.clock.elapsed();
            while self.script.first().map_or(false, |(at, _)| *at <= now) {
                match self.script.remove(0).1 {
                    Arrival::Bytes(bytes) => self.buffered.extend(bytes),
                    Arrival::Fault => self.faulted = true,
                }
            }
        }
    }

    impl Transport for TimedTransport {
        fn bytes_available(&mut self) -> io::Result<usize> {
            self.pump();
            if self.faulted {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "device removed"));
            }
            Ok(self.buffered.len())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.buffered.len().min(buf.len());
            buf[..n].copy_from_slice(&self.buffered[..n]);
            self.buffered.drain(..n);
            Ok(n)
        }
    }

    /// Run the loop against a script; stops once virtual time passes `until`
    fn run_script(script: Vec<(Duration, Arrival)>, until: Duration) -> (Vec<SessionEvent>, SegmenterExit) {
        let clock = ManualClock::new();
        let transport = TimedTransport {
            clock: clock.clone(),
            script,
            buffered: Vec::new(),
            faulted: false,
        };
        let channel = SerialChannel::from_transport("/dev/ttyTEST", Box::new(transport));

        // Closes the channel when virtual time runs out
        struct StopAt<'a> {
            inner: ManualClock,
            until: Duration,
            channel: &'a SerialChannel,
        }
        impl Clock for StopAt<'_> {
            fn now(&self) -> Instant {
                self.inner.now()
            }
            fn sleep(&mut self, duration: Duration) {
                self.inner.sleep(duration);
                if self.inner.elapsed() > self.until {
                    self.channel.close();
                }
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut seg = FrameSegmenter::new(GAP, clock.now());
        let mut stop = StopAt {
            inner: clock,
            until,
            channel: &channel,
        };
        let exit = seg.run(&channel, &mut stop, &tx);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (events, exit)
    }

    fn frames(events: &[SessionEvent]) -> Vec<(Duration, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Frame(f) => Some((f.elapsed, f.payload_hex())),
                _ => None,
            })
            .collect()
    }

    // Polls happen every 50ms; arrivals below line up with them.

    #[test]
    fn test_loop_joins_close_bursts() {
        let (events, exit) = run_script(
            vec![
                (ms(50), Arrival::Bytes(vec![0x01, 0x02])),
                (ms(100), Arrival::Bytes(vec![0x03])),
            ],
            ms(1000),
        );

        assert_eq!(exit, SegmenterExit::Closed);
        let frames = frames(&events);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, "01-02-03");
        // Last byte at 100ms; 200ms is exactly one gap later and does not flush
        assert_eq!(frames[0].0, ms(250));
    }

    #[test]
    fn test_loop_splits_on_long_gap() {
        let (events, exit) = run_script(
            vec![
                (ms(50), Arrival::Bytes(vec![0xaa])),
                (ms(200), Arrival::Bytes(vec![0xbb])),
            ],
            ms(1000),
        );

        assert_eq!(exit, SegmenterExit::Closed);
        let frames = frames(&events);
        assert_eq!(frames, vec![(ms(200), "aa".to_string()), (ms(350), "bb".to_string())]);
    }

    #[test]
    fn test_fault_discards_partial_frame() {
        let (events, exit) = run_script(
            vec![
                (ms(50), Arrival::Bytes(vec![0x10])),
                (ms(300), Arrival::Bytes(vec![0x20, 0x21])),
                (ms(350), Arrival::Fault),
            ],
            ms(1000),
        );

        assert_eq!(exit, SegmenterExit::Disconnected);
        assert_eq!(
            events,
            vec![
                SessionEvent::Frame(Frame::new(ms(200), vec![0x10])),
                SessionEvent::Fault(DISCONNECT_MESSAGE.to_string()),
                SessionEvent::Disconnected,
            ]
        );
    }

    #[test]
    fn test_closed_channel_exits_without_events() {
        let (events, exit) = run_script(vec![(ms(0), Arrival::Bytes(vec![0x01]))], ms(60));

        assert_eq!(exit, SegmenterExit::Closed);
        assert!(events.is_empty());
    }

    #[test]
    fn test_dropped_receiver_stops_loop() {
        let clock = ManualClock::new();
        let transport = TimedTransport {
            clock: clock.clone(),
            script: vec![(ms(0), Arrival::Bytes(vec![0x01]))],
            buffered: Vec::new(),
            faulted: false,
        };
        let channel = SerialChannel::from_transport("/dev/ttyTEST", Box::new(transport));
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let mut seg = FrameSegmenter::new(GAP, clock.now());
        let mut clock = clock;
        assert_eq!(seg.run(&channel, &mut clock, &tx), SegmenterExit::ConsumerGone);
    }
}
