//! One capture session: an open channel, its reader thread and the event queue

use crate::config::PortConfiguration;
use crate::error::ConnectionError;
use crate::serial::{FrameSegmenter, SegmenterExit, SerialChannel, SessionEvent, SystemClock};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

pub struct Session {
    config: PortConfiguration,
    channel: Arc<SerialChannel>,
    worker: Option<JoinHandle<SegmenterExit>>,
    events: UnboundedReceiver<SessionEvent>,
}

impl Session {
    /// Open the port and start reading it
    pub fn open(config: PortConfiguration) -> Result<Self, ConnectionError> {
        let channel = SerialChannel::open(&config)?;
        Self::attach(config, channel)
    }

    /// Start a reader on a channel that is already open
    pub fn attach(config: PortConfiguration, channel: SerialChannel) -> Result<Self, ConnectionError> {
        let channel = Arc::new(channel);
        let (tx, events) = mpsc::unbounded_channel();

        let reader_channel = Arc::clone(&channel);
        let idle_gap = config.idle_gap();
        let worker = thread::Builder::new()
            .name("uart-segmenter".to_string())
            .spawn(move || {
                let mut segmenter = FrameSegmenter::new(idle_gap, Instant::now());
                let exit = segmenter.run(&reader_channel, &mut SystemClock, &tx);
                debug!("Reader exited: {:?}", exit);
                exit
            })
            .map_err(|e| {
                channel.close();
                ConnectionError::Spawn(e)
            })?;

        info!("Session started: {}", config);
        Ok(Self {
            config,
            channel,
            worker: Some(worker),
            events,
        })
    }

    pub fn config(&self) -> &PortConfiguration {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Wait for the next event; `None` once the reader has exited and the queue is drained
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Take a queued event without waiting
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Close the port. The reader notices within half an idle gap.
    pub fn close(&self) {
        self.channel.close();
    }

    /// Close and wait for the reader thread to exit
    pub fn finish(mut self) -> SegmenterExit {
        self.close();
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(exit)) => exit,
            Some(Err(_)) => {
                warn!("Reader thread for {} panicked", self.config.port_name());
                SegmenterExit::Closed
            }
            None => SegmenterExit::Closed,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.channel.close();
    }
}
