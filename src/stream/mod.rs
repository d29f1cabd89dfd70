//! Fan-out of one camera to many HTTP viewers
//!
//! [`Multiplexer`] owns the frame distributor and the pipeline counters.
//! The capture pump publishes into it and every `/stream.mjpg` request
//! opens a [`ClientSession`] against it.

mod distributor;
pub mod multipart;
mod pump;
mod session;
mod stats;

pub use distributor::{FrameDistributor, FrameReceiver, FrameRecvError, FrameStats};
pub use pump::{CapturePump, PumpExit};
pub use session::{ClientSession, SessionEnd};
pub use stats::{PipelineCounters, StreamStats};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::capture::CaptureSource;
use crate::config::StreamConfig;
use crate::encoder::FrameEncoder;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream is not running")]
    Stopped,

    #[error("viewer limit of {max} reached")]
    TooManyClients { max: usize },
}

pub struct Multiplexer {
    distributor: Arc<FrameDistributor>,
    counters: Arc<PipelineCounters>,
    frame_timeout: Duration,
    max_clients: usize,
    max_capture_failures: u32,
    stats_interval_frames: u64,
}

impl Multiplexer {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            distributor: Arc::new(FrameDistributor::new(config.channel_capacity)),
            counters: Arc::new(PipelineCounters::default()),
            frame_timeout: config.frame_timeout(),
            max_clients: config.max_clients,
            max_capture_failures: config.max_capture_failures,
            stats_interval_frames: config.stats_interval_frames,
        }
    }

    /// Starts the capture pump feeding this multiplexer
    pub fn start(&self, source: Arc<CaptureSource>, encoder: FrameEncoder) -> JoinHandle<PumpExit> {
        CapturePump::new(
            source,
            encoder,
            Arc::clone(&self.distributor),
            Arc::clone(&self.counters),
        )
        .with_max_capture_failures(self.max_capture_failures)
        .with_stats_interval(self.stats_interval_frames)
        .spawn()
    }

    /// Registers a new viewer.
    ///
    /// The session sees only frames published after this call.
    pub fn open_session(&self, peer: Option<SocketAddr>) -> Result<ClientSession, StreamError> {
        if self.distributor.is_closed() {
            return Err(StreamError::Stopped);
        }

        let id = self
            .counters
            .try_open_session(self.max_clients)
            .ok_or_else(|| {
                warn!(peer = ?peer, max = self.max_clients, "Rejecting viewer, limit reached");
                StreamError::TooManyClients {
                    max: self.max_clients,
                }
            })?;

        let receiver = self.distributor.subscribe(format!("session-{}", id));

        Ok(ClientSession::new(
            id,
            peer,
            receiver,
            self.frame_timeout,
            Arc::clone(&self.counters),
        ))
    }

    /// Stops distribution; every open session ends after its current part
    pub fn shutdown(&self) -> bool {
        self.distributor.close()
    }

    pub fn is_running(&self) -> bool {
        !self.distributor.is_closed()
    }

    /// Resolves once the stream stops, by shutdown or capture failure
    pub async fn stopped(&self) {
        self.distributor.closed().await
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    pub fn distribution_stats(&self) -> FrameStats {
        self.distributor.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_clients: usize) -> StreamConfig {
        StreamConfig {
            max_clients,
            ..StreamConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_session_counts() {
        let mux = Multiplexer::new(&config(0));

        let a = mux.open_session(None).unwrap();
        let b = mux.open_session(None).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(mux.stats().active_sessions, 2);
        assert_eq!(mux.distribution_stats().subscribers, 2);

        drop(a);
        assert_eq!(mux.stats().active_sessions, 1);
        assert_eq!(mux.stats().total_sessions, 2);
    }

    #[tokio::test]
    async fn test_viewer_limit() {
        let mux = Multiplexer::new(&config(1));

        let first = mux.open_session(None).unwrap();
        assert_eq!(
            mux.open_session(None).unwrap_err(),
            StreamError::TooManyClients { max: 1 }
        );

        drop(first);
        assert!(mux.open_session(None).is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_sessions() {
        let mux = Multiplexer::new(&config(0));
        assert!(mux.is_running());

        assert!(mux.shutdown());
        assert!(!mux.shutdown());
        assert!(!mux.is_running());

        assert_eq!(mux.open_session(None).unwrap_err(), StreamError::Stopped);
        mux.stopped().await;
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_sessions() {
        let mux = Multiplexer::new(&config(0));
        let mut session = mux.open_session(None).unwrap();

        mux.shutdown();
        assert!(session.next_part().await.is_none());
        assert_eq!(session.end_reason(), Some(SessionEnd::StreamClosed));
    }
}
