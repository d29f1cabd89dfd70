//! Per-client streaming session

use bytes::Bytes;
use futures_util::Stream;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::distributor::{FrameReceiver, FrameRecvError};
use super::multipart;
use super::stats::PipelineCounters;

/// Why a session stopped sending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The stream was shut down or the capture device failed
    StreamClosed,
    /// No frame arrived within the frame timeout
    FrameTimeout,
}

/// One connected viewer.
///
/// Sessions are independent: each pulls frames from its own receiver, so a
/// stalled or vanished client never delays anyone else. Dropping the session
/// (which hyper does when the connection goes away) releases its slot.
#[derive(Debug)]
pub struct ClientSession {
    id: u64,
    peer: Option<SocketAddr>,
    receiver: FrameReceiver,
    frame_timeout: Duration,
    counters: Arc<PipelineCounters>,
    frames_sent: u64,
    bytes_sent: u64,
    opened_at: Instant,
    end: Option<SessionEnd>,
}

impl ClientSession {
    pub(crate) fn new(
        id: u64,
        peer: Option<SocketAddr>,
        receiver: FrameReceiver,
        frame_timeout: Duration,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        info!(
            session = id,
            peer = ?peer,
            active = counters.active_sessions(),
            "Client connected to stream"
        );

        Self {
            id,
            peer,
            receiver,
            frame_timeout,
            counters,
            frames_sent: 0,
            bytes_sent: 0,
            opened_at: Instant::now(),
            end: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Why the session ended, if it has
    pub fn end_reason(&self) -> Option<SessionEnd> {
        self.end
    }

    /// Waits for the next frame and frames it as a multipart body part.
    ///
    /// Returns `None` once the session is over. Frames missed while lagging
    /// are skipped silently.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        if self.end.is_some() {
            return None;
        }

        loop {
            match tokio::time::timeout(self.frame_timeout, self.receiver.recv()).await {
                Ok(Ok(frame)) => {
                    let part = multipart::encode_part(&frame.jpeg);
                    self.frames_sent += 1;
                    self.bytes_sent += part.len() as u64;
                    return Some(part);
                }
                Ok(Err(FrameRecvError::Lagged(skipped))) => {
                    self.counters.record_lag(skipped);
                    debug!(session = self.id, skipped, "Skipping frames to catch up");
                }
                Ok(Err(FrameRecvError::Closed)) => {
                    self.end = Some(SessionEnd::StreamClosed);
                    return None;
                }
                Err(_) => {
                    warn!(
                        session = self.id,
                        timeout_ms = self.frame_timeout.as_millis() as u64,
                        "No frame within timeout, ending session"
                    );
                    self.end = Some(SessionEnd::FrameTimeout);
                    return None;
                }
            }
        }
    }

    /// Turns the session into a response body stream
    pub fn into_body_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures_util::stream::unfold(self, |mut session| async move {
            let part = session.next_part().await?;
            Some((Ok(part), session))
        })
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.counters.close_session();

        let reason = match self.end {
            Some(SessionEnd::StreamClosed) => "stream closed",
            Some(SessionEnd::FrameTimeout) => "frame timeout",
            None => "client disconnected",
        };

        info!(
            session = self.id,
            peer = ?self.peer,
            frames = self.frames_sent,
            bytes = self.bytes_sent,
            duration_secs = self.opened_at.elapsed().as_secs_f64(),
            reason,
            "Client stream session ended"
        );
    }
}
