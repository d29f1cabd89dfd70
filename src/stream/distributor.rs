//! Zero-copy frame fan-out
//!
//! One encoded frame is wrapped in an `Arc` and handed to every subscriber
//! through a `tokio::sync::broadcast` channel. A subscriber that falls more
//! than `capacity` frames behind skips ahead instead of holding the others
//! back.

use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::encoder::EncodedFrame;

/// Statistics for monitoring frame distribution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub subscribers: usize,
    pub buffered: usize,
}

/// Broadcasts encoded frames to every connected client.
///
/// Closing the distributor wakes all receivers with
/// [`FrameRecvError::Closed`], which ends their sessions.
pub struct FrameDistributor {
    tx: broadcast::Sender<Arc<EncodedFrame>>,
    closed: watch::Sender<bool>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl FrameDistributor {
    /// Creates a distributor buffering up to `capacity` frames per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);

        debug!(capacity, "Frame distributor created");

        Self {
            tx,
            closed,
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Publishes a frame to all subscribers.
    ///
    /// Returns the number of subscribers it reached, or the frame back when
    /// nobody is listening. Never blocks on slow subscribers.
    pub fn publish(
        &self,
        frame: EncodedFrame,
    ) -> Result<usize, broadcast::error::SendError<Arc<EncodedFrame>>> {
        let result = self.tx.send(Arc::new(frame));

        match &result {
            Ok(_) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Frame dropped - no subscribers");
            }
        }

        result
    }

    /// Subscribes to frames published from now on
    pub fn subscribe(&self, client_id: impl Into<String>) -> FrameReceiver {
        FrameReceiver {
            rx: self.tx.subscribe(),
            closed: self.closed.subscribe(),
            frames_lagged: 0,
            client_id: client_id.into(),
        }
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Stops distribution. Returns `true` for the call that closed it.
    pub fn close(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            info!(
                subscribers = self.subscriber_count(),
                "Frame distribution closed"
            );
        }
        !was_closed
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the distributor is closed
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Get statistics about frame distribution
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
            buffered: self.tx.len(),
        }
    }
}

/// A single client's view of the frame stream
#[derive(Debug)]
pub struct FrameReceiver {
    rx: broadcast::Receiver<Arc<EncodedFrame>>,
    closed: watch::Receiver<bool>,
    frames_lagged: u64,
    client_id: String,
}

impl FrameReceiver {
    /// Receive next frame
    ///
    /// # Returns
    /// - Ok(frame) - Next frame available
    /// - Err(Lagged(n)) - Client fell n frames behind; the next call resumes
    ///   at the oldest frame still buffered
    /// - Err(Closed) - Distribution stopped, no more frames
    pub async fn recv(&mut self) -> Result<Arc<EncodedFrame>, FrameRecvError> {
        if *self.closed.borrow_and_update() {
            return Err(FrameRecvError::Closed);
        }

        tokio::select! {
            biased;

            _ = self.closed.changed() => Err(FrameRecvError::Closed),

            result = self.rx.recv() => match result {
                Ok(frame) => Ok(frame),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.frames_lagged += n;
                    debug!(
                        client = %self.client_id,
                        skipped = n,
                        total_lagged = self.frames_lagged,
                        "Client lagged behind"
                    );
                    Err(FrameRecvError::Lagged(n))
                }
                Err(broadcast::error::RecvError::Closed) => Err(FrameRecvError::Closed),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRecvError {
    Lagged(u64),
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::time::{sleep, timeout, Duration};

    fn frame(sequence: u64) -> EncodedFrame {
        EncodedFrame {
            sequence,
            width: 1,
            height: 1,
            jpeg: Bytes::from(format!("frame {}", sequence)),
        }
    }

    #[tokio::test]
    async fn test_basic_distribution() {
        let distributor = FrameDistributor::new(10);
        let mut rx1 = distributor.subscribe("client1");
        let mut rx2 = distributor.subscribe("client2");

        let result = distributor.publish(frame(1));
        assert_eq!(result.unwrap(), 2);

        let f1 = rx1.recv().await.unwrap();
        let f2 = rx2.recv().await.unwrap();

        assert_eq!(f1.sequence, 1);
        assert_eq!(f1.jpeg, Bytes::from("frame 1"));

        // Both receivers share one allocation
        assert!(Arc::ptr_eq(&f1, &f2));
        assert_eq!(distributor.stats().frames_sent, 1);
    }

    #[tokio::test]
    async fn test_slow_client_lag() {
        let distributor = FrameDistributor::new(4);
        let mut rx_fast = distributor.subscribe("fast");
        let mut rx_slow = distributor.subscribe("slow");

        let fast_task = tokio::spawn(async move {
            let mut received = 0;
            for _ in 0..10 {
                if rx_fast.recv().await.is_ok() {
                    received += 1;
                }
            }
            received
        });

        for i in 0..10 {
            distributor.publish(frame(i)).ok();
            sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(fast_task.await.unwrap(), 10);

        match rx_slow.recv().await {
            Err(FrameRecvError::Lagged(n)) => assert_eq!(n, 6),
            other => panic!("expected lag, got {:?}", other.map(|f| f.sequence)),
        }

        // After lagging the slow client resumes with the oldest buffered frame
        assert_eq!(rx_slow.recv().await.unwrap().sequence, 6);
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let distributor = FrameDistributor::new(10);

        assert!(distributor.publish(frame(1)).is_err());

        let stats = distributor.stats();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_sent, 0);
    }

    #[tokio::test]
    async fn test_subscriber_count_tracks_drops() {
        let distributor = FrameDistributor::new(4);
        let rx1 = distributor.subscribe("a");
        let rx2 = distributor.subscribe("b");
        assert_eq!(distributor.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(distributor.subscriber_count(), 1);
        drop(rx2);
        assert_eq!(distributor.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_receivers() {
        let distributor = Arc::new(FrameDistributor::new(4));
        let mut rx = distributor.subscribe("waiting");

        let waiter = tokio::spawn(async move { rx.recv().await });
        sleep(Duration::from_millis(20)).await;

        assert!(distributor.close());
        assert!(!distributor.close());
        assert!(distributor.is_closed());

        let result = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("receiver not woken")
            .unwrap();
        assert_eq!(result.unwrap_err(), FrameRecvError::Closed);
    }

    #[tokio::test]
    async fn test_receiver_after_close() {
        let distributor = FrameDistributor::new(4);
        distributor.close();

        let mut rx = distributor.subscribe("late");
        assert_eq!(rx.recv().await.unwrap_err(), FrameRecvError::Closed);

        timeout(Duration::from_secs(1), distributor.closed())
            .await
            .expect("closed() did not resolve");
    }
}
