//! Streaming statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of the capture and fan-out counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamStats {
    /// Raw frames read from the device
    pub frames_captured: u64,

    /// Encoded frames handed to at least one viewer
    pub frames_published: u64,

    /// JPEG bytes published
    pub bytes_published: u64,

    /// Frames skipped because they failed to encode
    pub encode_failures: u64,

    /// Failed device reads
    pub capture_failures: u64,

    /// Frames slow viewers skipped to catch up
    pub frames_lagged: u64,

    /// Viewers currently connected
    pub active_sessions: usize,

    /// Viewers served since startup
    pub total_sessions: u64,
}

impl StreamStats {
    /// Calculates frame rate based on delta
    pub fn calculate_fps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let frames_delta = self.frames_published.saturating_sub(previous.frames_published);
        frames_delta as f64 / elapsed_secs
    }

    /// Calculates JPEG bitrate in kbps based on delta
    pub fn calculate_bitrate_kbps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let bytes_delta = self.bytes_published.saturating_sub(previous.bytes_published);
        (bytes_delta as f64 * 8.0) / elapsed_secs / 1000.0
    }

    /// Share of captured frames that failed to encode
    pub fn encode_failure_rate(&self) -> f64 {
        if self.frames_captured == 0 {
            return 0.0;
        }

        self.encode_failures as f64 / self.frames_captured as f64
    }
}

/// Live counters shared by the pump, sessions and the HTTP layer
#[derive(Debug, Default)]
pub struct PipelineCounters {
    frames_captured: AtomicU64,
    frames_published: AtomicU64,
    bytes_published: AtomicU64,
    encode_failures: AtomicU64,
    capture_failures: AtomicU64,
    frames_lagged: AtomicU64,
    sessions_active: AtomicUsize,
    sessions_total: AtomicU64,
}

impl PipelineCounters {
    pub fn record_capture(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self, jpeg_len: usize) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published
            .fetch_add(jpeg_len as u64, Ordering::Relaxed);
    }

    pub fn record_lag(&self, skipped: u64) {
        self.frames_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Claims a session slot, returning the new session id.
    ///
    /// `None` when `max_clients` (non-zero) sessions are already active.
    pub fn try_open_session(&self, max_clients: usize) -> Option<u64> {
        self.sessions_active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                if max_clients > 0 && active >= max_clients {
                    None
                } else {
                    Some(active + 1)
                }
            })
            .ok()?;

        Some(self.sessions_total.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn close_session(&self) {
        let _ = self
            .sessions_active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                active.checked_sub(1)
            });
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions_active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            frames_lagged: self.frames_lagged.load(Ordering::Relaxed),
            active_sessions: self.sessions_active.load(Ordering::SeqCst),
            total_sessions: self.sessions_total.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_fps() {
        let prev = StreamStats {
            frames_published: 100,
            ..Default::default()
        };

        let current = StreamStats {
            frames_published: 130,
            ..Default::default()
        };

        assert_eq!(current.calculate_fps(&prev, 1.0), 30.0);
        assert_eq!(current.calculate_fps(&prev, 0.0), 0.0);
    }

    #[test]
    fn test_calculate_bitrate() {
        let prev = StreamStats::default();

        let current = StreamStats {
            bytes_published: 125_000, // 125KB in 1 second = 1000 kbps
            ..Default::default()
        };

        assert_eq!(current.calculate_bitrate_kbps(&prev, 1.0), 1000.0);
    }

    #[test]
    fn test_encode_failure_rate() {
        let stats = StreamStats {
            frames_captured: 200,
            encode_failures: 10,
            ..Default::default()
        };
        assert_eq!(stats.encode_failure_rate(), 0.05);
        assert_eq!(StreamStats::default().encode_failure_rate(), 0.0);
    }

    #[test]
    fn test_session_limit() {
        let counters = PipelineCounters::default();

        assert_eq!(counters.try_open_session(2), Some(1));
        assert_eq!(counters.try_open_session(2), Some(2));
        assert_eq!(counters.try_open_session(2), None);
        assert_eq!(counters.active_sessions(), 2);

        counters.close_session();
        assert_eq!(counters.try_open_session(2), Some(3));

        let stats = counters.snapshot();
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.total_sessions, 3);
    }

    #[test]
    fn test_unlimited_sessions() {
        let counters = PipelineCounters::default();
        for _ in 0..100 {
            assert!(counters.try_open_session(0).is_some());
        }
        assert_eq!(counters.active_sessions(), 100);
    }

    #[test]
    fn test_close_never_underflows() {
        let counters = PipelineCounters::default();
        counters.close_session();
        assert_eq!(counters.active_sessions(), 0);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let counters = PipelineCounters::default();
        counters.record_capture();
        counters.record_capture();
        counters.record_capture_failure();
        counters.record_encode_failure();
        counters.record_published(1_000);
        counters.record_lag(3);

        let stats = counters.snapshot();
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.capture_failures, 1);
        assert_eq!(stats.encode_failures, 1);
        assert_eq!(stats.frames_published, 1);
        assert_eq!(stats.bytes_published, 1_000);
        assert_eq!(stats.frames_lagged, 3);
    }
}
