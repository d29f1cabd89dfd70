//! Capture-encode-publish loop
//!
//! A single pump reads the device on a blocking thread, encodes each frame
//! once and publishes it to every viewer. It idles while nobody is watching.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::distributor::FrameDistributor;
use super::stats::{PipelineCounters, StreamStats};
use crate::capture::{CaptureError, CaptureSource};
use crate::encoder::{EncodedFrame, FrameEncoder};

/// How often an idle pump checks for viewers
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Pause between retries after a failed read
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// How the pump finished
#[derive(Debug)]
pub enum PumpExit {
    /// Distribution was closed from outside
    Stopped,
    /// The device stopped producing frames
    CaptureFailed(CaptureError),
}

pub struct CapturePump {
    source: Arc<CaptureSource>,
    encoder: FrameEncoder,
    distributor: Arc<FrameDistributor>,
    counters: Arc<PipelineCounters>,
    max_capture_failures: u32,
    stats_interval_frames: u64,
}

impl CapturePump {
    pub fn new(
        source: Arc<CaptureSource>,
        encoder: FrameEncoder,
        distributor: Arc<FrameDistributor>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            source,
            encoder,
            distributor,
            counters,
            max_capture_failures: 5,
            stats_interval_frames: 0,
        }
    }

    /// Consecutive read failures tolerated before giving up (at least 1)
    pub fn with_max_capture_failures(mut self, max: u32) -> Self {
        self.max_capture_failures = max.max(1);
        self
    }

    /// Log statistics every `frames` published frames (0 disables)
    pub fn with_stats_interval(mut self, frames: u64) -> Self {
        self.stats_interval_frames = frames;
        self
    }

    /// Runs the pump on the blocking thread pool
    pub fn spawn(self) -> JoinHandle<PumpExit> {
        tokio::task::spawn_blocking(move || self.run())
    }

    /// Runs until the distributor is closed or capture fails for good.
    ///
    /// A capture failure closes the distributor, which ends every session.
    pub fn run(self) -> PumpExit {
        info!(
            device = %self.source.device_id(),
            quality = self.encoder.quality(),
            "Capture pump started"
        );

        let mut sequence = 0u64;
        let mut consecutive_failures = 0u32;
        let mut idle = false;
        let mut last_report = (Instant::now(), self.counters.snapshot());

        let exit = loop {
            if self.distributor.is_closed() {
                break PumpExit::Stopped;
            }

            if self.distributor.subscriber_count() == 0 {
                if !idle {
                    debug!("No viewers, capture idle");
                    self.source.pause();
                    idle = true;
                }
                thread::sleep(IDLE_POLL);
                continue;
            }
            if idle {
                debug!("Viewer connected, capture resumed");
                idle = false;
            }

            let raw = match self.source.read_frame() {
                Ok(raw) => {
                    consecutive_failures = 0;
                    self.counters.record_capture();
                    raw
                }
                Err(e) => {
                    self.counters.record_capture_failure();

                    // Shutdown released the device underneath us
                    if self.distributor.is_closed() {
                        break PumpExit::Stopped;
                    }

                    if e.is_transient() {
                        consecutive_failures += 1;
                        if consecutive_failures < self.max_capture_failures {
                            warn!(
                                error = %e,
                                attempt = consecutive_failures,
                                max = self.max_capture_failures,
                                "Frame read failed, retrying"
                            );
                            thread::sleep(RETRY_DELAY);
                            continue;
                        }
                        error!(
                            error = %e,
                            failures = consecutive_failures,
                            "Capture failed repeatedly, stopping stream"
                        );
                    } else {
                        error!(error = %e, "Capture device stopped, stopping stream");
                    }

                    self.distributor.close();
                    break PumpExit::CaptureFailed(e);
                }
            };

            sequence += 1;
            let (width, height) = (raw.width, raw.height);

            let jpeg = match self.encoder.encode(raw) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    self.counters.record_encode_failure();
                    warn!(sequence, error = %e, "Skipping frame that failed to encode");
                    continue;
                }
            };

            let len = jpeg.len();
            let frame = EncodedFrame {
                sequence,
                width,
                height,
                jpeg,
            };

            // Err only means the last viewer left since the check above
            if self.distributor.publish(frame).is_ok() {
                self.counters.record_published(len);
                self.maybe_log_stats(&mut last_report);
            }
        };

        let stats = self.counters.snapshot();
        info!(
            captured = stats.frames_captured,
            published = stats.frames_published,
            encode_failures = stats.encode_failures,
            capture_failures = stats.capture_failures,
            "Capture pump stopped"
        );

        exit
    }

    fn maybe_log_stats(&self, last_report: &mut (Instant, StreamStats)) {
        if self.stats_interval_frames == 0 {
            return;
        }

        let current = self.counters.snapshot();
        if current.frames_published % self.stats_interval_frames != 0 {
            return;
        }

        let (since, previous) = &*last_report;
        let elapsed = since.elapsed().as_secs_f64();

        info!(
            fps = %format!("{:.1}", current.calculate_fps(previous, elapsed)),
            bitrate_kbps = %format!("{:.0}", current.calculate_bitrate_kbps(previous, elapsed)),
            viewers = current.active_sessions,
            lagged = current.frames_lagged,
            encode_failures = current.encode_failures,
            "Stream statistics"
        );

        *last_report = (Instant::now(), current);
    }
}
