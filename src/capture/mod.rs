//! Camera capture
//!
//! [`CaptureSource`] is the single owner of the capture device. Reads are
//! serialized through an internal mutex and the device is closed exactly
//! once, either by an explicit [`CaptureSource::release`] or on drop.
//!
//! Release never waits on a hung read for long. If a read is still in
//! flight after [`RELEASE_WAIT`], the reader closes the device itself as
//! soon as the read returns.

mod frame;
mod pattern;
mod platform;
#[cfg(feature = "v4l2")]
mod v4l2;

pub use frame::{PixelFormat, RawFrame};
pub use pattern::TestPatternDevice;
pub use platform::{default_device_path, resolve_device, DeviceSpec, TEST_SCHEME};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Device;

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CameraConfig;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("frame read failed: {0}")]
    Read(String),

    #[error("capture device reached end of stream")]
    EndOfStream,

    #[error("capture device already released")]
    Released,
}

impl CaptureError {
    /// Whether retrying the read can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Read(_))
    }
}

/// A source of raw frames.
///
/// Implementations may block in `read_frame` until the next frame is
/// available. `close` is called at most once, by [`CaptureSource`].
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError>;

    /// Stops producing frames until the next read. Frames the device has
    /// buffered so far are discarded.
    fn pause(&mut self) {}

    fn close(&mut self) {}
}

/// How long `release` waits for an in-flight read
pub const RELEASE_WAIT: Duration = Duration::from_millis(250);

/// Statistics for capture
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub read_errors: u64,
    pub is_open: bool,
}

/// Exclusive owner of the capture device
pub struct CaptureSource {
    device_id: String,
    device: Mutex<Option<Box<dyn CaptureDevice>>>,
    released: AtomicBool,

    // Statistics
    frames_captured: AtomicU64,
    read_errors: AtomicU64,
}

impl CaptureSource {
    /// Opens the configured device.
    ///
    /// Fails with [`CaptureError::DeviceUnavailable`] when the device cannot
    /// be opened; callers treat that as fatal at startup.
    pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
        let resolved = resolve_device(&config.device).map_err(|reason| {
            CaptureError::DeviceUnavailable {
                device: config.device.clone(),
                reason,
            }
        })?;

        info!(
            device = %config.device,
            resolution = %format!("{}x{}", config.width, config.height),
            fps = %config.fps,
            "Opening capture device"
        );

        let device: Box<dyn CaptureDevice> = match resolved {
            DeviceSpec::TestPattern => Box::new(TestPatternDevice::new(
                config.width,
                config.height,
                config.fps,
            )),
            DeviceSpec::V4l2(path) => open_v4l2(&path, config)?,
        };

        Ok(Self::from_device(config.device.clone(), device))
    }

    /// Wraps an already opened device
    pub fn from_device(device_id: impl Into<String>, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device_id: device_id.into(),
            device: Mutex::new(Some(device)),
            released: AtomicBool::new(false),
            frames_captured: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
        }
    }

    /// Reads the next frame, blocking until the device delivers one
    pub fn read_frame(&self) -> Result<RawFrame, CaptureError> {
        let mut guard = self.device.lock();
        let device = guard.as_mut().ok_or(CaptureError::Released)?;

        let result = device.read_frame();

        // Released while the read was blocked
        if self.released.load(Ordering::Acquire) {
            self.close_device(&mut guard);
            return Err(CaptureError::Released);
        }

        match result {
            Ok(frame) => {
                self.frames_captured.fetch_add(1, Ordering::Relaxed);
                Ok(frame)
            }
            Err(e) => {
                self.read_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Pauses the device while nobody is watching
    pub fn pause(&self) {
        if let Some(device) = self.device.lock().as_mut() {
            device.pause();
        }
    }

    /// Releases the device.
    ///
    /// Idempotent: returns `true` only for the first call. Waits at most
    /// [`RELEASE_WAIT`] for an in-flight read; past that the device is
    /// closed by the reader when its read returns.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!(device = %self.device_id, "Capture device already released");
            return false;
        }

        match self.device.try_lock_for(RELEASE_WAIT) {
            Some(mut guard) => self.close_device(&mut guard),
            None => warn!(
                device = %self.device_id,
                wait_ms = RELEASE_WAIT.as_millis() as u64,
                "Read still in progress, device closes when it returns"
            ),
        }
        true
    }

    fn close_device(&self, slot: &mut Option<Box<dyn CaptureDevice>>) {
        if let Some(mut device) = slot.take() {
            device.close();
            info!(
                device = %self.device_id,
                frames = %self.frames_captured.load(Ordering::Relaxed),
                errors = %self.read_errors.load(Ordering::Relaxed),
                "Capture device released"
            );
        }
    }

    /// Checks if the device is still open
    pub fn is_open(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Gets capture statistics
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            is_open: self.is_open(),
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(feature = "v4l2")]
fn open_v4l2(path: &str, config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    Ok(Box::new(V4l2Device::open(path, config)?))
}

#[cfg(not(feature = "v4l2"))]
fn open_v4l2(path: &str, _config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    Err(CaptureError::DeviceUnavailable {
        device: path.to_string(),
        reason: "built without the `v4l2` feature".to_string(),
    })
}
