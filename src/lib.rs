//! Single-camera MJPEG-over-HTTP streaming
//!
//! One capture device is read by a single pump, each frame is JPEG encoded
//! once, and the result is fanned out to every viewer as a
//! `multipart/x-mixed-replace` stream:
//! - Zero-copy fan-out with `Arc` frames over a broadcast channel
//! - Slow or vanished viewers never stall the camera or each other
//! - The device is released exactly once at shutdown
//!
//! # Example
//!
//! ```no_run
//! use mjpeg_streamer::{App, Config};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let app = App::start(&config).await?;
//! app.run(mjpeg_streamer::shutdown_signal()).await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod lifecycle;
pub mod stream;
pub mod web;

// Re-exports for convenience
pub use app::{shutdown_signal, App};
pub use capture::{CaptureDevice, CaptureError, CaptureSource, PixelFormat, RawFrame};
pub use config::Config;
pub use encoder::{EncodeError, EncodedFrame, FrameEncoder};
pub use stream::{Multiplexer, StreamError, StreamStats};
