//! V4L2 capture device

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use super::{CaptureDevice, CaptureError, PixelFormat, RawFrame};
use crate::config::CameraConfig;

const BUFFER_COUNT: u32 = 4;

/// Memory-mapped V4L2 capture stream
pub struct V4l2Device {
    path: String,
    stream: Option<MmapStream<'static>>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl V4l2Device {
    /// Opens the device node and negotiates format and frame rate.
    ///
    /// The driver may adjust the requested size; the negotiated one is what
    /// frames report.
    pub fn open(path: &str, config: &CameraConfig) -> Result<Self, CaptureError> {
        let unavailable = |reason: String| CaptureError::DeviceUnavailable {
            device: path.to_string(),
            reason,
        };

        let device = Device::with_path(path).map_err(|e| unavailable(e.to_string()))?;

        let requested = Format::new(
            config.width,
            config.height,
            FourCC::new(&config.pixel_format.fourcc()),
        );
        let format = device
            .set_format(&requested)
            .map_err(|e| unavailable(format!("failed to set format: {}", e)))?;

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .ok_or_else(|| unavailable(format!("unsupported pixel format {}", format.fourcc)))?;

        if pixel_format != config.pixel_format {
            warn!(
                device = %path,
                requested = %config.pixel_format,
                negotiated = %pixel_format,
                "Driver substituted pixel format"
            );
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            warn!(device = %path, fps = %config.fps, error = %e, "Failed to set frame rate");
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| unavailable(format!("failed to create buffer stream: {}", e)))?;

        info!(
            device = %path,
            resolution = %format!("{}x{}", format.width, format.height),
            format = %pixel_format,
            "V4L2 device opened"
        );

        Ok(Self {
            path: path.to_string(),
            stream: Some(stream),
            width: format.width,
            height: format.height,
            format: pixel_format,
        })
    }
}

impl CaptureDevice for V4l2Device {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::Released)?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::Read(e.to_string()))?;

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(CaptureError::Read("driver returned an empty buffer".to_string()));
        }

        Ok(RawFrame::new(
            self.width,
            self.height,
            self.format,
            buf[..used].to_vec(),
        ))
    }

    fn pause(&mut self) {
        // STREAMOFF drops every queued buffer; the next read requeues them
        // and turns streaming back on
        if let Some(stream) = self.stream.as_mut() {
            match stream.stop() {
                Ok(()) => debug!(device = %self.path, "V4L2 streaming paused"),
                Err(e) => warn!(device = %self.path, error = %e, "Failed to pause streaming"),
            }
        }
    }

    fn close(&mut self) {
        // Dropping the stream turns streaming off and unmaps the buffers;
        // the file descriptor closes with the last handle reference.
        if self.stream.take().is_some() {
            info!(device = %self.path, "V4L2 device closed");
        }
    }
}
