//! Raw frame to JPEG encoding

mod convert;
mod jpeg;

pub use convert::yuyv_to_rgb;
pub use jpeg::{validate_jpeg, JpegError};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use crate::capture::{PixelFormat, RawFrame};

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("frame has zero width or height")]
    ZeroDimension,

    #[error("frame {width}x{height} exceeds JPEG limits")]
    TooLarge { width: u32, height: u32 },

    #[error("{format} frame buffer is {actual} bytes, expected {expected}")]
    BufferSize {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("YUYV frame width must be even, got {0}")]
    OddWidth(u32),

    #[error("device JPEG rejected: {0}")]
    InvalidJpeg(#[from] JpegError),

    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// A JPEG image ready to be multiplexed.
///
/// `jpeg` is reference counted, so one encoded frame is shared by every
/// client without copying.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Position in the capture sequence (skipped frames leave gaps)
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Bytes,
}

/// Stateless JPEG encoder
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    /// Creates an encoder; quality is clamped to 1-100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encodes one raw frame.
    ///
    /// Frames the device already compressed are validated and passed through
    /// untouched.
    pub fn encode(&self, frame: RawFrame) -> Result<Bytes, EncodeError> {
        let RawFrame {
            width,
            height,
            format,
            data,
        } = frame;

        if width == 0 || height == 0 {
            return Err(EncodeError::ZeroDimension);
        }
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(EncodeError::TooLarge { width, height });
        }

        if let Some(expected) = format.frame_len(width, height) {
            if data.len() != expected {
                return Err(EncodeError::BufferSize {
                    format,
                    expected,
                    actual: data.len(),
                });
            }
        }

        match format {
            PixelFormat::Mjpeg => {
                validate_jpeg(&data)?;
                Ok(Bytes::from(data))
            }
            PixelFormat::Rgb24 => self.compress(&data, width, height, ExtendedColorType::Rgb8),
            PixelFormat::Gray8 => self.compress(&data, width, height, ExtendedColorType::L8),
            PixelFormat::Yuyv => {
                if width % 2 != 0 {
                    return Err(EncodeError::OddWidth(width));
                }
                let rgb = yuyv_to_rgb(&data, width, height);
                self.compress(&rgb, width, height, ExtendedColorType::Rgb8)
            }
        }
    }

    fn compress(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        color: ExtendedColorType,
    ) -> Result<Bytes, EncodeError> {
        // JPEG output is usually well under 1/8 of the raw size
        let mut buffer = Vec::with_capacity(pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode(pixels, width, height, color)?;
        Ok(Bytes::from(buffer))
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(85)
    }
}
