//! JPEG structure checks for frames the device already compressed
//!
//! USB cameras in MJPG mode can hand out truncated or torn buffers; those
//! are rejected before they reach a viewer.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JpegError {
    #[error("invalid JPEG: too short")]
    TooShort,

    #[error("missing SOI marker")]
    MissingSoi,

    #[error("missing SOS marker")]
    MissingSos,

    #[error("missing EOI marker")]
    MissingEoi,

    #[error("segment overruns buffer at offset {0}")]
    Truncated(usize),
}

/// JPEG marker codes
mod markers {
    pub const SOI: u8 = 0xD8; // Start of Image
    pub const EOI: u8 = 0xD9; // End of Image
    pub const SOS: u8 = 0xDA; // Start of Scan
    pub const TEM: u8 = 0x01;
    pub const RST0: u8 = 0xD0;
    pub const RST7: u8 = 0xD7;
}

/// Walks the header segments up to the scan and checks the image is
/// terminated. Returns the offset of the SOS marker.
pub fn validate_jpeg(data: &[u8]) -> Result<usize, JpegError> {
    if data.len() < 4 {
        return Err(JpegError::TooShort);
    }

    if data[0] != 0xFF || data[1] != markers::SOI {
        return Err(JpegError::MissingSoi);
    }

    let sos = find_scan(data)?;

    // Some encoders pad after EOI; tolerate trailing zeros
    let end = data
        .iter()
        .rposition(|&b| b != 0x00)
        .map_or(0, |i| i + 1);
    if end < sos + 2 || data[end - 2] != 0xFF || data[end - 1] != markers::EOI {
        return Err(JpegError::MissingEoi);
    }

    Ok(sos)
}

fn find_scan(data: &[u8]) -> Result<usize, JpegError> {
    let mut pos = 2;

    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            return Err(JpegError::MissingSos);
        }

        let marker = data[pos + 1];
        match marker {
            // Fill bytes
            0xFF => {
                pos += 1;
                continue;
            }
            markers::SOS => return Ok(pos),
            markers::EOI => return Err(JpegError::MissingSos),
            // Standalone markers carry no length
            markers::TEM | markers::RST0..=markers::RST7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }

        if pos + 4 > data.len() {
            return Err(JpegError::Truncated(pos));
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if length < 2 || pos + 2 + length > data.len() {
            return Err(JpegError::Truncated(pos));
        }
        pos += 2 + length;
    }

    Err(JpegError::MissingSos)
}
