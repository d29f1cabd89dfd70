//! `multipart/x-mixed-replace` framing
//!
//! Each JPEG becomes one body part:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <JPEG bytes>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Multipart boundary token
pub const BOUNDARY: &str = "frame";

/// Response content type announcing the boundary
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Delimiter plus part headers, up to and including the blank line
pub const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Line terminator closing each part
pub const PART_TRAILER: &[u8] = b"\r\n";

/// Size of the part wrapping a JPEG of `jpeg_len` bytes
pub fn part_len(jpeg_len: usize) -> usize {
    PART_HEADER.len() + jpeg_len + PART_TRAILER.len()
}

/// Frames one JPEG as a multipart body part
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(part_len(jpeg.len()));
    part.put_slice(PART_HEADER);
    part.put_slice(jpeg);
    part.put_slice(PART_TRAILER);
    part.freeze()
}
