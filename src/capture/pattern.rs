//! Synthetic capture device (`test://pattern`)

use std::time::{Duration, Instant};
use tracing::debug;

use super::{CaptureDevice, CaptureError, PixelFormat, RawFrame};

/// SMPTE-style bar colours
const BARS: [[u8; 3]; 8] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
    [16, 16, 16],
];

/// Scrolling colour bars paced at a fixed frame rate.
///
/// Stands in for a camera in demos and tests; behaves like a real device in
/// that `read_frame` blocks until the next frame is due.
pub struct TestPatternDevice {
    width: u32,
    height: u32,
    frame_interval: Duration,
    next_due: Option<Instant>,
    frame_count: u64,
}

impl TestPatternDevice {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            next_due: None,
            frame_count: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let bar_width = (width / BARS.len()).max(1);
        let offset = (self.frame_count as usize * 4) % width.max(1);

        let mut pixels = Vec::with_capacity(width * height * 3);
        for _ in 0..height {
            for x in 0..width {
                let bar = ((x + offset) / bar_width) % BARS.len();
                pixels.extend_from_slice(&BARS[bar]);
            }
        }
        pixels
    }

    fn wait_for_next_frame(&mut self) {
        let now = Instant::now();
        match self.next_due {
            Some(due) if due > now => {
                std::thread::sleep(due - now);
                self.next_due = Some(due + self.frame_interval);
            }
            // First frame, or running late: don't try to catch up
            _ => self.next_due = Some(now + self.frame_interval),
        }
    }
}

impl CaptureDevice for TestPatternDevice {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        self.wait_for_next_frame();

        let pixels = self.render();
        self.frame_count += 1;

        Ok(RawFrame::new(
            self.width,
            self.height,
            PixelFormat::Rgb24,
            pixels,
        ))
    }

    fn close(&mut self) {
        debug!(frames = %self.frame_count, "Test pattern device closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_frame_shape() {
        let mut device = TestPatternDevice::new(64, 48, 120);
        let frame = device.read_frame().unwrap();

        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert_eq!(frame.data.len(), 64 * 48 * 3);
    }

    #[test]
    fn test_pattern_scrolls() {
        let mut device = TestPatternDevice::new(64, 8, 120);
        let first = device.read_frame().unwrap();
        let second = device.read_frame().unwrap();

        assert_ne!(first.data, second.data);
    }

    #[test]
    fn test_pattern_is_paced() {
        let mut device = TestPatternDevice::new(8, 8, 50);
        let start = Instant::now();
        for _ in 0..4 {
            device.read_frame().unwrap();
        }
        // three full intervals at 20 ms
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn test_narrow_frame() {
        let mut device = TestPatternDevice::new(3, 1, 120);
        let frame = device.read_frame().unwrap();
        assert_eq!(frame.data.len(), 9);
    }
}
