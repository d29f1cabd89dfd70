//! Shared helpers for the integration tests

#![allow(dead_code)]

use mjpeg_streamer::capture::{CaptureDevice, CaptureError, CaptureSource, PixelFormat, RawFrame};
use mjpeg_streamer::stream::multipart::PART_HEADER;
use mjpeg_streamer::{App, Config};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const FRAME_HEIGHT: u32 = 8;

/// Width of the `index`-th frame the mock produces, so tests can tell
/// frames apart after decoding
pub fn frame_width(index: usize) -> u32 {
    16 + 8 * (index % 4) as u32
}

/// Fixed-rate fake camera
pub struct MockDevice {
    interval: Duration,
    next_due: Option<Instant>,
    index: usize,
    corrupt_at: Vec<usize>,
    fail_after: Option<usize>,
    noise: Option<(u32, u32)>,
    stall_after: Option<(usize, Duration)>,
    closed: Arc<AtomicUsize>,
}

impl MockDevice {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
            index: 0,
            corrupt_at: Vec::new(),
            fail_after: None,
            noise: None,
            stall_after: None,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delivers a buffer of the wrong size as the `index`-th frame
    pub fn with_corrupt_frame(mut self, index: usize) -> Self {
        self.corrupt_at.push(index);
        self
    }

    /// Every read after `frames` good frames fails
    pub fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Every read after `frames` good frames blocks for `stall` first
    pub fn stalling_after(mut self, frames: usize, stall: Duration) -> Self {
        self.stall_after = Some((frames, stall));
        self
    }

    /// Produces `width`x`height` frames of noise, which compress poorly
    pub fn with_noise_frames(mut self, width: u32, height: u32) -> Self {
        self.noise = Some((width, height));
        self
    }

    /// Number of times the device was closed
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed)
    }

    pub fn into_source(self) -> (Arc<CaptureSource>, Arc<AtomicUsize>) {
        let closed = self.close_counter();
        (
            Arc::new(CaptureSource::from_device("mock", Box::new(self))),
            closed,
        )
    }

    fn pace(&mut self) {
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.interval);
    }
}

impl CaptureDevice for MockDevice {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        self.pace();

        let index = self.index;
        if let Some((from, stall)) = self.stall_after {
            if index >= from {
                thread::sleep(stall);
            }
        }
        if let Some(limit) = self.fail_after {
            if index >= limit {
                return Err(CaptureError::Read("mock device unplugged".to_string()));
            }
        }
        self.index += 1;

        if let Some((width, height)) = self.noise {
            return Ok(RawFrame::new(
                width,
                height,
                PixelFormat::Gray8,
                noise(index as u64, (width * height) as usize),
            ));
        }

        let width = frame_width(index);
        let mut data = vec![(index * 40 % 256) as u8; (width * FRAME_HEIGHT) as usize];
        if self.corrupt_at.contains(&index) {
            data.truncate(data.len() / 2);
        }

        Ok(RawFrame::new(width, FRAME_HEIGHT, PixelFormat::Gray8, data))
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn noise(seed: u64, len: usize) -> Vec<u8> {
    // xorshift64
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// Configuration bound to an ephemeral local port
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.camera.device = "mock".to_string();
    config.stream.frame_timeout_ms = 2_000;
    config
}

/// A streamer running in the background
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn spawn(config: Config, source: Arc<CaptureSource>) -> Self {
        let app = App::with_source(&config, source).await.unwrap();
        let addr = app.local_addr().unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(app.run(async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests shutdown and waits for the server to finish
    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.wait().await
    }

    /// Waits for the server to finish on its own
    pub async fn wait(self) -> anyhow::Result<()> {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

/// Splits a streaming response body into JPEG payloads
pub struct PartReader {
    response: reqwest::Response,
    buffer: Vec<u8>,
}

impl PartReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: Vec::new(),
        }
    }

    /// Next JPEG, or `None` once the body ends
    pub async fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(jpeg) = self.take_part() {
                return Some(jpeg);
            }

            match self.response.chunk().await {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Next JPEG within `limit`, panicking on timeout or end of body
    pub async fn expect_jpeg(&mut self, limit: Duration) -> Vec<u8> {
        tokio::time::timeout(limit, self.next_jpeg())
            .await
            .expect("no part within time limit")
            .expect("stream ended early")
    }

    /// Reads until the server ends the body
    pub async fn drain(&mut self) {
        while self.next_jpeg().await.is_some() {}
    }

    fn take_part(&mut self) -> Option<Vec<u8>> {
        if self.buffer.len() < PART_HEADER.len() {
            return None;
        }
        assert_eq!(
            &self.buffer[..PART_HEADER.len()],
            PART_HEADER,
            "part does not start with the multipart header"
        );

        // Encoder output contains FF D9 only as the final marker
        let body = &self.buffer[PART_HEADER.len()..];
        let end = body
            .windows(4)
            .position(|w| w == [0xFF, 0xD9, b'\r', b'\n'])?;

        let jpeg = body[..end + 2].to_vec();
        self.buffer.drain(..PART_HEADER.len() + end + 4);
        Some(jpeg)
    }
}

/// Opens `/stream.mjpg` and checks the response head
pub async fn open_stream(client: &reqwest::Client, server: &TestServer) -> PartReader {
    let response = client.get(server.url("/stream.mjpg")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "multipart/x-mixed-replace; boundary=frame"
    );
    PartReader::new(response)
}

/// Width of an encoded frame
pub fn jpeg_width(jpeg: &[u8]) -> u32 {
    image::load_from_memory(jpeg).unwrap().width()
}
