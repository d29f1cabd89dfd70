//! Configuration management for the MJPEG streamer

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::capture::PixelFormat;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete streamer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (IP or hostname)
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port (0 = auto-assign)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Landing page template
    #[serde(default = "default_template")]
    pub template: PathBuf,

    /// Page title substituted into the template
    #[serde(default = "default_title")]
    pub title: String,

    /// Request timeout for non-streaming routes (milliseconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Time open connections get to finish after the stream stops
    /// (milliseconds); stragglers are dropped after it
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            template: default_template(),
            title: default_title(),
            request_timeout_ms: default_request_timeout(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Capture device
    /// - "0", "1", ...: V4L2 device index (/dev/videoN)
    /// - "/dev/video2": explicit device node
    /// - "test://pattern": built-in synthetic colour bars
    #[serde(default = "default_device")]
    pub device: String,

    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Pixel format requested from the device
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            pixel_format: default_pixel_format(),
        }
    }
}

/// JPEG encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
        }
    }
}

/// Frame fan-out and client session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Frames buffered per client before a slow client starts skipping
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// A session that receives no frame for this long is closed (milliseconds)
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_ms: u64,

    /// Consecutive capture failures tolerated before the stream stops
    #[serde(default = "default_max_capture_failures")]
    pub max_capture_failures: u32,

    /// Maximum concurrent viewers (0 = unlimited)
    #[serde(default)]
    pub max_clients: usize,

    /// Statistics are logged every N published frames (0 = never)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_frames: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            frame_timeout_ms: default_frame_timeout(),
            max_capture_failures: default_max_capture_failures(),
            max_clients: 0,
            stats_interval_frames: default_stats_interval(),
        }
    }
}

impl StreamConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8081
}
fn default_template() -> PathBuf {
    PathBuf::from("templates/index.html")
}
fn default_title() -> String {
    "Live Camera".to_string()
}
fn default_request_timeout() -> u64 {
    10_000
}
fn default_drain_timeout() -> u64 {
    5_000
}
fn default_device() -> String {
    "0".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    30
}
fn default_pixel_format() -> PixelFormat {
    PixelFormat::Yuyv
}
fn default_quality() -> u8 {
    85
}
fn default_channel_capacity() -> usize {
    4
}
fn default_frame_timeout() -> u64 {
    5_000
}
fn default_max_capture_failures() -> u32 {
    5
}
fn default_stats_interval() -> u64 {
    300
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".to_string()));
        }

        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.server.drain_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.drain_timeout_ms must be > 0".to_string(),
            ));
        }

        self.validate_camera(&self.camera)?;

        if self.encoder.quality == 0 || self.encoder.quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "encoder.quality must be between 1 and 100, got {}",
                self.encoder.quality
            )));
        }

        let stream = &self.stream;
        if stream.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "stream.channel_capacity must be > 0".to_string(),
            ));
        }

        if stream.frame_timeout_ms < 100 {
            return Err(ConfigError::Invalid(format!(
                "stream.frame_timeout_ms must be at least 100, got {}",
                stream.frame_timeout_ms
            )));
        }

        if stream.max_capture_failures == 0 {
            return Err(ConfigError::Invalid(
                "stream.max_capture_failures must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_camera(&self, cam: &CameraConfig) -> Result<(), ConfigError> {
        if cam.device.trim().is_empty() {
            return Err(ConfigError::Invalid("camera.device must not be empty".to_string()));
        }

        // JPEG limits each dimension to 16 bits
        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Invalid(
                "camera: width and height must be > 0".to_string(),
            ));
        }

        if cam.width > u16::MAX as u32 || cam.height > u16::MAX as u32 {
            return Err(ConfigError::Invalid(format!(
                "camera: {}x{} exceeds the JPEG maximum of 65535 pixels per side",
                cam.width, cam.height
            )));
        }

        if cam.pixel_format == PixelFormat::Yuyv && cam.width % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "camera: YUYV width must be even, got {}",
                cam.width
            )));
        }

        if cam.fps == 0 || cam.fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "camera: FPS must be between 1 and 120, got {}",
                cam.fps
            )));
        }

        Ok(())
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    /// Parses and validates configuration from a TOML string
    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}
