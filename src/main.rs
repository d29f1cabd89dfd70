//! MJPEG streaming server CLI

use anyhow::{Context, Result};
use clap::Parser;
use mjpeg_streamer::{shutdown_signal, App, Config};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mjpeg-streamer")]
#[command(about = "Stream a webcam to browsers as MJPEG over HTTP")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Capture device: index, device node or test://pattern
    #[arg(short, long)]
    device: Option<String>,

    /// Frame width
    #[arg(long)]
    width: Option<u32>,

    /// Frame height
    #[arg(long)]
    height: Option<u32>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// JPEG quality (1-100)
    #[arg(short, long)]
    quality: Option<u8>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(device) = &self.device {
            config.camera.device = device.clone();
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(fps) = self.fps {
            config.camera.fps = fps;
        }
        if let Some(quality) = self.quality {
            config.encoder.quality = quality;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    // Runtime teardown would wait on a capture read that never returned
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "MJPEG streamer starting");

    let mut config = match &cli.config {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            Config::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => Config::default(),
    };

    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!(
        device = %config.camera.device,
        resolution = %format!("{}x{}", config.camera.width, config.camera.height),
        fps = %config.camera.fps,
        quality = %config.encoder.quality,
        "Configuration loaded"
    );

    let app = App::start(&config).await?;
    let addr = app.local_addr()?;
    info!("Streaming at http://{}/stream.mjpg, press Ctrl+C to stop", addr);

    app.run(shutdown_signal()).await
}
