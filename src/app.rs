//! Application wiring: device, capture pump and HTTP server

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::capture::CaptureSource;
use crate::config::Config;
use crate::encoder::FrameEncoder;
use crate::stream::{Multiplexer, PumpExit};
use crate::web::{self, AppState};

/// A streamer with its device open and its listener bound
pub struct App {
    config: Config,
    source: Arc<CaptureSource>,
    multiplexer: Arc<Multiplexer>,
    listener: TcpListener,
}

impl App {
    /// Opens the capture device, then binds the listener.
    ///
    /// Nothing is bound when the device cannot be opened.
    pub async fn start(config: &Config) -> Result<Self> {
        let source = CaptureSource::open(&config.camera)
            .with_context(|| format!("failed to open capture device {}", config.camera.device))?;

        Self::with_source(config, Arc::new(source)).await
    }

    /// Binds the listener around an already opened source
    pub async fn with_source(config: &Config, source: Arc<CaptureSource>) -> Result<Self> {
        let bind_addr = config.server.bind_addr();

        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                source.release();
                return Err(e).with_context(|| format!("failed to bind {}", bind_addr));
            }
        };

        Ok(Self {
            config: config.clone(),
            source,
            multiplexer: Arc::new(Multiplexer::new(&config.stream)),
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.multiplexer
    }

    /// Streams until `shutdown` resolves or capture fails.
    ///
    /// The device is released exactly once on the way out. A capture failure
    /// is returned as an error after the server has drained. Neither a client
    /// that stopped reading nor a device read that never returns holds the
    /// shutdown up past the drain timeout.
    pub async fn run<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let App {
            config,
            source,
            multiplexer,
            listener,
        } = self;

        let pump = multiplexer.start(
            Arc::clone(&source),
            FrameEncoder::new(config.encoder.quality),
        );

        let state = AppState::new(&config.server, Arc::clone(&multiplexer), Arc::clone(&source));

        let stream = Arc::clone(&multiplexer);
        let stop = async move {
            tokio::select! {
                _ = shutdown => info!("Shutdown requested"),
                _ = stream.stopped() => warn!("Stream stopped, shutting down"),
            }
        };

        let device = Arc::clone(&source);
        let served = web::serve(listener, state, stop, move || {
            device.release();
        })
        .await;

        // serve() only stops the stream on a clean shutdown
        multiplexer.shutdown();
        let exit = match tokio::time::timeout(config.server.drain_timeout(), pump).await {
            Ok(joined) => joined.context("capture pump panicked")?,
            Err(_) => {
                warn!(
                    device = %source.device_id(),
                    "Capture pump stuck in a device read, not waiting for it"
                );
                PumpExit::Stopped
            }
        };

        served.context("HTTP server failed")?;

        match exit {
            PumpExit::Stopped => {
                info!("Streamer stopped");
                Ok(())
            }
            PumpExit::CaptureFailed(e) => {
                Err(anyhow::Error::new(e).context("capture failed, stream stopped"))
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
