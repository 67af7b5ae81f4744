//! Relay orchestration -- assembly, lifecycle management, and the main loop.
//!
//! The [`Orchestrator`] is the central coordinator of `tailcast-daemon`.
//! It turns a validated [`TailcastConfig`] into a [`RelayPipeline`], starts
//! it, and then waits for whichever comes first:
//!
//! - a shutdown signal (`SIGTERM` / `SIGINT`): graceful drain, exit code 0
//! - a fatal pipeline error (source file gone, listener failure): graceful
//!   drain of what was already enqueued, then the error is returned
//!
//! While running it logs a health snapshot every [`HEALTH_LOG_INTERVAL`].

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use tailcast_core::config::TailcastConfig;
use tailcast_core::error::TailcastError;
use tailcast_core::pipeline::Pipeline;
use tailcast_relay::{RelayConfig, RelayPipeline, RelayPipelineBuilder};

use crate::health::{DaemonHealth, RelayHealth, log_health};
use crate::metrics_server;

/// How often the main loop logs a health snapshot.
pub const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: TailcastConfig,
    /// The relay pipeline.
    pipeline: RelayPipeline,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read, parsed,
    /// or validated, or if the relay pipeline cannot be built.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = TailcastConfig::load(config_path)
            .await
            .with_context(|| format!("failed to load config from {}", config_path.display()))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// Installs the Prometheus recorder when `[metrics] enabled = true`.
    pub fn build_from_config(config: TailcastConfig) -> Result<Self> {
        config.validate().context("config validation failed")?;

        let relay_config = RelayConfig::from_core(&config)
            .map_err(TailcastError::from)
            .context("invalid relay configuration")?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let pipeline = RelayPipelineBuilder::new()
            .config(relay_config)
            .build()
            .map_err(TailcastError::from)
            .context("failed to build relay pipeline")?;

        tracing::info!(
            source = %config.source.path,
            mode = %config.distribution.mode,
            listen_addr = %config.distribution.listen_addr,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            pipeline,
            start_time: Instant::now(),
        })
    }

    /// Start the relay and run until a SIGTERM/SIGINT or a fatal error.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start the relay and run until `shutdown` resolves or a fatal error occurs.
    ///
    /// The pipeline is always stopped before returning, so records that were
    /// already enqueued are flushed to subscribers on both paths.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        self.pipeline
            .start()
            .await
            .context("failed to start relay pipeline")?;

        let mut health_tick = tokio::time::interval(HEALTH_LOG_INTERVAL);
        health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        health_tick.tick().await;

        tokio::pin!(shutdown);
        tracing::info!("entering main event loop");

        let outcome = loop {
            tokio::select! {
                signal = &mut shutdown => {
                    match signal {
                        Ok(name) => {
                            tracing::info!(signal = name, "shutdown signal received");
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    }
                }
                err = self.pipeline.fatal_error() => {
                    tracing::error!(error = %err, "relay pipeline failed");
                    break Err(anyhow::Error::new(TailcastError::from(err))
                        .context("relay pipeline failed"));
                }
                _ = health_tick.tick() => {
                    log_health(&self.health().await);
                }
            }
        };

        if let Err(e) = self.pipeline.stop().await {
            tracing::error!(error = %e, "failed to stop relay pipeline");
        }
        tracing::info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "tailcast-daemon shut down"
        );
        outcome
    }

    /// Current health snapshot.
    pub async fn health(&self) -> DaemonHealth {
        let status = self.pipeline.health_check().await;
        let uptime_secs = self.start_time.elapsed().as_secs();

        if self.config.metrics.enabled {
            use tailcast_core::metrics as m;
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status,
            uptime_secs,
            relay: RelayHealth::collect(&self.pipeline),
        }
    }

    /// The relay pipeline (for embedding and tests).
    pub fn pipeline(&self) -> &RelayPipeline {
        &self.pipeline
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &TailcastConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for Ctrl+C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to install Ctrl+C handler: {}", e))?;
    Ok("CTRL_C")
}
