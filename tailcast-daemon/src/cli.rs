//! CLI argument definitions for tailcast-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use tailcast_core::config::TailcastConfig;
use tailcast_core::error::TailcastError;

/// Security-event log relay daemon.
///
/// Tails an append-only JSON-lines log and fans each record out to
/// connected subscribers in broadcast or work-queue mode.
#[derive(Parser, Debug)]
#[command(name = "tailcast-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to tailcast.toml configuration file.
    #[arg(short, long, default_value = "/etc/tailcast/tailcast.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Load the configuration file, then apply environment and CLI overrides.
    ///
    /// Precedence (highest first): CLI flags, `TAILCAST_*` environment
    /// variables, the config file, built-in defaults. Validation runs after
    /// all overrides so a bad `--log-format` is reported like a bad file value.
    pub async fn load_config(&self) -> Result<TailcastConfig, TailcastError> {
        let mut config = TailcastConfig::from_file(&self.config).await?;
        config.apply_env_overrides();
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to an already-loaded configuration.
    pub fn apply_overrides(&self, config: &mut TailcastConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
    }
}
