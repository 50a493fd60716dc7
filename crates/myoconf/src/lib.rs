//! Minimal configuration loading for myocast.
//!
//! Imported by the capture core and the service binary, so it stays free of
//! async and telemetry dependencies.
//!
//! # Configuration Philosophy
//!
//! - **Infrastructure** (`InfraConfig`): paths, bind address, telemetry
//!   endpoint. Fixed for the life of the process.
//!
//! - **Capture** (`CaptureConfig`): initial values that seed the capture core
//!   (ring capacity, channel mask, device adapter). After startup the core is
//!   the source of truth; the channel mask in particular can change at runtime.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/myocast/config.toml` (system)
//! 2. `~/.config/myocast/config.toml` (user)
//! 3. `./myocast.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`MYOCAST_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! data_dir = "~/.local/share/myocast"
//!
//! [bind]
//! host = "0.0.0.0"
//! http_port = 5000
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [capture]
//! ring_capacity = 512
//! channel_mask = [true, true, true, true, true, true, true, true]
//! flush_interval_ms = 1000
//! snapshot_interval_ms = 1000
//! snapshot_duration = "10 minutes"
//!
//! [capture.device]
//! kind = "simulated"
//! rate_hz = 200
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{
    CaptureConfig, DeviceConfig, DeviceKind, DurationUnit, SnapshotDuration, CHANNEL_COUNT,
};
pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete myocast configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MyoConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Capture - seeds the capture core.
    #[serde(default)]
    pub capture: CaptureConfig,
}

impl MyoConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` standing in for `./myocast.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = MyoConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::overlay_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Built by hand so the layout matches the documented example
        let mut output = String::new();

        output.push_str("# myocast configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "data_dir = \"{}\"\n",
            self.infra.paths.data_dir.display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.infra.bind.host));
        output.push_str(&format!("http_port = {}\n", self.infra.bind.http_port));

        output.push_str("\n[telemetry]\n");
        if let Some(endpoint) = &self.infra.telemetry.otlp_endpoint {
            output.push_str(&format!("otlp_endpoint = \"{}\"\n", endpoint));
        }
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[capture]\n");
        output.push_str(&format!(
            "ring_capacity = {}\n",
            self.capture.ring_capacity
        ));
        let mask: Vec<String> = self
            .capture
            .channel_mask
            .iter()
            .map(|b| b.to_string())
            .collect();
        output.push_str(&format!("channel_mask = [{}]\n", mask.join(", ")));
        output.push_str(&format!(
            "flush_interval_ms = {}\n",
            self.capture.flush_interval_ms
        ));
        output.push_str(&format!("writer_queue = {}\n", self.capture.writer_queue));
        output.push_str(&format!(
            "snapshot_interval_ms = {}\n",
            self.capture.snapshot_interval_ms
        ));
        if let Some(duration) = &self.capture.snapshot_duration {
            output.push_str(&format!("snapshot_duration = \"{duration}\"\n"));
        }

        let device = &self.capture.device;
        output.push_str("\n[capture.device]\n");
        output.push_str(&format!("kind = \"{}\"\n", device.kind.as_str()));
        output.push_str(&format!("rate_hz = {}\n", device.rate_hz));
        if let Some(path) = &device.replay_path {
            output.push_str(&format!("replay_path = \"{}\"\n", path.display()));
        }
        output.push_str(&format!("replay_loop = {}\n", device.replay_loop));
        output.push_str(&format!("seed = {}\n", device.seed));

        output
    }
}
