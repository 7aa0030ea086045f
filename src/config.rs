//! Configuration management for Windowgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, WindowgateError};
use crate::ratelimit::Preset;

/// Prefix for environment variable overrides, e.g. `WINDOWGATE__SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "WINDOWGATE";

/// Main configuration for the Windowgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// How often expired windows are swept, in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Per-preset overrides of the built-in limits
    #[serde(default)]
    pub presets: PresetOverrides,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            presets: PresetOverrides::default(),
        }
    }
}

impl RateLimitingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn default_sweep_interval() -> u64 {
    60_000
}

/// Optional replacements for a preset's built-in numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetLimits {
    #[serde(default)]
    pub max_requests: Option<u32>,
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// Give back admitted calls that end in a 2xx/3xx response
    #[serde(default)]
    pub skip_successful_requests: bool,
    /// Give back admitted calls that end in a 4xx/5xx response
    #[serde(default)]
    pub skip_failed_requests: bool,
}

/// Overrides keyed by preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetOverrides {
    #[serde(default)]
    pub auth: Option<PresetLimits>,
    #[serde(default)]
    pub api: Option<PresetLimits>,
    #[serde(default)]
    pub upload: Option<PresetLimits>,
    #[serde(default)]
    pub search: Option<PresetLimits>,
    #[serde(default)]
    pub client: Option<PresetLimits>,
}

impl PresetOverrides {
    pub fn get(&self, preset: Preset) -> Option<&PresetLimits> {
        match preset {
            Preset::Auth => self.auth.as_ref(),
            Preset::Api => self.api.as_ref(),
            Preset::Upload => self.upload.as_ref(),
            Preset::Search => self.search.as_ref(),
            Preset::Client => self.client.as_ref(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WindowgateConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WindowgateConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, overlaid with
    /// `WINDOWGATE__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: WindowgateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that can never admit or never roll over.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.sweep_interval_ms == 0 {
            return Err(WindowgateError::Config(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }

        for preset in [
            Preset::Auth,
            Preset::Api,
            Preset::Upload,
            Preset::Search,
            Preset::Client,
        ] {
            let Some(limits) = self.rate_limiting.presets.get(preset) else {
                continue;
            };
            if limits.max_requests == Some(0) {
                return Err(WindowgateError::Config(format!(
                    "preset '{}': max_requests must be greater than zero",
                    preset
                )));
            }
            if limits.window_ms == Some(0) {
                return Err(WindowgateError::Config(format!(
                    "preset '{}': window_ms must be greater than zero",
                    preset
                )));
            }
        }

        Ok(())
    }
}
