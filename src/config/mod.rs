//! Configuration management for a watch session.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod fetch;
mod hub;
mod monitoring;
mod proxy;
mod registry;
mod retry;
mod scheduler;
mod target;
pub use fetch::*;
pub use hub::*;
pub use monitoring::*;
pub use proxy::*;
pub use registry::*;
pub use retry::*;
pub use scheduler::*;
pub use target::*;


use std::env;
use std::fmt::Debug;
use std::path::PathBuf;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

pub(crate) const ENV_PREFIX: &str = "SLOTWATCH";

/// Main configuration container for a watch session
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct WatchConfig {
    /// What to watch: service page, requester identity, locations
    #[serde(default)]
    pub target: TargetConfig,
    /// Polling cadence and concurrency
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Outbound proxy pool
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// HTTP request parameters
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Slot deduplication parameters
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Push-channel server and subscriber queues
    #[serde(default)]
    pub hub: HubConfig,
    /// Backoff policies for locations and proxies
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Prometheus exporter
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Write logs to a daily-rolling file in this directory instead of stdout
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Debug for WatchConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchConfig")
            .field("target", &self.target)
            .field("scheduler", &self.scheduler)
            .field("hub", &self.hub.listen_address)
            .finish_non_exhaustive()
    }
}

impl WatchConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `SLOTWATCH__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so that `with_override_config()` can still be
    /// applied. Callers must call `validate()` before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/berlin.toml");
    /// std::env::set_var("SLOTWATCH__TARGET__EMAIL", "me@example.org");
    /// let cfg = WatchConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.target.validate()?;
        self.scheduler.validate()?;
        self.proxy.validate()?;
        self.fetch.validate()?;
        self.registry.validate()?;
        self.hub.validate()?;
        self.retry.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("target.locations")
}
