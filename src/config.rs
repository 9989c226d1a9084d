//! Watcher configuration.
//!
//! Hierarchical loading in the usual order: defaults from code, then
//! environment variables with the `MEGAWATCHER__` prefix. Validation is a
//! separate pass so callers can apply overrides in between.
//!
//! ```ignore
//! // Defaults only
//! let cfg = WatcherConfig::default().validate()?;
//!
//! // MEGAWATCHER__CHANGE_BUFFER_SIZE=512
//! let cfg = WatcherConfig::load()?.validate()?;
//! ```

use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::ConfigError;
use crate::errors::Result;

/// Env var prefix for overrides.
const ENV_PREFIX: &str = "MEGAWATCHER";

/// Tunables of the watcher loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Buffer of the change channel handed to the backing store.
    ///
    /// Notifications queue here while the initial load runs and between
    /// loop scheduling cycles; a full buffer backpressures the backing's
    /// sender, it never drops.
    ///
    /// Range: 1-65536. Default: 256.
    #[serde(default = "default_change_buffer_size")]
    pub change_buffer_size: usize,
}

fn default_change_buffer_size() -> usize {
    256
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            change_buffer_size: default_change_buffer_size(),
        }
    }
}

impl WatcherConfig {
    /// Loads defaults, then the optional `CONFIG_PATH` file, then
    /// `MEGAWATCHER__`-prefixed environment overrides (highest
    /// priority). Does NOT validate; callers chain `validate()`.
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&WatcherConfig::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Range-checks every field, returning the config for chaining.
    pub fn validate(self) -> Result<Self> {
        if self.change_buffer_size == 0 || self.change_buffer_size > 65536 {
            return Err(ConfigError::Invalid {
                field: "change_buffer_size",
                reason: format!("{} outside 1-65536", self.change_buffer_size),
            }
            .into());
        }
        Ok(self)
    }
}
