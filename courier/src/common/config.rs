/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::message::BrokerError;

/// Configuration for a [`BrokerAgent`](super::BrokerAgent).
///
/// Every field has a default, so a TOML file only needs to name what it
/// changes:
///
/// ```toml
/// dispatcher_threads = 4
/// connection_retries = 3
/// outgoing_high_water_mark = 500
/// outgoing_low_water_mark = 100
/// deliver_as_raw_binary = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Name used for logging and for the XDG configuration directory.
    pub name: String,
    /// Number of dispatcher tasks draining the incoming queue.
    pub dispatcher_threads: usize,
    /// Open attempts before a channel is reported unavailable.
    pub connection_retries: u32,
    /// Upper bound (exclusive) of the random pause between open attempts.
    pub connection_retry_delay_spread_ms: u64,
    /// Outbound messages in flight at which senders are suspended.
    pub outgoing_high_water_mark: u64,
    /// Outbound level below which suspended senders resume.
    pub outgoing_low_water_mark: u64,
    /// Queued inbound messages at which the transport stops reading.
    pub incoming_high_water_mark: u64,
    /// Inbound level below which the transport resumes reading.
    pub incoming_low_water_mark: u64,
    /// Deliver bodies as raw bytes instead of decoding parameter trees.
    pub deliver_as_raw_binary: bool,
    /// Longest single wait of the I/O worker inside the transport.
    pub poll_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: "courier".to_string(),
            dispatcher_threads: 1,
            connection_retries: 5,
            connection_retry_delay_spread_ms: 100,
            outgoing_high_water_mark: 100,
            outgoing_low_water_mark: 20,
            incoming_high_water_mark: 100,
            incoming_low_water_mark: 20,
            deliver_as_raw_binary: false,
            poll_interval_ms: 50,
        }
    }
}

impl BrokerConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns a normalized copy, or the first configuration error found.
    ///
    /// Low water marks above their high mark are clamped down to it. A low
    /// mark of zero is raised to one so a fully drained queue always reopens
    /// its gate. With `outgoing_low_water_mark = 0` and a high mark of 2, a
    /// suspended sender therefore resumes only once both messages in flight
    /// have finished transmitting.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Configuration`] if `dispatcher_threads`,
    /// `connection_retries`, `poll_interval_ms` or either high water mark is
    /// zero.
    pub fn validated(&self) -> Result<Self, BrokerError> {
        if self.dispatcher_threads == 0 {
            return Err(BrokerError::Configuration("dispatcher_threads must be at least 1".into()));
        }
        if self.connection_retries == 0 {
            return Err(BrokerError::Configuration("connection_retries must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(BrokerError::Configuration("poll_interval_ms must be at least 1".into()));
        }
        if self.outgoing_high_water_mark == 0 || self.incoming_high_water_mark == 0 {
            return Err(BrokerError::Configuration("high water marks must be at least 1".into()));
        }
        let mut config = self.clone();
        config.outgoing_low_water_mark = config.outgoing_low_water_mark.clamp(1, config.outgoing_high_water_mark);
        config.incoming_low_water_mark = config.incoming_low_water_mark.clamp(1, config.incoming_high_water_mark);
        Ok(config)
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Configuration`] if the text is not valid TOML for this
    /// structure.
    pub fn from_toml_str(text: &str) -> Result<Self, BrokerError> {
        toml::from_str::<Self>(text).map_err(|e| BrokerError::Configuration(e.to_string()))
    }

    /// Load configuration from XDG-compliant locations
    ///
    /// Looks for `config.toml` under the `courier` prefix, i.e.
    /// `$XDG_CONFIG_HOME/courier/config.toml` or `~/.config/courier/config.toml`.
    ///
    /// If no configuration file is found, returns the default configuration.
    /// If a configuration file exists but is malformed, logs an error and uses defaults.
    pub fn load() -> Self {
        Self::load_with_prefix("courier")
    }

    /// Same as [`BrokerConfig::load`] with a caller-chosen XDG prefix.
    pub fn load_with_prefix(prefix: &str) -> Self {
        use tracing::{error, info};

        let xdg_dirs = match xdg::BaseDirectories::with_prefix(prefix) {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        let Some(path) = xdg_dirs.find_config_file("config.toml") else {
            info!("No configuration file found, using defaults");
            return Self::default();
        };

        info!("Loading configuration from: {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(config_str) => match Self::from_toml_str(&config_str) {
                Ok(config) => {
                    info!("Successfully loaded configuration");
                    config
                }
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}
