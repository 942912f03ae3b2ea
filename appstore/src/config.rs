// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Layered YAML configuration for the application store, loaded
//! through [`config::Manager`].

use config::Config;
use serde::{Deserialize, Serialize};

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_bootstrap_retries() -> u32 {
    5
}

fn default_bootstrap_retry_backoff_secs() -> u64 {
    2
}

/// `app_store.yaml`: tunables for archive transfer and disk bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStoreConfig {
    /// How long a bits request waits on peers before giving up
    /// (spec's `FETCH_TIMEOUT`, §4.8).
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Load attempts for a single app during disk bootstrap before it
    /// is left uninstalled.
    #[serde(default = "default_bootstrap_retries")]
    pub bootstrap_retries: u32,

    /// Base backoff between bootstrap load attempts.
    #[serde(default = "default_bootstrap_retry_backoff_secs")]
    pub bootstrap_retry_backoff_secs: u64,
}

impl Default for AppStoreConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            bootstrap_retries: default_bootstrap_retries(),
            bootstrap_retry_backoff_secs: default_bootstrap_retry_backoff_secs(),
        }
    }
}

impl Config for AppStoreConfig {
    fn domain() -> String {
        "app_store".into()
    }

    fn merge(self, other: Self) -> Self {
        other
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = AppStoreConfig::default();
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.bootstrap_retries, 5);
    }

    #[test]
    fn later_layer_wins_on_merge() {
        let vendor = AppStoreConfig::default();
        let admin = AppStoreConfig {
            fetch_timeout_secs: 30,
            ..AppStoreConfig::default()
        };
        let merged = vendor.merge(admin);
        assert_eq!(merged.fetch_timeout_secs, 30);
    }
}
