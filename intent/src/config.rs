// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Layered YAML configuration for the intent lifecycle engine, loaded
//! through [`config::Manager`].

use config::Config;
use serde::{Deserialize, Serialize};

fn default_num_threads() -> usize {
    12
}

fn default_install_timeout_secs() -> u64 {
    30
}

fn default_fallback_poll_frequency_secs() -> u64 {
    30
}

/// `intent_manager.yaml`: tunables for the manager's own behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentManagerConfig {
    /// Skip resource reclamation entirely on withdrawal, leaving
    /// reservations in place. Off by default; exists for deployments
    /// that reclaim out of band.
    #[serde(default)]
    pub skip_release_resources_on_withdrawal: bool,

    /// Worker pool size for the compile/install pipeline.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// How long a single intent's install phase waits on its
    /// installers before treating the batch as timed out.
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
}

impl Default for IntentManagerConfig {
    fn default() -> Self {
        Self {
            skip_release_resources_on_withdrawal: false,
            num_threads: default_num_threads(),
            install_timeout_secs: default_install_timeout_secs(),
        }
    }
}

impl Config for IntentManagerConfig {
    fn domain() -> String {
        "intent_manager".into()
    }

    fn merge(self, other: Self) -> Self {
        other
    }
}

/// `group_manager.yaml`: tunables for the flow/group installer
/// collaborator's fallback polling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupManagerConfig {
    /// Poll frequency used when a device can't push group-state
    /// change notifications on its own.
    #[serde(default = "default_fallback_poll_frequency_secs")]
    pub fallback_poll_frequency_secs: u64,

    /// Purge group state for a device as soon as it disconnects,
    /// rather than waiting for it to reconnect and resync.
    #[serde(default)]
    pub purge_on_disconnection: bool,
}

impl Default for GroupManagerConfig {
    fn default() -> Self {
        Self {
            fallback_poll_frequency_secs: default_fallback_poll_frequency_secs(),
            purge_on_disconnection: false,
        }
    }
}

impl Config for GroupManagerConfig {
    fn domain() -> String {
        "group_manager".into()
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
        let config = IntentManagerConfig::default();
        assert_eq!(config.num_threads, 12);
        assert_eq!(config.install_timeout_secs, 30);
        assert!(!config.skip_release_resources_on_withdrawal);
    }

    #[test]
    fn later_layer_wins_on_merge() {
        let vendor = IntentManagerConfig::default();
        let admin = IntentManagerConfig {
            num_threads: 16,
            ..IntentManagerConfig::default()
        };
        let merged = vendor.merge(admin);
        assert_eq!(merged.num_threads, 16);
    }

    #[test]
    fn group_manager_defaults_match_spec() {
        let config = GroupManagerConfig::default();
        assert_eq!(config.fallback_poll_frequency_secs, 30);
        assert!(!config.purge_on_disconnection);
    }
}
