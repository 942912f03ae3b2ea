// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Narrow service contracts the manager depends on but does not own:
//! cluster messaging, mastership, and application identity are all
//! owned by collaborators outside this crate.

/// Cluster-wide request/response and publish/subscribe channel used to
/// forward topology-change notifications and cross-node RPCs.
pub trait ClusterChannel: Send + Sync {
    fn send_and_receive(&self, subject: &str, payload: &[u8]) -> Option<Vec<u8>>;

    fn subscribe(&self, subject: &str, handler: Box<dyn Fn(&[u8]) + Send + Sync>);
}

/// Cluster mastership oracle, consulted by [`crate::store::IntentStore`]
/// implementations that partition ownership across nodes.
pub trait MastershipService: Send + Sync {
    fn is_local_master(&self, partition_key: &str) -> bool;
}

/// Resolves the caller-stable numeric identifier assigned to an
/// application name, registering it on first use.
pub trait ApplicationIdService: Send + Sync {
    fn register_application(&self, name: &str) -> crate::model::AppId;

    fn get_app_id(&self, name: &str) -> Option<crate::model::AppId>;
}
