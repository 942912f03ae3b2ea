// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Contract for the replicated intent store (§4.1). The real store is a
//! cluster-partitioned map with a single master per key; this crate
//! only consumes the operations and delegate callbacks below, and ships
//! an in-memory reference implementation for single-node use and tests.

use std::sync::Arc;

use thiserror::Error;

use crate::key::Key;
use crate::model::IntentData;

pub mod memory;

/// Delegate callbacks the store invokes back into the owner
/// ([`IntentManager`](crate::manager::IntentManager)).
pub trait Delegate: Send + Sync {
    /// A new pending request was enqueued for `data.key`.
    fn process(&self, data: IntentData);

    /// `data` was just durably written as the new `current` for its key.
    fn notify(&self, data: IntentData);

    /// Tracking hook fired alongside `notify` for metrics/observability;
    /// separated from `notify` because listeners that only want to
    /// count updates shouldn't have to interpret state transitions.
    fn on_update(&self, data: &IntentData);
}

/// Replicated, partitioned map of intent keys to (current, pending)
/// data, with a single master per key (§4.1).
pub trait IntentStore: Send + Sync {
    /// Enqueue `data` as the pending request for its key and invoke
    /// [`Delegate::process`]. Silently ignored (per [`Error::NotMaster`])
    /// if this node isn't master for the key.
    fn add_pending(&self, data: IntentData) -> Result<(), Error>;

    fn get_intent_data(&self, key: &Key) -> Option<IntentData>;

    fn get_pending_data(&self, key: &Key) -> Option<IntentData>;

    fn get_intents(&self) -> Vec<IntentData>;

    fn get_intent_count(&self) -> usize;

    fn is_master(&self, key: &Key) -> bool;

    /// Atomically persist a batch of updated data, preserving list
    /// order for per-key observable state, then invoke
    /// [`Delegate::notify`]/[`Delegate::on_update`] for each entry.
    fn batch_write(&self, batch: Vec<IntentData>) -> Result<(), Error>;

    /// Drop `key` and any current/pending data for it entirely. Used by
    /// the `Purging` phase (§4.5), whose final phase "produces null (no
    /// write)" rather than a [`batch_write`](Self::batch_write) entry.
    fn remove(&self, key: &Key);

    fn set_delegate(&self, delegate: Arc<dyn Delegate>);
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("not master for this key")]
    NotMaster,

    #[error("batch write failed: {0}")]
    WriteFailed(String),
}
