// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Replicated `appActivationTopic` pub/sub (§4.8). Every node's
//! `AppActivator` subscribes; publishing an [`Application`] here is
//! what drives bits-fetch and `APP_ACTIVATED` on every node, including
//! the publisher.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::model::Application;

const CHANNEL_CAPACITY: usize = 256;

pub trait ActivationTopic: Send + Sync {
    fn publish(&self, app: Application);

    /// Register a handler run on the single-threaded app activation
    /// executor (§5) for every published app, including ones this
    /// node itself published.
    fn subscribe(&self, handler: Arc<dyn Fn(Application) + Send + Sync>);
}

/// Single-node stand-in for the replicated topic: a broadcast channel
/// fanned out to an in-process executor task per subscriber.
pub struct MemoryActivationTopic {
    sender: broadcast::Sender<Application>,
}

impl Default for MemoryActivationTopic {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryActivationTopic {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl ActivationTopic for MemoryActivationTopic {
    fn publish(&self, app: Application) {
        // No subscribers is not an error: a node that hasn't finished
        // starting up yet simply misses events before it subscribes,
        // same as the replicated topic during a rolling restart.
        let _ = self.sender.send(app);
    }

    fn subscribe(&self, handler: Arc<dyn Fn(Application) + Send + Sync>) {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            while let Ok(app) = receiver.recv().await {
                handler(app);
            }
        });
    }
}
