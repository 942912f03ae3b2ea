// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `app-bits-request` wire subject (§4.8, §6): archive transfer
//! between cluster peers when a node observes a map entry for an
//! application it doesn't have bits for locally.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Cluster channel bound to the `app-bits-request` subject. One
/// implementation per transport; the in-memory reference below knows
/// no peers, so every fetch times out, matching a genuinely isolated
/// single-node deployment.
pub trait BitsChannel: Send + Sync + 'static {
    /// Request archive bytes for `name` from `peer`. `None` means the
    /// peer responded but doesn't have the bits (empty payload) or
    /// didn't respond at all; both are "try the next peer".
    fn request(&self, peer: &str, name: &str) -> Option<Vec<u8>>;

    /// Cluster peers to try, any order.
    fn peers(&self) -> Vec<String>;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no peer served bits for {0} within the fetch timeout")]
    BitsUnavailable(String),
}

/// Try every peer in turn until one serves non-empty bytes, bounded
/// overall by `timeout` (spec's `FETCH_TIMEOUT`).
pub async fn fetch(channel: Arc<dyn BitsChannel>, name: &str, timeout: Duration) -> Result<Vec<u8>, Error> {
    let name = name.to_string();
    let found = tokio::time::timeout(timeout, async {
        for peer in channel.peers() {
            let channel = channel.clone();
            let peer = peer.clone();
            let name = name.clone();
            let response = tokio::task::spawn_blocking(move || channel.request(&peer, &name))
                .await
                .unwrap_or(None);
            if let Some(bytes) = response {
                return Some(bytes);
            }
        }
        None
    })
    .await
    .unwrap_or(None);

    found.ok_or_else(|| Error::BitsUnavailable(name))
}

/// Reference [`BitsChannel`] for single-node tests: serves from a
/// fixed in-memory map of peer name → archive bytes, simulating peers
/// that already have the app.
#[derive(Default)]
pub struct MemoryBitsChannel {
    peers: Vec<(String, dashmap::DashMap<String, Vec<u8>>)>,
}

impl MemoryBitsChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peers.push((peer.into(), dashmap::DashMap::new()));
        self
    }

    pub fn stock(&self, peer: &str, name: &str, bytes: Vec<u8>) {
        if let Some((_, bits)) = self.peers.iter().find(|(id, _)| id == peer) {
            bits.insert(name.to_string(), bytes);
        }
    }
}

impl BitsChannel for MemoryBitsChannel {
    fn request(&self, peer: &str, name: &str) -> Option<Vec<u8>> {
        self.peers
            .iter()
            .find(|(id, _)| id == peer)
            .and_then(|(_, bits)| bits.get(name).map(|entry| entry.clone()))
    }

    fn peers(&self) -> Vec<String> {
        self.peers.iter().map(|(id, _)| id.clone()).collect()
    }
}
