// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Coalesces per-key [`IntentData`] updates into batches for the phase
//! pipeline (§4.4). Flushes on a time window or a size threshold,
//! whichever fires first; holds further batches until the previous one
//! signals [`ReadyGate::ready`], so at most one batch is ever in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use crate::key::Key;
use crate::model::IntentData;

#[derive(Debug, Clone, Copy)]
pub struct AccumulatorConfig {
    pub window: Duration,
    pub size_threshold: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(50),
            size_threshold: 500,
        }
    }
}

/// Push side of the accumulator: every `process(data)` callback from
/// the store lands here.
#[derive(Clone)]
pub struct Accumulator {
    input: mpsc::UnboundedSender<IntentData>,
}

impl Accumulator {
    pub fn push(&self, data: IntentData) {
        // The receiving task only ever shuts down when every sender,
        // including this one, has dropped, so a send failure here can't
        // happen in practice; ignore it rather than panic on shutdown races.
        let _ = self.input.send(data);
    }
}

/// Signals the accumulator that the previous batch finished processing
/// and the next one may be delivered.
#[derive(Clone)]
pub struct ReadyGate {
    busy: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ReadyGate {
    pub fn ready(&self) {
        self.busy.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

/// Last-write-wins buffer, keyed by intent key, preserving first-seen
/// order so unrelated keys in a batch keep a stable relative order.
#[derive(Default)]
struct DedupBuffer {
    order: Vec<Key>,
    latest: HashMap<Key, IntentData>,
}

impl DedupBuffer {
    fn insert(&mut self, data: IntentData) {
        if !self.latest.contains_key(&data.key) {
            self.order.push(data.key.clone());
        } else if let Some(existing) = self.latest.get(&data.key) {
            // Only the highest-version update for a key survives a window.
            if data.version <= existing.version {
                return;
            }
        }
        self.latest.insert(data.key.clone(), data);
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn drain(&mut self) -> Vec<IntentData> {
        let order = std::mem::take(&mut self.order);
        let mut latest = std::mem::take(&mut self.latest);
        order.into_iter().filter_map(|key| latest.remove(&key)).collect()
    }
}

/// Spawns the accumulator's coalescing task. Returns the push handle,
/// a channel yielding ready batches, and the gate the batch consumer
/// must signal after each batch completes.
pub fn spawn(config: AccumulatorConfig) -> (Accumulator, mpsc::UnboundedReceiver<Vec<IntentData>>, ReadyGate) {
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<IntentData>();
    let (output_tx, output_rx) = mpsc::unbounded_channel::<Vec<IntentData>>();

    let busy = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());
    let gate = ReadyGate {
        busy: busy.clone(),
        notify: notify.clone(),
    };

    tokio::spawn(async move {
        let mut buffer = DedupBuffer::default();
        let mut interval = tokio::time::interval(config.window);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                maybe_ready = notify.notified() => {
                    let _ = maybe_ready;
                    try_flush(&mut buffer, &busy, &output_tx);
                }
                incoming = input_rx.recv() => {
                    match incoming {
                        Some(data) => {
                            buffer.insert(data);
                            if buffer.len() >= config.size_threshold {
                                try_flush(&mut buffer, &busy, &output_tx);
                            }
                        }
                        None => break,
                    }
                }
                _ = interval.tick() => {
                    try_flush(&mut buffer, &busy, &output_tx);
                }
            }
        }
    });

    (Accumulator { input: input_tx }, output_rx, gate)
}

fn try_flush(buffer: &mut DedupBuffer, busy: &AtomicBool, output: &mpsc::UnboundedSender<Vec<IntentData>>) {
    if buffer.len() == 0 || busy.load(Ordering::SeqCst) {
        return;
    }
    busy.store(true, Ordering::SeqCst);
    let _ = output.send(buffer.drain());
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{AppId, Intent, Params, Version};

    fn sample(key: &str, version: u64) -> IntentData {
        IntentData::submit(
            Intent::new(
                Key::named(AppId(1), key),
                AppId(1),
                None,
                Params::PointToPoint {
                    ingress: "a".into(),
                    egress: "b".into(),
                },
            ),
            Version::new(version, 0),
        )
    }

    #[tokio::test]
    async fn dedups_to_highest_version_per_key() {
        let config = AccumulatorConfig {
            window: Duration::from_millis(20),
            size_threshold: 500,
        };
        let (acc, mut out, gate) = spawn(config);

        acc.push(sample("k", 1));
        acc.push(sample("k", 3));
        acc.push(sample("k", 2));

        let batch = out.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].version, Version::new(3, 0));
        gate.ready();
    }

    #[tokio::test]
    async fn size_threshold_flushes_before_window() {
        let config = AccumulatorConfig {
            window: Duration::from_secs(10),
            size_threshold: 2,
        };
        let (acc, mut out, gate) = spawn(config);

        acc.push(sample("a", 1));
        acc.push(sample("b", 1));

        let batch = tokio::time::timeout(Duration::from_millis(200), out.recv())
            .await
            .expect("flush should happen on size threshold, not window")
            .unwrap();
        assert_eq!(batch.len(), 2);
        gate.ready();
    }

    #[tokio::test]
    async fn holds_next_batch_until_ready() {
        let config = AccumulatorConfig {
            window: Duration::from_millis(15),
            size_threshold: 500,
        };
        let (acc, mut out, gate) = spawn(config);

        acc.push(sample("a", 1));
        let first = out.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        // A second key arrives while the first batch is "in flight".
        acc.push(sample("b", 1));
        tokio::time::sleep(Duration::from_millis(60)).await;

        // No batch should have been delivered yet: the gate hasn't fired.
        assert!(out.try_recv().is_err());

        gate.ready();
        let second = tokio::time::timeout(Duration::from_millis(200), out.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.len(), 1);
    }
}
