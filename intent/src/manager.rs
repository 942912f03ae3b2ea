// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The public facade (§4.7): `submit`/`withdraw`/`purge`, reads, runtime
//! registry mutation, and the topology-change recompile sweep. Owns the
//! accumulator's batch executor task and fans each batch out across a
//! bounded pool of concurrent per-key pipeline runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock as AsyncRwLock, Semaphore};

use crate::accumulator::{self, AccumulatorConfig, ReadyGate};
use crate::config::IntentManagerConfig;
use crate::coordinator::InstallCoordinator;
use crate::key::Key;
use crate::model::{AppId, Installable, Intent, IntentData, IntentKind, InstallableKind, State};
use crate::pipeline::{self, Phase, PhaseListener, StepOutcome};
use crate::registry::compiler::{Compiler, CompilerRegistry};
use crate::registry::installer::{Installer, InstallerRegistry};
use crate::resource::{ResourceReclaimer, ResourceService};
use crate::store::{self, Delegate, IntentStore};

/// Emitted on the intent event listener bus for every durable lifecycle
/// transition (§7: "every intent lifecycle transition emits an event").
#[derive(Debug, Clone)]
pub struct IntentEvent {
    pub key: Key,
    pub state: State,
}

pub trait IntentListener: Send + Sync {
    fn on_event(&self, event: IntentEvent);
}

struct Inner {
    store: Arc<dyn IntentStore>,
    compilers: AsyncRwLock<CompilerRegistry>,
    installers: AsyncRwLock<InstallerRegistry>,
    coordinator: InstallCoordinator,
    reclaimer: ResourceReclaimer<Arc<dyn ResourceService>>,
    listeners: StdRwLock<Vec<Arc<dyn IntentListener>>>,
    version_counter: AtomicU64,
    accumulator: accumulator::Accumulator,
    concurrency: Arc<Semaphore>,
}

impl Inner {
    /// Wall-clock millis paired with a process-wide sequence number: the
    /// sequence number alone is already strictly increasing, so ordering
    /// holds even across a clock step backwards.
    fn next_version(&self) -> crate::model::Version {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let counter = self.version_counter.fetch_add(1, Ordering::SeqCst);
        crate::model::Version::new(millis, counter)
    }

    fn emit_event(&self, key: Key, state: State) {
        let event = IntentEvent { key, state };
        for listener in self.listeners.read().unwrap().iter() {
            listener.on_event(event.clone());
        }
    }

    async fn process_one(self: Arc<Self>, pending: IntentData) -> (Key, StepOutcome) {
        let key = pending.key.clone();
        let current = self.store.get_intent_data(&key);
        let compilers = self.compilers.read().await;
        let installers = self.installers.read().await;
        let outcome = pipeline::run(pending, current, &compilers, &installers, &self.coordinator, self.as_ref())
            .await;
        (key, outcome)
    }
}

impl PhaseListener for Inner {
    /// Forwards the transient steps a durable write never carries
    /// (`COMPILING`, `INSTALLING`, `WITHDRAWING`) onto the public intent
    /// event bus, alongside the existing trace log. Terminal phases and
    /// `Initial` are left to [`ManagerDelegate::notify`] and
    /// `submit`/`withdraw`/`purge` respectively, so nothing is emitted twice.
    fn on_phase(&self, key: &Key, phase: Phase) {
        log::trace!("{key}: {phase}");
        if let Some(state) = phase.observable_state() {
            self.emit_event(key.clone(), state);
        }
    }
}

struct ManagerDelegate {
    inner: Arc<Inner>,
}

impl Delegate for ManagerDelegate {
    fn process(&self, data: IntentData) {
        self.inner.accumulator.push(data);
    }

    fn notify(&self, data: IntentData) {
        self.inner.emit_event(data.key.clone(), data.state);
        if data.state == State::Withdrawn {
            self.inner.reclaimer.on_withdrawn(&data, self.inner.store.as_ref());
        }
    }

    fn on_update(&self, data: &IntentData) {
        log::trace!("intent {} tracked at {}", data.key, data.state);
    }
}

/// Drives one delivered batch to completion: every intent in the batch
/// runs concurrently (bounded by `intentManager.numThreads`), in-order
/// writes are collected and applied as a single [`IntentStore::batch_write`],
/// and purge removals bypass the store entirely per §4.5.
async fn run_batch_executor(
    inner: Arc<Inner>,
    mut batches: mpsc::UnboundedReceiver<Vec<IntentData>>,
    gate: ReadyGate,
) {
    while let Some(batch) = batches.recv().await {
        let mut tasks = Vec::with_capacity(batch.len());
        for pending in batch {
            let inner = inner.clone();
            let permit = inner
                .concurrency
                .clone()
                .acquire_owned()
                .await
                .expect("concurrency semaphore is never closed");
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                inner.process_one(pending).await
            }));
        }

        // Tasks are joined in submission order, which preserves the
        // batch's observable write order even though they ran concurrently.
        let mut writes = Vec::new();
        for task in tasks {
            match task.await {
                Ok((_, StepOutcome::Write(data))) => writes.push(data),
                Ok((key, StepOutcome::Remove)) => {
                    inner.store.remove(&key);
                    log::debug!("purged {key}");
                }
                Ok((_, StepOutcome::Skip)) => {}
                Err(join_error) => log::error!("pipeline task panicked: {join_error}"),
            }
        }

        if !writes.is_empty() {
            if let Err(error) = inner.store.batch_write(writes) {
                log::error!("batch write failed: {error}");
            }
        }

        gate.ready();
    }
}

/// Public facade over the intent lifecycle engine.
///
/// `intentInstallSuccess`/`intentInstallFailed` from spec.md §4.7 are not
/// exposed as named methods here: this crate realizes per-intent install
/// feedback as the one-shot [`crate::registry::installer::Completion`]
/// handle bound directly into [`InstallCoordinator::dispatch`], so there
/// is no separate manager-level endpoint for installers to call back
/// into — the coordinator already is that endpoint.
#[derive(Clone)]
pub struct IntentManager {
    inner: Arc<Inner>,
}

impl IntentManager {
    pub fn new(store: Arc<dyn IntentStore>, resource_service: Arc<dyn ResourceService>, config: IntentManagerConfig) -> Self {
        let (accumulator, batch_rx, gate) = accumulator::spawn(AccumulatorConfig::default());

        let inner = Arc::new(Inner {
            store: store.clone(),
            compilers: AsyncRwLock::new(CompilerRegistry::new()),
            installers: AsyncRwLock::new(InstallerRegistry::new()),
            coordinator: InstallCoordinator::new(Duration::from_secs(config.install_timeout_secs)),
            reclaimer: ResourceReclaimer::new(resource_service, config.skip_release_resources_on_withdrawal),
            listeners: StdRwLock::new(Vec::new()),
            version_counter: AtomicU64::new(0),
            accumulator,
            concurrency: Arc::new(Semaphore::new(config.num_threads.max(1))),
        });

        store.set_delegate(Arc::new(ManagerDelegate { inner: inner.clone() }));
        tokio::spawn(run_batch_executor(inner.clone(), batch_rx, gate));

        Self { inner }
    }

    pub fn submit(&self, intent: Intent) -> Result<(), store::Error> {
        let version = self.inner.next_version();
        let data = IntentData::submit(intent, version);
        let (key, state) = (data.key.clone(), data.state);
        self.inner.store.add_pending(data)?;
        self.inner.emit_event(key, state);
        Ok(())
    }

    pub fn withdraw(&self, intent: Intent) -> Result<(), store::Error> {
        let version = self.inner.next_version();
        let data = IntentData::withdraw(intent, version);
        let (key, state) = (data.key.clone(), data.state);
        self.inner.store.add_pending(data)?;
        self.inner.emit_event(key, state);
        Ok(())
    }

    pub fn purge(&self, intent: Intent) -> Result<(), store::Error> {
        let version = self.inner.next_version();
        let data = IntentData::purge(intent, version);
        let (key, state) = (data.key.clone(), data.state);
        self.inner.store.add_pending(data)?;
        self.inner.emit_event(key, state);
        Ok(())
    }

    pub fn get_intent(&self, key: &Key) -> Option<Intent> {
        self.inner.store.get_intent_data(key).map(|data| data.intent)
    }

    pub fn get_intents(&self) -> Vec<IntentData> {
        self.inner.store.get_intents()
    }

    pub fn get_intents_by_app_id(&self, app_id: AppId) -> Vec<IntentData> {
        self.inner
            .store
            .get_intents()
            .into_iter()
            .filter(|data| data.intent.app_id == app_id)
            .collect()
    }

    pub fn get_intent_state(&self, key: &Key) -> Option<State> {
        self.inner.store.get_intent_data(key).map(|data| data.state)
    }

    pub fn get_installable_intents(&self, key: &Key) -> Vec<Installable> {
        self.inner.store.get_intent_data(key).map(|data| data.installables).unwrap_or_default()
    }

    pub fn get_intent_count(&self) -> usize {
        self.inner.store.get_intent_count()
    }

    pub fn is_local(&self, key: &Key) -> bool {
        self.inner.store.is_master(key)
    }

    pub async fn register_compiler(&self, kind: IntentKind, compiler: Box<dyn Compiler>) {
        self.inner.compilers.write().await.register(kind, compiler);
    }

    pub async fn unregister_compiler(&self, kind: &IntentKind) {
        self.inner.compilers.write().await.unregister(kind);
    }

    pub async fn register_installer(&self, kind: InstallableKind, installer: Box<dyn Installer>) {
        self.inner.installers.write().await.register(kind, installer);
    }

    pub async fn unregister_installer(&self, kind: &InstallableKind) {
        self.inner.installers.write().await.unregister(kind);
    }

    pub fn add_listener(&self, listener: Arc<dyn IntentListener>) {
        self.inner.listeners.write().unwrap().push(listener);
    }

    /// Topology-change hook (§4.7). `affected` names intents this node
    /// should reconsider; `compile_all_failed` additionally sweeps every
    /// intent in a retryable state regardless of whether it was named.
    pub fn topology_changed(&self, affected: &[Key], compile_all_failed: bool) {
        for key in affected {
            if !self.inner.store.is_master(key) {
                continue;
            }
            if self.inner.store.get_pending_data(key).is_some() {
                continue;
            }
            if let Some(current) = self.inner.store.get_intent_data(key) {
                self.resubmit(current);
            }
        }

        if compile_all_failed {
            for data in self.inner.store.get_intents() {
                if !self.inner.store.is_master(&data.key) {
                    continue;
                }
                if self.inner.store.get_pending_data(&data.key).is_some() {
                    continue;
                }
                let eligible = matches!(data.state, State::InstallReq | State::Failed | State::WithdrawReq)
                    || data.intent.partial_failure_constraint;
                if eligible {
                    self.resubmit_or_rewithdraw(data);
                }
            }
        }
    }

    fn resubmit(&self, current: IntentData) {
        let version = self.inner.next_version();
        let data = IntentData::submit(current.intent, version);
        let (key, state) = (data.key.clone(), data.state);
        match self.inner.store.add_pending(data) {
            Ok(()) => self.inner.emit_event(key, state),
            Err(error) => log::warn!("topology-change resubmission skipped: {error}"),
        }
    }

    fn resubmit_or_rewithdraw(&self, current: IntentData) {
        let version = self.inner.next_version();
        let data = match current.state {
            State::WithdrawReq | State::Withdrawing => IntentData::withdraw(current.intent, version),
            _ => IntentData::submit(current.intent, version),
        };
        let (key, state) = (data.key.clone(), data.state);
        match self.inner.store.add_pending(data) {
            Ok(()) => self.inner.emit_event(key, state),
            Err(error) => log::warn!("topology-change resubmission skipped: {error}"),
        }
    }
}
