// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The distributed application store facade (§4.8): wires the
//! replicated [`AppMap`], the [`ActivationTopic`], the [`BitsChannel`]
//! and the local [`ArchiveStore`] together into `install` / `activate`
//! / `deactivate` / `remove`, plus disk bootstrap on startup.
//!
//! Two dedicated single-threaded executors realize §5's concurrency
//! model: an activation executor drains published apps one at a time
//! (fetching bits before moving on, so `localStartedApps` reflects a
//! dependency-respecting order), and an event executor serializes
//! listener notifications off the map/topic's own threads.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::bits::{self, BitsChannel};
use crate::config::AppStoreConfig;
use crate::disk::ArchiveStore;
use crate::graph::{RequiredBy, CORE};
use crate::map::AppMap;
use crate::model::{AppId, AppState, Application, Description, Event, Holder};
use crate::ports::ApplicationIdService;
use crate::topic::ActivationTopic;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown application {0}")]
    UnknownApp(AppId),
    #[error("missing required apps: {0:?}")]
    MissingDependencies(Vec<String>),
    #[error("disk error: {0}")]
    Disk(#[from] crate::disk::Error),
}

/// Application lifecycle event sink, analogous to
/// [`intent::manager::IntentListener`] for the intent side.
pub trait AppStoreListener: Send + Sync {
    fn on_event(&self, event: Event);
}

struct Inner {
    map: Arc<dyn AppMap>,
    topic: Arc<dyn ActivationTopic>,
    bits: Arc<dyn BitsChannel>,
    archives: ArchiveStore,
    required_by: RequiredBy,
    id_service: Arc<dyn ApplicationIdService>,
    config: AppStoreConfig,
    local_started_apps: DashSet<AppId>,
    listeners: StdRwLock<Vec<Arc<dyn AppStoreListener>>>,
    event_tx: mpsc::UnboundedSender<Event>,
}

/// Public facade over the distributed application store.
#[derive(Clone)]
pub struct AppStore {
    inner: Arc<Inner>,
}

impl AppStore {
    pub fn new(
        map: Arc<dyn AppMap>,
        topic: Arc<dyn ActivationTopic>,
        bits: Arc<dyn BitsChannel>,
        archive_root: impl Into<PathBuf>,
        id_service: Arc<dyn ApplicationIdService>,
        config: AppStoreConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (activation_tx, activation_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            map: map.clone(),
            topic: topic.clone(),
            bits,
            archives: ArchiveStore::new(archive_root),
            required_by: RequiredBy::new(),
            id_service,
            config,
            local_started_apps: DashSet::new(),
            listeners: StdRwLock::new(Vec::new()),
            event_tx,
        });

        map.set_listener(Arc::new(MapBridge { inner: inner.clone() }));

        topic.subscribe(Arc::new(move |app: Application| {
            let _ = activation_tx.send(app);
        }));

        tokio::spawn(run_activation_executor(inner.clone(), activation_rx));
        tokio::spawn(run_event_executor(inner.clone(), event_rx));

        Self { inner }
    }

    pub fn add_listener(&self, listener: Arc<dyn AppStoreListener>) {
        self.inner.listeners.write().unwrap().push(listener);
    }

    pub fn get_app(&self, app_id: AppId) -> Option<Holder> {
        self.inner.map.get(app_id)
    }

    pub fn list_apps(&self) -> Vec<Holder> {
        self.inner.map.entries()
    }

    pub fn is_activated(&self, app_id: AppId) -> bool {
        matches!(self.inner.map.get(app_id).map(|holder| holder.state), Some(AppState::Activated))
    }

    /// Whether `app_id`'s `APP_ACTIVATED` has been delivered on this
    /// node (§5's `localStartedApps`).
    pub fn is_locally_started(&self, app_id: AppId) -> bool {
        self.inner.local_started_apps.contains(&app_id)
    }

    /// Install (`create`) an application archive (§4.8). Rejects the
    /// install and purges the freshly-saved archive if any declared
    /// `requiredApps` entry isn't already known to this node.
    pub async fn install(&self, description: Description, bytes: Vec<u8>) -> Result<AppId, Error> {
        self.inner.archives.save(&description, &bytes).await?;

        let missing: Vec<String> = description
            .required_apps
            .iter()
            .filter(|name| resolve_installed(&self.inner, name.as_str()).is_none())
            .cloned()
            .collect();

        if !missing.is_empty() {
            self.inner.archives.purge(&description.name).await?;
            return Err(Error::MissingDependencies(missing));
        }

        let app_id = self.inner.id_service.register_application(&description.name);
        let app = Application { id: app_id, description };
        if self.inner.map.put_if_absent(Holder::installed(app.clone())).is_none() {
            publish_event(&self.inner, Event::Installed(app));
        }
        Ok(app_id)
    }

    /// Explicit, user-driven activation: the synthetic [`CORE`] app is
    /// recorded as the requester (§3).
    pub async fn activate(&self, app_id: AppId) -> Result<(), Error> {
        activate_inner(self.inner.clone(), app_id, CORE).await
    }

    /// Dependency-propagated activation on behalf of `for_app_id`.
    pub async fn activate_for(&self, app_id: AppId, for_app_id: AppId) -> Result<(), Error> {
        activate_inner(self.inner.clone(), app_id, for_app_id).await
    }

    pub async fn deactivate(&self, app_id: AppId) {
        deactivate_inner(self.inner.clone(), app_id, CORE).await;
    }

    pub async fn deactivate_for(&self, app_id: AppId, for_app_id: AppId) {
        deactivate_inner(self.inner.clone(), app_id, for_app_id).await;
    }

    /// Uninstall: removes dependents first, then the app itself. Archive
    /// purge and `APP_UNINSTALLED` are driven by the map listener so
    /// every removal path (including a dependent cascade) is covered
    /// uniformly.
    pub async fn remove(&self, app_id: AppId) {
        remove_inner(self.inner.clone(), app_id).await;
    }

    /// Replace `app_id`'s published permission set and emit
    /// `APP_PERMISSIONS_CHANGED` (§7). Distinct from `install`'s initial
    /// permissions snapshot: this is how a later, out-of-band grant or
    /// revocation (e.g. from an admin action) is reflected on the
    /// replicated holder.
    pub fn update_permissions(&self, app_id: AppId, permissions: Vec<String>) -> Result<(), Error> {
        let holder = self.inner.map.get(app_id).ok_or(Error::UnknownApp(app_id))?;
        let updated = Holder {
            permissions: permissions.clone(),
            ..holder
        };
        self.inner.map.conditional_update(app_id, updated, |_| true);
        publish_event(&self.inner, Event::PermissionsChanged(app_id, permissions));
        Ok(())
    }

    /// Disk bootstrap on store-ready (§4.8): walk local archives,
    /// reconcile each against the replicated map, and reactivate any
    /// marked active on disk. Apps whose `requiredApps` form a cycle
    /// are abandoned with a logged warning; neither gets a map entry.
    pub async fn bootstrap(&self) {
        let names = self.inner.archives.list_apps().await;
        let visiting = Arc::new(StdMutex::new(HashSet::new()));
        let loaded = Arc::new(StdMutex::new(HashSet::new()));

        for name in names {
            bootstrap_one(self.inner.clone(), name, visiting.clone(), loaded.clone()).await;
        }
    }
}

fn resolve_installed(inner: &Arc<Inner>, name: &str) -> Option<AppId> {
    let id = inner.id_service.get_app_id(name)?;
    inner.map.get(id)?;
    Some(id)
}

fn publish_event(inner: &Arc<Inner>, event: Event) {
    let _ = inner.event_tx.send(event);
}

fn dependents_of(inner: &Arc<Inner>, app_id: AppId) -> Vec<AppId> {
    let Some(holder) = inner.map.get(app_id) else {
        return Vec::new();
    };
    let name = holder.app.name().to_string();
    inner
        .map
        .entries()
        .into_iter()
        .filter(|other| other.app.id != app_id && other.app.required_apps().iter().any(|required| required == &name))
        .map(|other| other.app.id)
        .collect()
}

/// Activation walk (§4.8 `activate`): records the requester, recurses
/// into declared dependencies first (so a dependency's own publish
/// happens, and is processed by the activation executor, before its
/// dependent's), then flips the map entry and publishes.
fn activate_inner(inner: Arc<Inner>, app_id: AppId, for_app_id: AppId) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> {
    Box::pin(async move {
        let holder = inner.map.get(app_id).ok_or(Error::UnknownApp(app_id))?;
        inner.required_by.add(app_id, for_app_id);

        let required_apps = holder.app.required_apps().to_vec();
        for required_name in required_apps {
            let required_id = inner
                .id_service
                .get_app_id(&required_name)
                .ok_or_else(|| Error::MissingDependencies(vec![required_name.clone()]))?;
            activate_inner(inner.clone(), required_id, app_id).await?;
        }

        let activated = inner.map.conditional_update(app_id, holder.with_state(AppState::Activated), |existing| {
            existing.is_some_and(|holder| holder.state != AppState::Activated)
        });
        inner.topic.publish(activated.app);
        Ok(())
    })
}

/// Deactivation walk (§4.8 `deactivate`): force-deactivates dependents
/// first, then drops `forAppId`'s hold; once `requiredBy` is empty the
/// entry flips to `DEACTIVATED` and the same release cascades to its
/// own required apps.
fn deactivate_inner(inner: Arc<Inner>, app_id: AppId, for_app_id: AppId) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        for dependent in dependents_of(&inner, app_id) {
            if matches!(inner.map.get(dependent).map(|holder| holder.state), Some(AppState::Activated)) {
                force_deactivate(inner.clone(), dependent).await;
            }
        }

        if !inner.required_by.remove(app_id, for_app_id) {
            return;
        }

        let Some(holder) = inner.map.get(app_id) else {
            return;
        };
        if holder.state != AppState::Activated {
            return;
        }

        inner.map.conditional_update(app_id, holder.with_state(AppState::Deactivated), |existing| {
            existing.is_some_and(|holder| holder.state == AppState::Activated)
        });
        inner.local_started_apps.remove(&app_id);
        publish_event(&inner, Event::Deactivated(app_id));

        let required_apps = holder.app.required_apps().to_vec();
        for required_name in required_apps {
            if let Some(required_id) = inner.id_service.get_app_id(&required_name) {
                deactivate_inner(inner.clone(), required_id, app_id).await;
            }
        }
    })
}

/// Unconditionally drops every requester of `app_id`, driving it
/// through `deactivate` once per requester until none remain.
fn force_deactivate(inner: Arc<Inner>, app_id: AppId) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        for requester in inner.required_by.requesters(app_id) {
            deactivate_inner(inner.clone(), app_id, requester).await;
        }
    })
}

fn remove_inner(inner: Arc<Inner>, app_id: AppId) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        for dependent in dependents_of(&inner, app_id) {
            remove_inner(inner.clone(), dependent).await;
        }
        inner.required_by.clear(app_id);
        inner.map.remove(app_id);
    })
}

/// Bridges [`crate::map::MapListener`] into `APP_UNINSTALLED` + local
/// archive purge (§4.8 `remove`: "map listener triggers APP_UNINSTALLED
/// and local archive purge"), covering every removal path uniformly.
struct MapBridge {
    inner: Arc<Inner>,
}

impl crate::map::MapListener for MapBridge {
    fn on_update(&self, _id: AppId, old: Option<Holder>, new: Option<Holder>) {
        if let (Some(old), None) = (old, new) {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let name = old.app.name().to_string();
                if let Err(error) = inner.archives.purge(&name).await {
                    log::error!("failed to purge archive for {name}: {error}");
                }
                publish_event(&inner, Event::Uninstalled(old.app.id));
            });
        }
    }
}

async fn run_event_executor(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        for listener in inner.listeners.read().unwrap().iter() {
            listener.on_event(event.clone());
        }
    }
}

/// Single-threaded app activation executor (§5): processes one
/// published [`Application`] at a time, fetching bits before moving on
/// to the next, so `localStartedApps` reflects a dependency-respecting
/// order without any extra bookkeeping.
async fn run_activation_executor(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<Application>) {
    while let Some(app) = rx.recv().await {
        handle_activated(&inner, app).await;
    }
}

async fn handle_activated(inner: &Arc<Inner>, app: Application) {
    let name = app.name().to_string();

    if !inner.archives.has_archive(&name).await {
        match bits::fetch(inner.bits.clone(), &name, Duration::from_secs(inner.config.fetch_timeout_secs)).await {
            Ok(bytes) => {
                if let Err(error) = inner.archives.save(&app.description, &bytes).await {
                    log::error!("failed to persist fetched bits for {name}: {error}");
                    return;
                }
                publish_event(inner, Event::Installed(app.clone()));
            }
            Err(error) => {
                // §7 `BitsUnavailable`: activation stays pending; a later
                // map/topic event or retry may succeed.
                log::warn!("{error}; activation of {name} remains pending");
                return;
            }
        }
    }

    inner.local_started_apps.insert(app.id);
    publish_event(inner, Event::Activated(app.id));
}

fn bootstrap_one(
    inner: Arc<Inner>,
    name: String,
    visiting: Arc<StdMutex<HashSet<String>>>,
    loaded: Arc<StdMutex<HashSet<String>>>,
) -> Pin<Box<dyn Future<Output = Option<AppId>> + Send>> {
    Box::pin(async move {
        if loaded.lock().unwrap().contains(&name) {
            return inner.id_service.get_app_id(&name);
        }
        {
            let mut visiting_guard = visiting.lock().unwrap();
            if visiting_guard.contains(&name) {
                log::warn!("Circular app dependency detected while loading {name}");
                return None;
            }
            visiting_guard.insert(name.clone());
        }

        let description = match load_with_retries(&inner, &name).await {
            Some(description) => description,
            None => {
                visiting.lock().unwrap().remove(&name);
                return None;
            }
        };

        for required_name in description.required_apps.clone() {
            if bootstrap_one(inner.clone(), required_name.clone(), visiting.clone(), loaded.clone())
                .await
                .is_none()
            {
                log::warn!("abandoning bootstrap of {name}: dependency {required_name} unavailable");
                visiting.lock().unwrap().remove(&name);
                return None;
            }
        }

        let app_id = inner.id_service.register_application(&name);
        let app = Application {
            id: app_id,
            description: description.clone(),
        };
        reconcile(&inner, app_id, &app).await;

        if inner.archives.is_active(&name).await {
            if let Err(error) = activate_inner(inner.clone(), app_id, CORE).await {
                log::warn!("failed to activate {name} during bootstrap: {error}");
            }
        }

        visiting.lock().unwrap().remove(&name);
        loaded.lock().unwrap().insert(name);
        Some(app_id)
    })
}

/// Version reconciliation (§4.8): when the replicated holder's app
/// description disagrees with what's on disk, rebuild it from disk
/// metadata while preserving the holder's current activation state.
async fn reconcile(inner: &Arc<Inner>, app_id: AppId, app: &Application) {
    match inner.map.get(app_id) {
        Some(existing) if existing.app.description.version != app.description.version => {
            let rebuilt = Holder {
                app: app.clone(),
                state: existing.state,
                permissions: existing.permissions,
            };
            inner.map.conditional_update(app_id, rebuilt, |_| true);
            log::info!("reconciled {} from disk metadata after a version change", app.name());
        }
        Some(_) => {}
        None => {
            if inner.map.put_if_absent(Holder::installed(app.clone())).is_none() {
                publish_event(inner, Event::Installed(app.clone()));
            }
        }
    }
}

async fn load_with_retries(inner: &Arc<Inner>, name: &str) -> Option<Description> {
    let mut attempt = 0u32;
    loop {
        match inner.archives.load_description(name).await {
            Ok(description) => return Some(description),
            Err(error) => {
                attempt += 1;
                if attempt >= inner.config.bootstrap_retries {
                    log::error!("giving up loading {name} after {attempt} attempts: {error}");
                    return None;
                }
                let backoff = jittered_backoff(Duration::from_secs(inner.config.bootstrap_retry_backoff_secs), name, attempt);
                log::warn!("retry {attempt} loading {name} in {backoff:?}: {error}");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Deterministic stand-in for the "2s jitter" spec.md calls for,
/// without pulling in a dedicated random crate for one call site.
fn jittered_backoff(base: Duration, salt: &str, attempt: u32) -> Duration {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    salt.hash(&mut hasher);
    attempt.hash(&mut hasher);
    let jitter_millis = hasher.finish() % 500;
    base + Duration::from_millis(jitter_millis)
}

/// Reference [`ApplicationIdService`] for tests and single-node
/// deployments: assigns ids sequentially on first registration and is
/// idempotent on every subsequent call for the same name.
#[derive(Default)]
pub struct MemoryIdService {
    by_name: dashmap::DashMap<String, AppId>,
    next: std::sync::atomic::AtomicU16,
}

impl MemoryIdService {
    pub fn new() -> Self {
        Self {
            by_name: dashmap::DashMap::new(),
            next: std::sync::atomic::AtomicU16::new(1),
        }
    }
}

impl ApplicationIdService for MemoryIdService {
    fn register_application(&self, name: &str) -> AppId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = AppId(self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        *self.by_name.entry(name.to_string()).or_insert(id)
    }

    fn get_app_id(&self, name: &str) -> Option<AppId> {
        self.by_name.get(name).map(|entry| *entry)
    }
}
