// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Replicated `apps: AppId → Holder` map (§4.8). Stands in for the
//! cluster consistent map in tests and single-node deployments, the
//! same role [`intent::store::memory::MemoryIntentStore`] plays for
//! the intent store.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::model::{AppId, Holder};

/// Notified whenever an entry in the map changes, mirroring
/// [`intent::store::Delegate`]'s role for the intent store. The app
/// store uses this to drive `APP_UNINSTALLED` on entry removal and to
/// trigger bits fetch on a freshly observed holder.
pub trait MapListener: Send + Sync {
    fn on_update(&self, id: AppId, old: Option<Holder>, new: Option<Holder>);
}

/// Replicated map abstraction over `AppId → Holder`.
pub trait AppMap: Send + Sync {
    /// Insert `holder` only if no entry exists yet for its id. Returns
    /// the existing entry when one was already present (install is
    /// idempotent per spec.md §4.8).
    fn put_if_absent(&self, holder: Holder) -> Option<Holder>;

    fn get(&self, id: AppId) -> Option<Holder>;

    /// Replace the entry for `id` with `new` iff `predicate` holds for
    /// the current entry (or there is none). Returns the value stored
    /// after the call, i.e. `new` on success or the unchanged existing
    /// entry on failure.
    fn conditional_update(&self, id: AppId, new: Holder, predicate: fn(Option<&Holder>) -> bool) -> Holder;

    fn remove(&self, id: AppId) -> Option<Holder>;

    fn entries(&self) -> Vec<Holder>;

    fn set_listener(&self, listener: Arc<dyn MapListener>);
}

#[derive(Default)]
pub struct MemoryAppMap {
    entries: DashMap<AppId, Holder>,
    listener: RwLock<Option<Arc<dyn MapListener>>>,
}

impl MemoryAppMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, id: AppId, old: Option<Holder>, new: Option<Holder>) {
        if let Some(listener) = self.listener.read().unwrap().clone() {
            listener.on_update(id, old, new);
        }
    }
}

impl AppMap for MemoryAppMap {
    fn put_if_absent(&self, holder: Holder) -> Option<Holder> {
        let id = holder.app.id;
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Some(existing.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(holder.clone());
                self.notify(id, None, Some(holder));
                None
            }
        }
    }

    fn get(&self, id: AppId) -> Option<Holder> {
        self.entries.get(&id).map(|entry| entry.clone())
    }

    fn conditional_update(&self, id: AppId, new: Holder, predicate: fn(Option<&Holder>) -> bool) -> Holder {
        let old = self.entries.get(&id).map(|entry| entry.clone());
        if predicate(old.as_ref()) {
            self.entries.insert(id, new.clone());
            self.notify(id, old, Some(new.clone()));
            new
        } else {
            old.unwrap_or(new)
        }
    }

    fn remove(&self, id: AppId) -> Option<Holder> {
        let removed = self.entries.remove(&id).map(|(_, holder)| holder);
        if let Some(holder) = &removed {
            self.notify(id, Some(holder.clone()), None);
        }
        removed
    }

    fn entries(&self) -> Vec<Holder> {
        self.entries.iter().map(|entry| entry.clone()).collect()
    }

    fn set_listener(&self, listener: Arc<dyn MapListener>) {
        *self.listener.write().unwrap() = Some(listener);
    }
}
