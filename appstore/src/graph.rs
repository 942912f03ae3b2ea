// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `requiredBy` activation reference counting (§3): who is keeping an
//! app activated, as a concurrent multimap (`dashmap`). Circular
//! `requiredApps` during disk bootstrap (§4.8) are rejected separately,
//! by the `visiting` set `Store::bootstrap_one` walks as it loads
//! archives — `install` itself can never introduce a cycle, since every
//! declared `requiredApps` entry must already resolve to a registered
//! app before the new one is accepted.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::model::AppId;

/// Synthetic requester standing in for an explicit, user-driven
/// activation not attributable to any other app (spec.md §3).
pub const CORE: AppId = AppId(0);

/// `requiredBy[appId]`: apps currently holding `appId` activated. An
/// app stays `ACTIVATED` while this set is non-empty.
#[derive(Default)]
pub struct RequiredBy {
    edges: DashMap<AppId, HashSet<AppId>>,
}

impl RequiredBy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `requester` is keeping `app` activated. Returns
    /// `true` if `app` transitioned from no requesters to one.
    pub fn add(&self, app: AppId, requester: AppId) -> bool {
        let mut set = self.edges.entry(app).or_default();
        let was_empty = set.is_empty();
        set.insert(requester);
        was_empty
    }

    /// Drop `requester`'s hold on `app`. Returns `true` if the set is
    /// now empty (app should be deactivated).
    pub fn remove(&self, app: AppId, requester: AppId) -> bool {
        match self.edges.get_mut(&app) {
            Some(mut set) => {
                set.remove(&requester);
                set.is_empty()
            }
            None => true,
        }
    }

    pub fn is_empty(&self, app: AppId) -> bool {
        self.edges.get(&app).map_or(true, |set| set.is_empty())
    }

    pub fn requesters(&self, app: AppId) -> Vec<AppId> {
        self.edges.get(&app).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    /// Drop all bookkeeping for `app`, e.g. once it has been uninstalled.
    pub fn clear(&self, app: AppId) {
        self.edges.remove(&app);
    }
}
