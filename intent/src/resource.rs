// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Resource reclamation on withdrawal (§4.7). Reservations are tracked
//! by an external [`ResourceService`] under a consumer tag; this module
//! only decides *when* it's safe to release that tag, not how
//! reservations are actually stored.

use crate::model::{IntentData, State};
use crate::store::IntentStore;

/// External reservation tracker an intent's compiled installables draw
/// from (link bandwidth, VLAN ids, whatever the compiler reserved
/// ahead of time). Consumer tags are [`crate::model::Intent::resource_consumer`].
pub trait ResourceService: Send + Sync {
    /// Release whatever is reserved under `consumer`. Returns whether
    /// anything was actually released.
    fn release(&self, consumer: &str) -> bool;
}

impl ResourceService for std::sync::Arc<dyn ResourceService> {
    fn release(&self, consumer: &str) -> bool {
        self.as_ref().release(consumer)
    }
}

/// Decides whether a just-withdrawn intent's resources can be
/// released, and does so through a [`ResourceService`].
pub struct ResourceReclaimer<S> {
    service: S,
    skip_on_withdrawal: bool,
}

impl<S: ResourceService> ResourceReclaimer<S> {
    pub fn new(service: S, skip_on_withdrawal: bool) -> Self {
        Self { service, skip_on_withdrawal }
    }

    /// Called by the manager after a `WITHDRAWN` write. If the intent
    /// shares a resource group with other intents, the group's
    /// reservation is only released once every member has withdrawn;
    /// otherwise resources are released under the intent's own key.
    pub fn on_withdrawn(&self, data: &IntentData, store: &dyn IntentStore) {
        if self.skip_on_withdrawal {
            return;
        }
        if data.state != State::Withdrawn {
            return;
        }

        if let Some(group) = &data.intent.resource_group {
            let group_still_active = store.get_intents().iter().any(|other| {
                other.key != data.key
                    && other.intent.resource_group.as_deref() == Some(group.as_str())
                    && other.state != State::Withdrawn
            });
            if group_still_active {
                return;
            }
            self.service.release(group);
        } else {
            self.service.release(&data.key.to_string());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::Key;
    use crate::model::{AppId, Intent, Params, Version};
    use crate::store::memory::MemoryIntentStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);
    impl ResourceService for Recording {
        fn release(&self, consumer: &str) -> bool {
            self.0.lock().unwrap().push(consumer.to_string());
            true
        }
    }

    fn withdrawn(key: Key, group: Option<&str>) -> IntentData {
        let intent = Intent::new(
            key.clone(),
            AppId(1),
            group.map(String::from),
            Params::PointToPoint {
                ingress: "p1".into(),
                egress: "p2".into(),
            },
        );
        let mut data = IntentData::withdraw(intent, Version::new(1, 0));
        data.state = State::Withdrawn;
        data
    }

    #[test]
    fn releases_under_key_without_a_resource_group() {
        let store = MemoryIntentStore::new();
        let reclaimer = ResourceReclaimer::new(Recording::default(), false);

        let data = withdrawn(Key::named(AppId(1), "a"), None);
        reclaimer.on_withdrawn(&data, &store);

        assert_eq!(reclaimer.service.0.lock().unwrap().as_slice(), &[data.key.to_string()]);
    }

    #[test]
    fn holds_group_release_until_every_member_withdraws() {
        let store = MemoryIntentStore::new();
        let reclaimer = ResourceReclaimer::new(Recording::default(), false);

        let sibling_key = Key::named(AppId(1), "sibling");
        let mut sibling = withdrawn(sibling_key, Some("grp"));
        sibling.state = State::Installed;
        store.batch_write(vec![sibling]).unwrap();

        let data = withdrawn(Key::named(AppId(1), "a"), Some("grp"));
        reclaimer.on_withdrawn(&data, &store);

        assert!(reclaimer.service.0.lock().unwrap().is_empty());
    }

    #[test]
    fn releases_group_once_last_member_withdraws() {
        let store = MemoryIntentStore::new();
        let reclaimer = ResourceReclaimer::new(Recording::default(), false);

        let data = withdrawn(Key::named(AppId(1), "a"), Some("grp"));
        reclaimer.on_withdrawn(&data, &store);

        assert_eq!(reclaimer.service.0.lock().unwrap().as_slice(), &["grp".to_string()]);
    }

    #[test]
    fn skip_flag_suppresses_release_entirely() {
        let store = MemoryIntentStore::new();
        let reclaimer = ResourceReclaimer::new(Recording::default(), true);

        let data = withdrawn(Key::named(AppId(1), "a"), None);
        reclaimer.on_withdrawn(&data, &store);

        assert!(reclaimer.service.0.lock().unwrap().is_empty());
    }
}
