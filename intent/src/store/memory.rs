// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Single-node, in-memory [`IntentStore`]. Stands in for the cluster
//! replicated map in tests and single-node deployments; `is_master` is
//! pluggable so callers can simulate non-mastership for a key.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::key::Key;
use crate::model::IntentData;
use crate::store::{Delegate, Error, IntentStore};

#[derive(Default, Clone)]
struct Slot {
    current: Option<IntentData>,
    pending: Option<IntentData>,
}

type Mastership = Box<dyn Fn(&Key) -> bool + Send + Sync>;

pub struct MemoryIntentStore {
    slots: DashMap<Key, Slot>,
    delegate: RwLock<Option<Arc<dyn Delegate>>>,
    mastership: Mastership,
}

impl Default for MemoryIntentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            delegate: RwLock::new(None),
            mastership: Box::new(|_| true),
        }
    }

    /// Build a store that defers mastership decisions to `mastership`,
    /// to exercise `NotMaster` skip behavior in tests.
    pub fn with_mastership(mastership: impl Fn(&Key) -> bool + Send + Sync + 'static) -> Self {
        Self {
            slots: DashMap::new(),
            delegate: RwLock::new(None),
            mastership: Box::new(mastership),
        }
    }

    fn delegate(&self) -> Option<Arc<dyn Delegate>> {
        self.delegate.read().unwrap().clone()
    }
}

impl IntentStore for MemoryIntentStore {
    fn add_pending(&self, data: IntentData) -> Result<(), Error> {
        if !self.is_master(&data.key) {
            return Err(Error::NotMaster);
        }

        self.slots.entry(data.key.clone()).or_default().pending = Some(data.clone());

        if let Some(delegate) = self.delegate() {
            delegate.process(data);
        }

        Ok(())
    }

    fn get_intent_data(&self, key: &Key) -> Option<IntentData> {
        self.slots.get(key).and_then(|slot| slot.current.clone())
    }

    fn get_pending_data(&self, key: &Key) -> Option<IntentData> {
        self.slots.get(key).and_then(|slot| slot.pending.clone())
    }

    fn get_intents(&self) -> Vec<IntentData> {
        self.slots
            .iter()
            .filter_map(|entry| entry.current.clone())
            .collect()
    }

    fn get_intent_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.current.is_some()).count()
    }

    fn is_master(&self, key: &Key) -> bool {
        (self.mastership)(key)
    }

    fn batch_write(&self, batch: Vec<IntentData>) -> Result<(), Error> {
        let delegate = self.delegate();

        for data in batch {
            let mut slot = self.slots.entry(data.key.clone()).or_default();

            let still_pending = slot
                .pending
                .as_ref()
                .is_some_and(|pending| pending.version > data.version);

            slot.current = Some(data.clone());
            if !still_pending {
                slot.pending = None;
            }
            drop(slot);

            if let Some(delegate) = &delegate {
                delegate.on_update(&data);
                delegate.notify(data);
            }
        }

        Ok(())
    }

    fn remove(&self, key: &Key) {
        self.slots.remove(key);
    }

    fn set_delegate(&self, delegate: Arc<dyn Delegate>) {
        *self.delegate.write().unwrap() = Some(delegate);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{AppId, Intent, Params, Version};
    use std::sync::Mutex;

    fn intent(key: Key) -> Intent {
        Intent::new(
            key,
            AppId(1),
            None,
            Params::PointToPoint {
                ingress: "p1".into(),
                egress: "p2".into(),
            },
        )
    }

    #[derive(Default)]
    struct Recorder {
        processed: Mutex<Vec<Key>>,
        notified: Mutex<Vec<Key>>,
    }

    impl Delegate for Recorder {
        fn process(&self, data: IntentData) {
            self.processed.lock().unwrap().push(data.key);
        }

        fn notify(&self, data: IntentData) {
            self.notified.lock().unwrap().push(data.key);
        }

        fn on_update(&self, _data: &IntentData) {}
    }

    #[test]
    fn add_pending_invokes_process() {
        let store = MemoryIntentStore::new();
        let recorder = Arc::new(Recorder::default());
        store.set_delegate(recorder.clone());

        let key = Key::named(AppId(1), "a");
        store.add_pending(IntentData::submit(intent(key.clone()), Version::new(1, 0))).unwrap();

        assert_eq!(recorder.processed.lock().unwrap().as_slice(), &[key.clone()]);
        assert_eq!(store.get_pending_data(&key).unwrap().version, Version::new(1, 0));
    }

    #[test]
    fn not_master_is_rejected_silently() {
        let store = MemoryIntentStore::with_mastership(|_| false);
        let key = Key::named(AppId(1), "a");

        let err = store
            .add_pending(IntentData::submit(intent(key), Version::new(1, 0)))
            .unwrap_err();
        assert!(matches!(err, Error::NotMaster));
    }

    #[test]
    fn batch_write_keeps_newer_pending() {
        let store = MemoryIntentStore::new();
        let key = Key::named(AppId(1), "a");

        let first = IntentData::submit(intent(key.clone()), Version::new(1, 0));
        let newer = IntentData::submit(intent(key.clone()), Version::new(2, 0));

        store.add_pending(first.clone()).unwrap();
        // A newer request arrives while the first is (conceptually) in flight.
        store.add_pending(newer.clone()).unwrap();

        // The in-flight batch completes and writes the first version's outcome.
        let mut completed = first;
        completed.state = crate::model::State::Installed;
        store.batch_write(vec![completed]).unwrap();

        // The newer pending request must survive the write.
        assert_eq!(store.get_pending_data(&key).unwrap().version, Version::new(2, 0));
    }

    #[test]
    fn remove_drops_the_key_entirely() {
        let store = MemoryIntentStore::new();
        let key = Key::named(AppId(1), "a");

        let mut data = IntentData::submit(intent(key.clone()), Version::new(1, 0));
        data.state = crate::model::State::Withdrawn;
        store.batch_write(vec![data]).unwrap();
        assert!(store.get_intent_data(&key).is_some());

        store.remove(&key);
        assert!(store.get_intent_data(&key).is_none());
        assert_eq!(store.get_intent_count(), 0);
    }
}
