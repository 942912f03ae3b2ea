// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Generic subtype-keyed registry shared by [`compiler::CompilerRegistry`]
//! and [`installer::InstallerRegistry`].
//!
//! Registries dispatch on a type tag rather than on dynamic class,
//! built to allow runtime `register`/`unregister` rather than a closed
//! enum of backends, since the facade explicitly supports registering
//! compilers and installers after construction.

use std::collections::HashMap;
use std::hash::Hash;

pub mod compiler;
pub mod installer;

/// A subtype tag that declares its own fallback parent, walked by
/// [`Registry::lookup`] when no handler is registered for the exact tag.
pub trait Subtype: Clone + Eq + Hash + std::fmt::Debug {
    fn parent(&self) -> Option<Self>;
}

/// Maps a [`Subtype`] tag to a handler, falling back through the tag's
/// declared parent chain on lookup.
#[derive(Debug)]
pub struct Registry<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Subtype, V> Registry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    pub fn unregister(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    /// Probe `key`, then its declared parent, repeatedly, until a
    /// handler is found or the chain is exhausted.
    pub fn lookup(&self, key: &K) -> Option<&V> {
        let mut current = Some(key.clone());
        while let Some(k) = current {
            if let Some(v) = self.entries.get(&k) {
                return Some(v);
            }
            current = k.parent();
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum Tag {
        Child,
        Parent,
        Root,
    }

    impl Subtype for Tag {
        fn parent(&self) -> Option<Self> {
            match self {
                Tag::Child => Some(Tag::Parent),
                Tag::Parent => Some(Tag::Root),
                Tag::Root => None,
            }
        }
    }

    #[test]
    fn falls_back_through_parent_chain() {
        let mut registry: Registry<Tag, &'static str> = Registry::new();
        registry.register(Tag::Root, "root-handler");

        assert_eq!(registry.lookup(&Tag::Child), Some(&"root-handler"));
        assert_eq!(registry.lookup(&Tag::Parent), Some(&"root-handler"));
        assert_eq!(registry.lookup(&Tag::Root), Some(&"root-handler"));
    }

    #[test]
    fn prefers_exact_match_over_parent() {
        let mut registry: Registry<Tag, &'static str> = Registry::new();
        registry.register(Tag::Root, "root-handler");
        registry.register(Tag::Child, "child-handler");

        assert_eq!(registry.lookup(&Tag::Child), Some(&"child-handler"));
    }

    #[test]
    fn exhausted_chain_is_none() {
        let registry: Registry<Tag, &'static str> = Registry::new();
        assert_eq!(registry.lookup(&Tag::Child), None);
    }
}
