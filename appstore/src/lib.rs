// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Distributed application store.
//!
//! Applications are installed as archives plus a [`model::Description`]
//! manifest, then activated on demand: activating an app recursively
//! activates its declared `requiredApps`, fetching bits from a cluster
//! peer via [`bits::BitsChannel`] the first time a node needs them.
//! [`store::AppStore`] is the façade tying the replicated [`map::AppMap`],
//! the [`topic::ActivationTopic`], and the local [`disk::ArchiveStore`]
//! together.

pub use self::bits::BitsChannel;
pub use self::config::AppStoreConfig;
pub use self::disk::ArchiveStore;
pub use self::graph::CORE;
pub use self::map::{AppMap, MapListener, MemoryAppMap};
pub use self::model::{AppId, AppState, Application, Description, Event, Holder};
pub use self::store::{AppStore, AppStoreListener, MemoryIdService};
pub use self::topic::{ActivationTopic, MemoryActivationTopic};

pub mod bits;
pub mod config;
pub mod disk;
pub mod graph;
pub mod map;
pub mod model;
pub mod ports;
pub mod store;
pub mod topic;
