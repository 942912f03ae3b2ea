// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Narrow service contracts the app store depends on but does not own.
//!
//! spec.md §6 describes one set of delegated services shared by both
//! subsystems (cluster communication, mastership, application
//! identity); rather than re-declare identical traits under a second
//! name, the app store depends directly on [`intent::ports`].

pub use intent::ports::{ApplicationIdService, ClusterChannel, MastershipService};
