// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Core data model: [`Intent`], [`IntentData`], the lifecycle [`State`]
//! machine and the compiled [`Installable`] it drives towards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::registry::Subtype;

/// Short integer identifier of the application that owns an [`Intent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppId(pub u16);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app#{}", self.0)
    }
}

/// Shared tag used to pool resource reservations across multiple intents.
pub type ResourceGroup = String;

/// Monotonic ordering token for [`IntentData`]: wall-clock millis paired
/// with a logical counter so that two requests accepted within the same
/// millisecond still order deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    millis: u64,
    counter: u64,
}

impl Version {
    pub fn new(millis: u64, counter: u64) -> Self {
        Self { millis, counter }
    }

    /// The zero version; every real submission has a version that
    /// compares greater than this.
    pub fn zero() -> Self {
        Self::new(0, 0)
    }

    pub fn next(self) -> Self {
        Self::new(self.millis, self.counter + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.millis, self.counter)
    }
}

/// What the caller asked for when this [`IntentData`] was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Submit,
    Withdraw,
    Purge,
}

/// Lifecycle state of an intent, per §3 of the intent data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    InstallReq,
    Compiling,
    Installing,
    Installed,
    WithdrawReq,
    Withdrawing,
    Withdrawn,
    Failed,
    PurgeReq,
    Corrupt,
}

impl State {
    /// Terminal states are durable outcomes: nothing further happens to
    /// this [`IntentData`] without a new request.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::Installed | State::Withdrawn | State::Failed | State::Corrupt
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::InstallReq => "INSTALL_REQ",
            State::Compiling => "COMPILING",
            State::Installing => "INSTALLING",
            State::Installed => "INSTALLED",
            State::WithdrawReq => "WITHDRAW_REQ",
            State::Withdrawing => "WITHDRAWING",
            State::Withdrawn => "WITHDRAWN",
            State::Failed => "FAILED",
            State::PurgeReq => "PURGE_REQ",
            State::Corrupt => "CORRUPT",
        };
        f.write_str(s)
    }
}

/// The subtype tag an [`Intent`] is compiled by, with its declared
/// parent for the [`CompilerRegistry`] fallback walk.
///
/// [`CompilerRegistry`]: crate::registry::compiler::CompilerRegistry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    PointToPoint,
    HostToHost,
    LinkCollection,
    Domain,
}

impl Subtype for IntentKind {
    fn parent(&self) -> Option<Self> {
        match self {
            // Host-to-host connectivity degrades to a bundle of
            // point-to-point paths when no dedicated compiler exists.
            IntentKind::HostToHost => Some(IntentKind::PointToPoint),
            // A link collection is a generalized host-to-host intent.
            IntentKind::LinkCollection => Some(IntentKind::HostToHost),
            IntentKind::PointToPoint | IntentKind::Domain => None,
        }
    }
}

/// Subtype-specific parameters. The wire encoding of these is the
/// caller's serialization framework's concern; this is the in-memory
/// shape the compilers operate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Params {
    PointToPoint { ingress: String, egress: String },
    HostToHost { host_a: String, host_b: String },
    LinkCollection { links: Vec<(String, String)> },
    Domain { constraints: Vec<String> },
}

impl Params {
    pub fn kind(&self) -> IntentKind {
        match self {
            Params::PointToPoint { .. } => IntentKind::PointToPoint,
            Params::HostToHost { .. } => IntentKind::HostToHost,
            Params::LinkCollection { .. } => IntentKind::LinkCollection,
            Params::Domain { .. } => IntentKind::Domain,
        }
    }
}

/// An immutable declarative connectivity request, content-addressable by
/// its [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub key: Key,
    pub app_id: AppId,
    pub resource_group: Option<ResourceGroup>,
    pub params: Params,
    /// Whether the install phase is allowed to land in `CorruptPartial`
    /// rather than `Failed` when some, but not all, installables apply.
    pub partial_failure_constraint: bool,
}

impl Intent {
    pub fn new(key: Key, app_id: AppId, resource_group: Option<ResourceGroup>, params: Params) -> Self {
        Self {
            key,
            app_id,
            resource_group,
            params,
            partial_failure_constraint: false,
        }
    }

    /// Allow this intent's install phase to tolerate partial installer
    /// failure (§4.5 `CorruptPartial`).
    pub fn allow_partial_failure(mut self, allow: bool) -> Self {
        self.partial_failure_constraint = allow;
        self
    }

    pub fn kind(&self) -> IntentKind {
        self.params.kind()
    }

    /// The consumer under which reserved resources for this intent are
    /// tracked: the resource group if one was given, else the key itself.
    pub fn resource_consumer(&self) -> String {
        self.resource_group
            .clone()
            .unwrap_or_else(|| self.key.to_string())
    }
}

/// The subtype tag a compiled [`Installable`] is dispatched to an
/// [`Installer`] by.
///
/// [`Installer`]: crate::registry::installer::Installer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstallableKind {
    FlowRuleSet,
    Group,
    Tunnel,
}

impl Subtype for InstallableKind {
    fn parent(&self) -> Option<Self> {
        // Installables are leaf device artifacts; no fallback hierarchy.
        None
    }
}

/// A compiled, device-ready sub-intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installable {
    pub key: Key,
    pub kind: InstallableKind,
    pub description: String,
}

/// The mutable envelope around an [`Intent`] as it is carried through
/// the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentData {
    pub key: Key,
    pub intent: Intent,
    pub request: Request,
    pub state: State,
    pub version: Version,
    pub installables: Vec<Installable>,
    pub errors: Vec<String>,
}

impl IntentData {
    pub fn submit(intent: Intent, version: Version) -> Self {
        Self {
            key: intent.key.clone(),
            intent,
            request: Request::Submit,
            state: State::InstallReq,
            version,
            installables: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn withdraw(intent: Intent, version: Version) -> Self {
        Self {
            key: intent.key.clone(),
            intent,
            request: Request::Withdraw,
            state: State::WithdrawReq,
            version,
            installables: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn purge(intent: Intent, version: Version) -> Self {
        Self {
            key: intent.key.clone(),
            intent,
            request: Request::Purge,
            state: State::PurgeReq,
            version,
            installables: Vec::new(),
            errors: Vec::new(),
        }
    }
}
