// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use tokio::sync::oneshot;

use crate::model::{Installable, InstallableKind};
use crate::registry::Registry;

/// Outcome an [`Installer`] reports back through its [`Completion`]
/// handle.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Failed(String),
}

/// One-shot handle an installer uses to report completion to the
/// [`InstallCoordinator`], exactly once.
///
/// [`InstallCoordinator`]: crate::coordinator::InstallCoordinator
#[derive(Debug)]
pub struct Completion(oneshot::Sender<Outcome>);

impl Completion {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Report that this installer's portion of the batch applied.
    pub fn success(self) {
        let _ = self.0.send(Outcome::Success);
    }

    /// Report that this installer's portion of the batch failed.
    pub fn failed(self, error: impl Into<String>) {
        let _ = self.0.send(Outcome::Failed(error.into()));
    }
}

/// Everything an [`Installer`] needs to apply (or undo) a set of
/// installables for one intent key.
#[derive(Debug)]
pub struct Context {
    pub to_uninstall: Vec<Installable>,
    pub to_install: Vec<Installable>,
    pub callback: Completion,
}

/// A pluggable device-installation backend for one [`InstallableKind`].
///
/// `apply` is handed ownership of the [`Completion`] handle inside
/// `ctx` and MUST eventually call exactly one of
/// [`Completion::success`]/[`Completion::failed`] on it, whether that
/// happens synchronously or from a task the installer spawns.
pub trait Installer: Send + Sync {
    fn apply(&self, ctx: Context);
}

/// Maps [`InstallableKind`] to the [`Installer`] responsible for it.
#[derive(Default)]
pub struct InstallerRegistry {
    inner: Registry<InstallableKind, Box<dyn Installer>>,
}

impl InstallerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: InstallableKind, installer: Box<dyn Installer>) {
        self.inner.register(kind, installer);
    }

    pub fn unregister(&mut self, kind: &InstallableKind) {
        self.inner.unregister(kind);
    }

    pub fn lookup(&self, kind: &InstallableKind) -> Option<&dyn Installer> {
        self.inner.lookup(kind).map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::Key;
    use crate::model::AppId;

    struct Immediate;

    impl Installer for Immediate {
        fn apply(&self, ctx: Context) {
            ctx.callback.success();
        }
    }

    #[tokio::test]
    async fn installer_reports_through_completion() {
        let mut registry = InstallerRegistry::new();
        registry.register(InstallableKind::FlowRuleSet, Box::new(Immediate));

        let (completion, rx) = Completion::new();
        let installer = registry.lookup(&InstallableKind::FlowRuleSet).unwrap();
        installer.apply(Context {
            to_uninstall: vec![],
            to_install: vec![Installable {
                key: Key::named(AppId(1), "x"),
                kind: InstallableKind::FlowRuleSet,
                description: "test".into(),
            }],
            callback: completion,
        });

        assert!(matches!(rx.await.unwrap(), Outcome::Success));
    }
}
