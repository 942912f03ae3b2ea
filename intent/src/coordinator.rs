// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Fans an installable batch out to installers keyed by subtype, then
//! joins their results (§4.6). No two installers are invoked
//! concurrently for the same key because the pipeline only ever has
//! one `dispatch` in flight per key at a time.

use std::collections::HashMap;
use std::time::Duration;

use crate::key::Key;
use crate::model::{Installable, InstallableKind};
use crate::registry::installer::{Completion, Context, InstallerRegistry, Outcome};

/// Result of fanning a batch out to installers and joining their
/// completions.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Success,
    /// At least one installer failed. `any_succeeded` distinguishes a
    /// total failure from a partial one, which the pipeline uses to
    /// decide between `Failed` and `CorruptPartial`.
    Failed { errors: Vec<String>, any_succeeded: bool },
    /// No installer reported within the configured timeout.
    Timeout,
}

/// Holds only the install timeout: the [`InstallerRegistry`] itself is
/// supplied per call, since installers can be registered and
/// unregistered at runtime through the manager facade.
pub struct InstallCoordinator {
    timeout: Duration,
}

impl InstallCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Dispatch `to_uninstall`/`to_install` (grouped by installable
    /// subtype) to their installers and wait for every one of them to
    /// report exactly once, up to `installTimeout`.
    pub async fn dispatch(
        &self,
        installers: &InstallerRegistry,
        key: &Key,
        to_uninstall: Vec<Installable>,
        to_install: Vec<Installable>,
    ) -> DispatchOutcome {
        let mut by_kind: HashMap<InstallableKind, (Vec<Installable>, Vec<Installable>)> = HashMap::new();
        for installable in to_uninstall {
            by_kind.entry(installable.kind.clone()).or_default().0.push(installable);
        }
        for installable in to_install {
            by_kind.entry(installable.kind.clone()).or_default().1.push(installable);
        }

        if by_kind.is_empty() {
            return DispatchOutcome::Success;
        }

        let mut receivers = Vec::new();
        let mut dispatch_errors = Vec::new();

        for (kind, (uninstall, install)) in by_kind {
            match installers.lookup(&kind) {
                Some(installer) => {
                    let (callback, rx) = Completion::new();
                    log::trace!("dispatching {kind:?} installer for {key}");
                    installer.apply(Context {
                        to_uninstall: uninstall,
                        to_install: install,
                        callback,
                    });
                    receivers.push(rx);
                }
                None => dispatch_errors.push(format!("no installer registered for {kind:?}")),
            }
        }

        if !dispatch_errors.is_empty() {
            return DispatchOutcome::Failed {
                errors: dispatch_errors,
                any_succeeded: false,
            };
        }

        let join = futures::future::join_all(receivers);

        match tokio::time::timeout(self.timeout, join).await {
            Ok(results) => {
                let mut errors = Vec::new();
                let mut any_succeeded = false;

                for result in results {
                    match result {
                        Ok(Outcome::Success) => any_succeeded = true,
                        Ok(Outcome::Failed(error)) => errors.push(error),
                        Err(_) => errors.push("installer dropped its completion handle".into()),
                    }
                }

                if errors.is_empty() {
                    DispatchOutcome::Success
                } else {
                    DispatchOutcome::Failed { errors, any_succeeded }
                }
            }
            Err(_) => {
                log::warn!("install timeout waiting on installers for {key}");
                DispatchOutcome::Timeout
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::Key;
    use crate::model::AppId;
    use crate::registry::installer::Installer;

    struct Succeeds;
    impl Installer for Succeeds {
        fn apply(&self, ctx: Context) {
            ctx.callback.success();
        }
    }

    struct NeverReports;
    impl Installer for NeverReports {
        fn apply(&self, ctx: Context) {
            std::mem::forget(ctx.callback);
        }
    }

    struct Fails;
    impl Installer for Fails {
        fn apply(&self, ctx: Context) {
            ctx.callback.failed("device rejected flow");
        }
    }

    fn installable(kind: InstallableKind) -> Installable {
        Installable {
            key: Key::named(AppId(1), "k"),
            kind,
            description: "d".into(),
        }
    }

    #[tokio::test]
    async fn succeeds_when_every_installer_succeeds() {
        let mut registry = InstallerRegistry::new();
        registry.register(InstallableKind::FlowRuleSet, Box::new(Succeeds));
        registry.register(InstallableKind::Group, Box::new(Succeeds));
        let coordinator = InstallCoordinator::new(Duration::from_secs(1));

        let outcome = coordinator
            .dispatch(
                &registry,
                &Key::named(AppId(1), "k"),
                vec![],
                vec![installable(InstallableKind::FlowRuleSet), installable(InstallableKind::Group)],
            )
            .await;

        assert!(matches!(outcome, DispatchOutcome::Success));
    }

    #[tokio::test]
    async fn partial_failure_is_reported_with_any_succeeded() {
        let mut registry = InstallerRegistry::new();
        registry.register(InstallableKind::FlowRuleSet, Box::new(Succeeds));
        registry.register(InstallableKind::Group, Box::new(Fails));
        let coordinator = InstallCoordinator::new(Duration::from_secs(1));

        let outcome = coordinator
            .dispatch(
                &registry,
                &Key::named(AppId(1), "k"),
                vec![],
                vec![installable(InstallableKind::FlowRuleSet), installable(InstallableKind::Group)],
            )
            .await;

        match outcome {
            DispatchOutcome::Failed { any_succeeded, .. } => assert!(any_succeeded),
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn installer_silence_past_timeout_is_reported_once() {
        let mut registry = InstallerRegistry::new();
        registry.register(InstallableKind::Tunnel, Box::new(NeverReports));
        let coordinator = InstallCoordinator::new(Duration::from_millis(20));

        let outcome = coordinator
            .dispatch(&registry, &Key::named(AppId(1), "k"), vec![], vec![installable(InstallableKind::Tunnel)])
            .await;

        assert!(matches!(outcome, DispatchOutcome::Timeout));
    }
}
