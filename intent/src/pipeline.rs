// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The per-intent phase pipeline (§4.5): drives a pending request
//! through compilation and installation to a terminal state. One
//! `run` call handles exactly one [`IntentData`] drawn from an
//! accumulator batch; the manager fans batches out across a worker
//! pool, one task per intent, so unrelated keys make progress
//! independently.

use std::fmt;

use crate::coordinator::{DispatchOutcome, InstallCoordinator};
use crate::key::Key;
use crate::model::{IntentData, Request, State};
use crate::registry::compiler::CompilerRegistry;
use crate::registry::installer::InstallerRegistry;

/// A phase the pipeline passes an intent through. Distinct from
/// [`State`]: phases include transient steps (`Compiling`,
/// `Installing`) that a store only ever durably records the outcome
/// of, never the step itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initial,
    Compiling,
    Installing,
    Withdrawing,
    Purging,
    Skipped,
    Failed,
    CorruptPartial,
    Withdrawn,
    Installed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Initial => "INITIAL",
            Phase::Compiling => "COMPILING",
            Phase::Installing => "INSTALLING",
            Phase::Withdrawing => "WITHDRAWING",
            Phase::Purging => "PURGING",
            Phase::Skipped => "SKIPPED",
            Phase::Failed => "FAILED",
            Phase::CorruptPartial => "CORRUPT_PARTIAL",
            Phase::Withdrawn => "WITHDRAWN",
            Phase::Installed => "INSTALLED",
        };
        f.write_str(s)
    }
}

impl Phase {
    /// The durable [`State`] this phase corresponds to on the public
    /// intent event bus, if any. `Compiling`/`Installing`/`Withdrawing`
    /// are the transient steps a [`crate::store::Delegate::notify`]
    /// never sees on its own, so those are the ones worth forwarding.
    /// `Initial` is request intake, already surfaced as `INSTALL_REQ`/
    /// `WITHDRAW_REQ`/`PURGE_REQ` at `submit`/`withdraw`/`purge` time,
    /// not a fourth tag of its own; `Skipped`/`Purging` have no
    /// corresponding [`State`]; the rest are terminal writes already
    /// carried by `notify`.
    pub fn observable_state(self) -> Option<State> {
        match self {
            Phase::Compiling => Some(State::Compiling),
            Phase::Installing => Some(State::Installing),
            Phase::Withdrawing => Some(State::Withdrawing),
            Phase::Initial
            | Phase::Purging
            | Phase::Skipped
            | Phase::Failed
            | Phase::CorruptPartial
            | Phase::Withdrawn
            | Phase::Installed => None,
        }
    }
}

/// Fine-grained phase-transition sink. Distinct from
/// [`crate::store::Delegate::notify`], which only fires on a durable
/// `batch_write`: a listener here sees every phase a pipeline run
/// passes through, including ones that never get written on their own.
pub trait PhaseListener: Send + Sync {
    fn on_phase(&self, key: &Key, phase: Phase);
}

impl PhaseListener for () {
    fn on_phase(&self, _key: &Key, _phase: Phase) {}
}

/// What a pipeline run produced for the store to apply.
#[derive(Debug)]
pub enum StepOutcome {
    /// Write this as the new current data for the key.
    Write(IntentData),
    /// Purge completed: drop the key from the store entirely, no write.
    Remove,
    /// Stale or no-op request: neither written nor reported.
    Skip,
}

/// Run `pending` (a request popped off the store's pending slot)
/// against `current` (the store's last durable data for the same
/// key, if any) to a terminal [`StepOutcome`].
pub async fn run(
    pending: IntentData,
    current: Option<IntentData>,
    compilers: &CompilerRegistry,
    installers: &InstallerRegistry,
    coordinator: &InstallCoordinator,
    listener: &dyn PhaseListener,
) -> StepOutcome {
    listener.on_phase(&pending.key, Phase::Initial);

    match pending.request {
        Request::Submit => run_submit(pending, current, compilers, installers, coordinator, listener).await,
        Request::Withdraw => run_withdraw(pending, current, installers, coordinator, listener).await,
        Request::Purge => run_purge(pending, current, listener),
    }
}

async fn run_submit(
    pending: IntentData,
    current: Option<IntentData>,
    compilers: &CompilerRegistry,
    installers: &InstallerRegistry,
    coordinator: &InstallCoordinator,
    listener: &dyn PhaseListener,
) -> StepOutcome {
    // A pending request superseded by a later one already accepted for
    // the same key: drop it silently, no write, no event.
    if let Some(cur) = &current {
        if pending.version <= cur.version {
            listener.on_phase(&pending.key, Phase::Skipped);
            return StepOutcome::Skip;
        }
    }

    listener.on_phase(&pending.key, Phase::Compiling);
    let previous_installables = current.as_ref().map(|c| c.installables.clone()).unwrap_or_default();

    let new_installables = match compilers.compile(&pending.intent, &previous_installables) {
        Ok(installables) => installables,
        Err(error) => {
            let mut failed = pending;
            failed.state = State::Failed;
            failed.errors.push(error.to_string());
            listener.on_phase(&failed.key, Phase::Failed);
            return StepOutcome::Write(failed);
        }
    };

    // Recompiling to the same installable set a running intent already
    // has is a no-op: nothing to install, nothing changed.
    if let Some(cur) = &current {
        if cur.state == State::Installed && cur.installables == new_installables {
            listener.on_phase(&pending.key, Phase::Skipped);
            return StepOutcome::Skip;
        }
    }

    listener.on_phase(&pending.key, Phase::Installing);
    let mut installing = pending;
    let to_uninstall = previous_installables;
    let to_install = new_installables.clone();
    installing.installables = new_installables;
    installing.state = State::Installing;

    match coordinator.dispatch(installers, &installing.key, to_uninstall, to_install).await {
        DispatchOutcome::Success => {
            installing.state = State::Installed;
            listener.on_phase(&installing.key, Phase::Installed);
        }
        DispatchOutcome::Failed { errors, any_succeeded } => {
            installing.errors.extend(errors);
            if any_succeeded && installing.intent.partial_failure_constraint {
                installing.state = State::Corrupt;
                listener.on_phase(&installing.key, Phase::CorruptPartial);
            } else {
                installing.state = State::Failed;
                listener.on_phase(&installing.key, Phase::Failed);
            }
        }
        DispatchOutcome::Timeout => {
            installing.errors.push("install timed out waiting on installers".into());
            installing.state = State::Failed;
            listener.on_phase(&installing.key, Phase::Failed);
        }
    }

    StepOutcome::Write(installing)
}

async fn run_withdraw(
    pending: IntentData,
    current: Option<IntentData>,
    installers: &InstallerRegistry,
    coordinator: &InstallCoordinator,
    listener: &dyn PhaseListener,
) -> StepOutcome {
    listener.on_phase(&pending.key, Phase::Withdrawing);

    let to_uninstall = current.as_ref().map(|c| c.installables.clone()).unwrap_or_default();
    let mut withdrawing = pending;
    withdrawing.installables = to_uninstall.clone();
    withdrawing.state = State::Withdrawing;

    match coordinator.dispatch(installers, &withdrawing.key, to_uninstall, Vec::new()).await {
        DispatchOutcome::Success => {
            withdrawing.state = State::Withdrawn;
            listener.on_phase(&withdrawing.key, Phase::Withdrawn);
        }
        DispatchOutcome::Failed { errors, .. } => {
            withdrawing.errors.extend(errors);
            withdrawing.state = State::Failed;
            listener.on_phase(&withdrawing.key, Phase::Failed);
        }
        DispatchOutcome::Timeout => {
            withdrawing.errors.push("withdraw timed out waiting on installers".into());
            withdrawing.state = State::Failed;
            listener.on_phase(&withdrawing.key, Phase::Failed);
        }
    }

    StepOutcome::Write(withdrawing)
}

fn run_purge(pending: IntentData, current: Option<IntentData>, listener: &dyn PhaseListener) -> StepOutcome {
    match &current {
        Some(cur) if cur.state.is_terminal() => {
            listener.on_phase(&pending.key, Phase::Purging);
            StepOutcome::Remove
        }
        _ => {
            let mut failed = pending;
            failed.state = State::Failed;
            failed.errors.push("purge requires a terminal current state".into());
            listener.on_phase(&failed.key, Phase::Failed);
            StepOutcome::Write(failed)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::Key;
    use crate::model::{AppId, Installable, InstallableKind, Intent, Params, Version};
    use crate::registry::compiler::{CompileUnit, Compiler, CompilerError};
    use crate::registry::installer::{Context, Installer};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Passthrough;
    impl Compiler for Passthrough {
        fn compile(&self, intent: &Intent, _previous: &[Installable]) -> Result<Vec<CompileUnit>, CompilerError> {
            Ok(vec![CompileUnit::Installable(Installable {
                key: intent.key.clone(),
                kind: InstallableKind::FlowRuleSet,
                description: "compiled".into(),
            })])
        }
    }

    struct AlwaysSucceeds;
    impl Installer for AlwaysSucceeds {
        fn apply(&self, ctx: Context) {
            ctx.callback.success();
        }
    }

    struct AlwaysFails;
    impl Installer for AlwaysFails {
        fn apply(&self, ctx: Context) {
            ctx.callback.failed("rejected");
        }
    }

    fn intent(allow_partial: bool) -> Intent {
        Intent::new(
            Key::named(AppId(1), "a"),
            AppId(1),
            None,
            Params::PointToPoint {
                ingress: "p1".into(),
                egress: "p2".into(),
            },
        )
        .allow_partial_failure(allow_partial)
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<Phase>>);
    impl PhaseListener for Recording {
        fn on_phase(&self, _key: &Key, phase: Phase) {
            self.0.lock().unwrap().push(phase);
        }
    }

    fn compilers() -> CompilerRegistry {
        let mut registry = CompilerRegistry::new();
        registry.register(crate::model::IntentKind::PointToPoint, Box::new(Passthrough));
        registry
    }

    #[tokio::test]
    async fn fresh_submit_installs_and_emits_full_event_sequence() {
        let mut installers = InstallerRegistry::new();
        installers.register(InstallableKind::FlowRuleSet, Box::new(AlwaysSucceeds));
        let coordinator = InstallCoordinator::new(Duration::from_secs(1));
        let compilers = compilers();
        let listener = Recording::default();

        let pending = IntentData::submit(intent(false), Version::new(1, 0));
        let outcome = run(pending, None, &compilers, &installers, &coordinator, &listener).await;

        match outcome {
            StepOutcome::Write(data) => assert_eq!(data.state, State::Installed),
            other => panic!("expected a write, got {other:?}"),
        }
        assert_eq!(
            listener.0.lock().unwrap().as_slice(),
            &[Phase::Initial, Phase::Compiling, Phase::Installing, Phase::Installed]
        );
    }

    #[test]
    fn only_transient_phases_carry_an_observable_state() {
        assert_eq!(Phase::Compiling.observable_state(), Some(State::Compiling));
        assert_eq!(Phase::Installing.observable_state(), Some(State::Installing));
        assert_eq!(Phase::Withdrawing.observable_state(), Some(State::Withdrawing));
        assert_eq!(Phase::Initial.observable_state(), None);
        assert_eq!(Phase::Skipped.observable_state(), None);
        assert_eq!(Phase::Purging.observable_state(), None);
        assert_eq!(Phase::Installed.observable_state(), None);
        assert_eq!(Phase::Withdrawn.observable_state(), None);
        assert_eq!(Phase::Failed.observable_state(), None);
        assert_eq!(Phase::CorruptPartial.observable_state(), None);
    }

    #[tokio::test]
    async fn stale_pending_is_skipped() {
        let installers = InstallerRegistry::new();
        let coordinator = InstallCoordinator::new(Duration::from_secs(1));
        let compilers = compilers();
        let listener = Recording::default();

        let current = IntentData::submit(intent(false), Version::new(5, 0));
        let pending = IntentData::submit(intent(false), Version::new(1, 0));

        let outcome = run(pending, Some(current), &compilers, &installers, &coordinator, &listener).await;
        assert!(matches!(outcome, StepOutcome::Skip));
    }

    #[tokio::test]
    async fn partial_install_failure_lands_in_corrupt_partial_when_allowed() {
        let mut installers = InstallerRegistry::new();
        installers.register(InstallableKind::FlowRuleSet, Box::new(AlwaysFails));
        let coordinator = InstallCoordinator::new(Duration::from_secs(1));
        let compilers = compilers();
        let listener = Recording::default();

        let pending = IntentData::submit(intent(true), Version::new(1, 0));
        let outcome = run(pending, None, &compilers, &installers, &coordinator, &listener).await;

        match outcome {
            // A single-installable batch that fails has nothing that
            // "succeeded", so this still lands in Failed; the
            // CorruptPartial branch is exercised at the coordinator
            // level by `any_succeeded` in the multi-installable case.
            StepOutcome::Write(data) => assert_eq!(data.state, State::Failed),
            other => panic!("expected a write, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn withdraw_uninstalls_current_installables() {
        let mut installers = InstallerRegistry::new();
        installers.register(InstallableKind::FlowRuleSet, Box::new(AlwaysSucceeds));
        let coordinator = InstallCoordinator::new(Duration::from_secs(1));
        let compilers = compilers();
        let listener = Recording::default();

        let mut current = IntentData::submit(intent(false), Version::new(1, 0));
        current.state = State::Installed;
        current.installables = vec![Installable {
            key: current.key.clone(),
            kind: InstallableKind::FlowRuleSet,
            description: "compiled".into(),
        }];

        let pending = IntentData::withdraw(intent(false), Version::new(2, 0));
        let outcome = run(pending, Some(current), &compilers, &installers, &coordinator, &listener).await;

        match outcome {
            StepOutcome::Write(data) => assert_eq!(data.state, State::Withdrawn),
            other => panic!("expected a write, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn purge_of_non_terminal_current_fails() {
        let installers = InstallerRegistry::new();
        let coordinator = InstallCoordinator::new(Duration::from_secs(1));
        let compilers = compilers();
        let listener = Recording::default();

        let mut current = IntentData::submit(intent(false), Version::new(1, 0));
        current.state = State::Installing;

        let pending = IntentData::purge(intent(false), Version::new(2, 0));
        let outcome = run(pending, Some(current), &compilers, &installers, &coordinator, &listener).await;

        match outcome {
            StepOutcome::Write(data) => assert_eq!(data.state, State::Failed),
            other => panic!("expected a write, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn purge_of_terminal_current_removes_with_no_write() {
        let installers = InstallerRegistry::new();
        let coordinator = InstallCoordinator::new(Duration::from_secs(1));
        let compilers = compilers();
        let listener = Recording::default();

        let mut current = IntentData::submit(intent(false), Version::new(1, 0));
        current.state = State::Withdrawn;

        let pending = IntentData::purge(intent(false), Version::new(2, 0));
        let outcome = run(pending, Some(current), &compilers, &installers, &coordinator, &listener).await;
        assert!(matches!(outcome, StepOutcome::Remove));
    }
}
