// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use thiserror::Error;

use crate::model::{Installable, IntentKind};
use crate::registry::Registry;
use crate::Intent;

/// Recursion bound on [`CompilerRegistry::compile`]: an intent that
/// still isn't installable after this many rounds of recompilation is
/// treated as a misconfigured compiler chain.
const MAX_COMPILE_DEPTH: usize = 10;

/// One unit of a [`Compiler`]'s output: either a device-ready
/// [`Installable`], or a further [`Intent`] that itself needs
/// compiling.
#[derive(Debug, Clone)]
pub enum CompileUnit {
    Installable(Installable),
    Intent(Intent),
}

/// Compiles an [`Intent`] of a given [`IntentKind`] into zero or more
/// [`CompileUnit`]s.
pub trait Compiler: Send + Sync {
    fn compile(&self, intent: &Intent, previous: &[Installable]) -> Result<Vec<CompileUnit>, CompilerError>;
}

/// Error surfaced by an individual [`Compiler`] implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CompilerError(pub String);

/// Maps [`IntentKind`] to the [`Compiler`] that knows how to produce
/// installables for it, falling back through the subtype's declared
/// parent when no exact match is registered.
#[derive(Default)]
pub struct CompilerRegistry {
    inner: Registry<IntentKind, Box<dyn Compiler>>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: IntentKind, compiler: Box<dyn Compiler>) {
        self.inner.register(kind, compiler);
    }

    pub fn unregister(&mut self, kind: &IntentKind) {
        self.inner.unregister(kind);
    }

    /// Compile `intent` down to a fully installable set, recursively
    /// compiling any intermediate [`Intent`]s a compiler emits.
    pub fn compile(&self, intent: &Intent, previous: &[Installable]) -> Result<Vec<Installable>, Error> {
        let mut frontier = vec![intent.clone()];
        let mut installables = Vec::new();
        let mut depth = 0;

        while !frontier.is_empty() {
            if depth >= MAX_COMPILE_DEPTH {
                return Err(Error::CompilationDepth(intent.key.to_string()));
            }
            depth += 1;

            let mut next = Vec::new();
            for sub in &frontier {
                let compiler = self
                    .inner
                    .lookup(&sub.kind())
                    .ok_or_else(|| Error::NoCompiler(sub.kind()))?;

                for unit in compiler.compile(sub, previous).map_err(Error::Compilation)? {
                    match unit {
                        CompileUnit::Installable(installable) => installables.push(installable),
                        CompileUnit::Intent(nested) => next.push(nested),
                    }
                }
            }
            frontier = next;
        }

        Ok(installables)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no compiler registered for intent subtype {0:?}")]
    NoCompiler(IntentKind),

    #[error("compilation recursion bound exceeded for {0}")]
    CompilationDepth(String),

    #[error("compiler error: {0}")]
    Compilation(#[source] CompilerError),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::Key;
    use crate::model::{AppId, InstallableKind, Params};

    struct LinkCollectionCompiler;

    impl Compiler for LinkCollectionCompiler {
        fn compile(&self, intent: &Intent, _previous: &[Installable]) -> Result<Vec<CompileUnit>, CompilerError> {
            let Params::LinkCollection { links } = &intent.params else {
                return Err(CompilerError("expected link collection params".into()));
            };
            // Expand into one host-to-host intent per link.
            Ok(links
                .iter()
                .map(|(a, b)| {
                    CompileUnit::Intent(Intent::new(
                        intent.key.clone(),
                        intent.app_id,
                        intent.resource_group.clone(),
                        Params::HostToHost {
                            host_a: a.clone(),
                            host_b: b.clone(),
                        },
                    ))
                })
                .collect())
        }
    }

    struct HostToHostCompiler;

    impl Compiler for HostToHostCompiler {
        fn compile(&self, intent: &Intent, _previous: &[Installable]) -> Result<Vec<CompileUnit>, CompilerError> {
            let Params::HostToHost { host_a, host_b } = &intent.params else {
                return Err(CompilerError("expected host-to-host params".into()));
            };
            Ok(vec![CompileUnit::Installable(Installable {
                key: intent.key.clone(),
                kind: InstallableKind::FlowRuleSet,
                description: format!("{host_a} <-> {host_b}"),
            })])
        }
    }

    fn sample_intent() -> Intent {
        Intent::new(
            Key::named(AppId(1), "a"),
            AppId(1),
            None,
            Params::LinkCollection {
                links: vec![("h1".into(), "h2".into()), ("h3".into(), "h4".into())],
            },
        )
    }

    #[test]
    fn recurses_through_intermediate_intents() {
        let mut registry = CompilerRegistry::new();
        registry.register(IntentKind::LinkCollection, Box::new(LinkCollectionCompiler));
        registry.register(IntentKind::HostToHost, Box::new(HostToHostCompiler));

        let installables = registry.compile(&sample_intent(), &[]).unwrap();
        assert_eq!(installables.len(), 2);
    }

    #[test]
    fn missing_compiler_fails() {
        let registry = CompilerRegistry::new();
        let err = registry.compile(&sample_intent(), &[]).unwrap_err();
        assert!(matches!(err, Error::NoCompiler(IntentKind::LinkCollection)));
    }

    struct PointToPointCompiler;

    impl Compiler for PointToPointCompiler {
        fn compile(&self, intent: &Intent, _previous: &[Installable]) -> Result<Vec<CompileUnit>, CompilerError> {
            Ok(vec![CompileUnit::Installable(Installable {
                key: intent.key.clone(),
                kind: InstallableKind::Tunnel,
                description: "fallback path".into(),
            })])
        }
    }

    #[test]
    fn falls_back_to_parent_subtype() {
        let mut registry = CompilerRegistry::new();
        // No HostToHost compiler registered; lookup must fall back to
        // its declared parent, PointToPoint.
        registry.register(IntentKind::PointToPoint, Box::new(PointToPointCompiler));

        let intent = Intent::new(
            Key::named(AppId(1), "b"),
            AppId(1),
            None,
            Params::HostToHost {
                host_a: "h1".into(),
                host_b: "h2".into(),
            },
        );
        let installables = registry.compile(&intent, &[]).unwrap();
        assert_eq!(installables.len(), 1);
        assert_eq!(installables[0].kind, InstallableKind::Tunnel);
    }
}
