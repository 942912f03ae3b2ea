// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::AppId;

/// Globally unique identifier for an [`Intent`], scoped by the
/// application that submitted it.
///
/// [`Intent`]: crate::model::Intent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    app_id: AppId,
    id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
enum Id {
    Numeric(u64),
    Named(String),
}

impl Key {
    /// Build a key from a caller-assigned numeric identifier
    pub fn numeric(app_id: AppId, id: u64) -> Self {
        Self {
            app_id,
            id: Id::Numeric(id),
        }
    }

    /// Build a key from a caller-assigned string identifier
    pub fn named(app_id: AppId, id: impl Into<String>) -> Self {
        Self {
            app_id,
            id: Id::Named(id.into()),
        }
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Id::Numeric(n) => write!(f, "{}:0x{n:x}", self.app_id),
            Id::Named(s) => write!(f, "{}:{s}", self.app_id),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys_with_different_app_ids_are_distinct() {
        let a = Key::named(AppId(1), "flow-a");
        let b = Key::named(AppId(2), "flow-a");
        assert_ne!(a, b);
    }

    #[test]
    fn numeric_and_named_keys_are_distinct() {
        let a = Key::numeric(AppId(1), 1);
        let b = Key::named(AppId(1), "1");
        assert_ne!(a, b);
    }
}
