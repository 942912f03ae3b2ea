// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Data model for the distributed application store (§3, §4.8).

use std::fmt;

use serde::{Deserialize, Serialize};

pub use intent::AppId;

/// An installed application's static description, parsed from the
/// manifest packaged alongside its archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub required_apps: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// An application known to this cluster. Combines the parsed
/// [`Description`] with the [`AppId`] assigned at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: AppId,
    pub description: Description,
}

impl Application {
    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn required_apps(&self) -> &[String] {
        &self.description.required_apps
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description.name, self.id)
    }
}

/// Replicated lifecycle state of an [`Application`] (spec's `InternalApplicationHolder`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    Installed,
    Activated,
    Deactivated,
}

/// The value stored in the replicated `apps` map: an application plus
/// its current lifecycle state and the permission set it was last
/// published with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub app: Application,
    pub state: AppState,
    pub permissions: Vec<String>,
}

impl Holder {
    pub fn installed(app: Application) -> Self {
        let permissions = app.description.permissions.clone();
        Self {
            app,
            state: AppState::Installed,
            permissions,
        }
    }

    pub fn with_state(&self, state: AppState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

/// Lifecycle events a [`crate::store::AppStore`] publishes to local
/// listeners (spec's `APP_INSTALLED | APP_ACTIVATED | APP_DEACTIVATED |
/// APP_UNINSTALLED | APP_PERMISSIONS_CHANGED` taxonomy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Installed(Application),
    Activated(AppId),
    Deactivated(AppId),
    Uninstalled(AppId),
    PermissionsChanged(AppId, Vec<String>),
}

#[cfg(test)]
mod test {
    use super::*;

    fn app(id: u16, required: &[&str]) -> Application {
        Application {
            id: AppId(id),
            description: Description {
                name: format!("app-{id}"),
                version: "1.0.0".into(),
                required_apps: required.iter().map(|s| s.to_string()).collect(),
                permissions: Vec::new(),
                features: Vec::new(),
            },
        }
    }

    #[test]
    fn holder_with_state_preserves_app_and_permissions() {
        let holder = Holder::installed(app(1, &["dep"]));
        let activated = holder.with_state(AppState::Activated);

        assert_eq!(activated.app, holder.app);
        assert_eq!(activated.state, AppState::Activated);
    }
}
