// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-node on-disk application archive directory (§6 "Persisted
//! state"): one subdirectory per app holding its archive, its parsed
//! manifest, and an `active` marker file. Mirrors the layered-YAML
//! read/write idiom of [`config::Manager`], using `fs_err` for
//! path-annotated I/O errors (`fs_err as fs`).

use std::path::PathBuf;

use fs_err::tokio as fs;
use futures::StreamExt;
use thiserror::Error;
use tokio_stream::wrappers::ReadDirStream;

use crate::model::Description;

const ARCHIVE_FILE: &str = "archive.bin";
const MANIFEST_FILE: &str = "manifest.yaml";
const ACTIVE_MARKER: &str = "active";

#[derive(Debug, Error)]
pub enum Error {
    #[error("create app directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("write archive: {0}")]
    WriteArchive(#[source] std::io::Error),
    #[error("read archive: {0}")]
    ReadArchive(#[source] std::io::Error),
    #[error("write manifest: {0}")]
    WriteManifest(#[source] std::io::Error),
    #[error("read manifest: {0}")]
    ReadManifest(#[source] std::io::Error),
    #[error("parse manifest")]
    ParseManifest(#[from] serde_yaml::Error),
    #[error("purge app directory: {0}")]
    Purge(#[source] std::io::Error),
    #[error("set active marker: {0}")]
    SetActive(#[source] std::io::Error),
}

/// Local archive directory: one node's copy of every app it has
/// installed bits and manifests for.
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn app_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Persist an archive and its manifest. Idempotent: re-saving the
    /// same app overwrites both files.
    pub async fn save(&self, description: &Description, bytes: &[u8]) -> Result<(), Error> {
        let dir = self.app_dir(&description.name);
        fs::create_dir_all(&dir).await.map_err(Error::CreateDir)?;

        fs::write(dir.join(ARCHIVE_FILE), bytes).await.map_err(Error::WriteArchive)?;

        let yaml = serde_yaml::to_string(description)?;
        fs::write(dir.join(MANIFEST_FILE), yaml).await.map_err(Error::WriteManifest)?;

        Ok(())
    }

    pub async fn load_description(&self, name: &str) -> Result<Description, Error> {
        let bytes = fs::read(self.app_dir(name).join(MANIFEST_FILE))
            .await
            .map_err(Error::ReadManifest)?;
        Ok(serde_yaml::from_slice(&bytes)?)
    }

    pub async fn read_archive(&self, name: &str) -> Result<Vec<u8>, Error> {
        fs::read(self.app_dir(name).join(ARCHIVE_FILE)).await.map_err(Error::ReadArchive)
    }

    pub async fn has_archive(&self, name: &str) -> bool {
        fs::metadata(self.app_dir(name).join(ARCHIVE_FILE)).await.is_ok()
    }

    /// Remove an app's entire on-disk directory (archive, manifest,
    /// active marker). A missing directory is not an error.
    pub async fn purge(&self, name: &str) -> Result<(), Error> {
        match fs::remove_dir_all(self.app_dir(name)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(Error::Purge(error)),
        }
    }

    pub async fn set_active(&self, name: &str, active: bool) -> Result<(), Error> {
        let marker = self.app_dir(name).join(ACTIVE_MARKER);
        if active {
            fs::write(marker, Vec::<u8>::new()).await.map_err(Error::SetActive)
        } else {
            match fs::remove_file(marker).await {
                Ok(()) => Ok(()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(error) => Err(Error::SetActive(error)),
            }
        }
    }

    pub async fn is_active(&self, name: &str) -> bool {
        fs::metadata(self.app_dir(name).join(ACTIVE_MARKER)).await.is_ok()
    }

    /// Names of every app with a directory under the archive root,
    /// for disk bootstrap.
    pub async fn list_apps(&self) -> Vec<String> {
        let Ok(read_dir) = fs::read_dir(&self.root).await else {
            return Vec::new();
        };

        ReadDirStream::new(read_dir)
            .filter_map(|entry| async {
                let entry = entry.ok()?;
                let file_type = entry.file_type().await.ok()?;
                file_type.is_dir().then(|| entry.file_name().to_string_lossy().into_owned())
            })
            .collect()
            .await
    }
}
