/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::registry::Registry;

/// Control file at the project root; the only persisted artifact.
pub const GUARDFILE_NAME: &str = ".guardfile";

#[derive(Error, Debug)]
pub enum GuardfileError {
    #[error("project is not initialized (no '{GUARDFILE_NAME}' found)")]
    NotInitialized,
    #[error("project is already initialized ('{GUARDFILE_NAME}' exists)")]
    AlreadyInitialized,
    #[error("guardfile is corrupted: {0}")]
    Corrupted(String),
    #[error("failed to encode guardfile: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn guardfile_path(root: &Path) -> PathBuf {
    root.join(GUARDFILE_NAME)
}

pub fn exists(root: &Path) -> bool {
    guardfile_path(root).is_file()
}

/// Parse and structurally validate the control file.
pub fn load(root: &Path) -> Result<Registry, GuardfileError> {
    let path = guardfile_path(root);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(GuardfileError::NotInitialized)
        }
        Err(err) => return Err(err.into()),
    };
    let registry: Registry =
        serde_yaml::from_str(&text).map_err(|err| GuardfileError::Corrupted(err.to_string()))?;
    registry.validate().map_err(GuardfileError::Corrupted)?;
    debug!(
        "loaded guardfile from '{}': {} files, {} collections, {} folders",
        path.display(),
        registry.files().len(),
        registry.collections().len(),
        registry.folders().len()
    );
    Ok(registry)
}

/// Whole-file replacement: serialize to a temporary sibling, fsync, rename.
/// A crash mid-save leaves either the old or the new file, never a torn one.
pub fn save(root: &Path, registry: &Registry) -> Result<(), GuardfileError> {
    let yaml = serde_yaml::to_string(registry)?;
    let path = guardfile_path(root);
    let tmp_path = root.join(format!("{GUARDFILE_NAME}.tmp"));
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;
    debug!("saved guardfile to '{}'", path.display());
    Ok(())
}

/// Remove the control file; used by destroy after verification passes.
pub fn delete(root: &Path) -> Result<(), GuardfileError> {
    fs::remove_file(guardfile_path(root))?;
    Ok(())
}
