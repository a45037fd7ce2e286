/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use log::info;

use super::files::GuardTarget;
use super::{Engine, EngineError, Result};
use crate::config::{format_mode, parse_file_mode};
use crate::path::RelPath;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub files_removed: Vec<String>,
    pub collections_removed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOutcome {
    pub files_disabled: usize,
    pub collections_disabled: usize,
}

impl Engine {
    /// Drop registered files no longer present on disk, then drop
    /// collections the sweep left empty.
    pub fn cleanup(&mut self) -> Result<CleanupOutcome> {
        let missing: Vec<RelPath> = self
            .secure
            .registry()
            .files()
            .iter()
            .filter(|f| !self.platform.file_exists(&self.secure.abs_path(&f.path)))
            .map(|f| f.path.clone())
            .collect();
        for rel in &missing {
            self.secure.registry_mut().unregister_file(rel, false)?;
            info!("cleanup: dropped missing file '{}'", rel);
        }
        let empty: Vec<String> = self
            .secure
            .registry()
            .collections()
            .iter()
            .filter(|c| c.files.is_empty())
            .map(|c| c.name.clone())
            .collect();
        for name in &empty {
            self.secure.registry_mut().remove_collection(name)?;
            info!("cleanup: dropped empty collection '{}'", name);
        }
        self.save_registry()?;
        Ok(CleanupOutcome {
            files_removed: missing.iter().map(|rel| rel.to_string()).collect(),
            collections_removed: empty,
        })
    }

    /// Disable guard everywhere. Nothing is unregistered.
    pub fn reset(&mut self) -> Result<ResetOutcome> {
        let all_files: Vec<RelPath> = self
            .secure
            .registry()
            .files()
            .iter()
            .map(|f| f.path.clone())
            .collect();
        let files_disabled = self
            .secure
            .registry()
            .files()
            .iter()
            .filter(|f| f.guard && self.platform.file_exists(&self.secure.abs_path(&f.path)))
            .count();
        self.set_rel_files_guard(&all_files, GuardTarget::Set(false), None, None)?;

        let guarded_collections: Vec<String> = self
            .secure
            .registry()
            .collections()
            .iter()
            .filter(|c| c.guard)
            .map(|c| c.name.clone())
            .collect();
        for name in &guarded_collections {
            self.secure.registry_mut().set_collection_guard(name, false)?;
        }
        self.save_registry()?;
        info!(
            "reset: disabled {} file(s), {} collection(s)",
            files_disabled,
            guarded_collections.len()
        );
        Ok(ResetOutcome {
            files_disabled,
            collections_disabled: guarded_collections.len(),
        })
    }

    /// Uninstall: reset, cleanup, then audit every remaining entry against
    /// its recorded metadata. Any discrepancy keeps the control file in
    /// place; on a clean audit the control file is deleted.
    pub fn destroy(&mut self) -> Result<()> {
        self.reset()?;
        self.cleanup()?;

        let mut problems: Vec<String> = vec![];
        for entry in self.secure.registry().files() {
            if entry.guard {
                problems.push(format!("'{}' still has guard enabled", entry.path));
                continue;
            }
            let abs = self.secure.abs_path(&entry.path);
            match self.platform.file_info(&abs) {
                Err(err) => problems.push(format!("'{}': {}", entry.path, err)),
                Ok(file_info) => {
                    let recorded = parse_file_mode(&entry.mode)?;
                    if file_info.mode != recorded {
                        problems.push(format!(
                            "'{}' has mode {}, recorded {}",
                            entry.path,
                            format_mode(file_info.mode),
                            entry.mode
                        ));
                    }
                    if !entry.owner.is_empty() && file_info.owner != entry.owner {
                        problems.push(format!(
                            "'{}' has owner '{}', recorded '{}'",
                            entry.path, file_info.owner, entry.owner
                        ));
                    }
                    if !entry.group.is_empty() && file_info.group != entry.group {
                        problems.push(format!(
                            "'{}' has group '{}', recorded '{}'",
                            entry.path, file_info.group, entry.group
                        ));
                    }
                }
            }
        }
        if !problems.is_empty() {
            return Err(EngineError::DestroyVerificationFailed(problems.join("\n")));
        }
        self.secure.delete_guardfile()?;
        info!("destroyed: guardfile deleted");
        Ok(())
    }
}
