/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;
use std::path::Path;

use log::debug;

use super::files::GuardTarget;
use super::warning::Warning;
use super::{Engine, Result};
use crate::config::ToggleKind;
use crate::path::{strip_folder_decorations, RelPath};

/// Folders are computed views: their effective state derives from the
/// registry entry plus the guard states of the immediate files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderState {
    NotRegistered,
    /// Folder entry guarded and every immediate file guarded.
    AllGuarded,
    /// Every immediate file guarded but the folder entry does not say so;
    /// a latent "all guarded" state not reflected at the folder node.
    InheritedGuard,
    Mixed,
    AllUnguarded,
}

impl Engine {
    pub fn effective_folder_state(&self, raw: &str) -> Result<FolderState> {
        let rel = self
            .secure
            .validate_path(Path::new(strip_folder_decorations(raw)))?;
        let Some(folder) = self.secure.registry().folder_by_path(&rel.folder_form()) else {
            return Ok(FolderState::NotRegistered);
        };
        let folder_guard = folder.guard;

        let children = self
            .platform
            .collect_immediate_files(&self.secure.abs_path(&rel))?;
        if children.is_empty() {
            return Ok(if folder_guard {
                FolderState::AllGuarded
            } else {
                FolderState::AllUnguarded
            });
        }
        let mut guarded = 0;
        for child in &children {
            let child_rel = RelPath::from(self.secure.display_path(child));
            if self
                .secure
                .registry()
                .file(&child_rel)
                .map(|f| f.guard)
                .unwrap_or(false)
            {
                guarded += 1;
            }
        }
        Ok(if guarded == children.len() {
            if folder_guard {
                FolderState::AllGuarded
            } else {
                FolderState::InheritedGuard
            }
        } else if guarded == 0 && !folder_guard {
            FolderState::AllUnguarded
        } else {
            FolderState::Mixed
        })
    }

    pub fn toggle_folders(&mut self, paths: &[String]) -> Result<()> {
        self.run_folders(paths, GuardTarget::Toggle, false)
    }

    pub fn enable_folders(&mut self, paths: &[String]) -> Result<()> {
        self.run_folders(paths, GuardTarget::Set(true), false)
    }

    pub fn disable_folders(&mut self, paths: &[String]) -> Result<()> {
        self.run_folders(paths, GuardTarget::Set(false), false)
    }

    /// Explicit recursive variants; folders never recurse by default.
    pub fn toggle_folders_recursive(&mut self, paths: &[String]) -> Result<()> {
        self.run_folders(paths, GuardTarget::Toggle, true)
    }

    pub fn enable_folders_recursive(&mut self, paths: &[String]) -> Result<()> {
        self.run_folders(paths, GuardTarget::Set(true), true)
    }

    pub fn disable_folders_recursive(&mut self, paths: &[String]) -> Result<()> {
        self.run_folders(paths, GuardTarget::Set(false), true)
    }

    /// Auto-creates folder entries, drives every child file (immediate ones
    /// unless `recursive`) through the per-file protocol, then stamps the
    /// folder's own flag.
    fn run_folders(&mut self, paths: &[String], target: GuardTarget, recursive: bool) -> Result<()> {
        // dedupe through the normalized `./rel` form so `src/x`, `./src/x`
        // and `src/x/` toggle once
        let mut seen: HashSet<String> = HashSet::new();
        let mut rels: Vec<RelPath> = vec![];
        for raw in paths {
            match self
                .secure
                .validate_path(Path::new(strip_folder_decorations(raw)))
            {
                Ok(rel) => {
                    if seen.insert(rel.folder_form()) {
                        rels.push(rel);
                    }
                }
                Err(err) => self.record_error(err),
            }
        }

        let mut first = true;
        for rel in rels {
            let created = self.secure.registry_mut().register_folder(&rel);
            if created {
                debug!("auto-created folder entry '{}'", rel.folder_alias());
            }
            let dir = self.secure.abs_path(&rel);
            let children = match if recursive {
                self.platform.collect_files_recursive(&dir)
            } else {
                self.platform.collect_immediate_files(&dir)
            } {
                Ok(children) => children,
                Err(err) => {
                    self.record_error(format!(
                        "failed to scan folder '{}': {}",
                        rel.folder_form(),
                        err
                    ));
                    continue;
                }
            };
            if children.is_empty() {
                self.warn(Warning::FolderEmpty {
                    path: rel.folder_form(),
                });
            }
            let mut child_rels: Vec<RelPath> = vec![];
            for child in &children {
                match self.secure.validate_path(child) {
                    Ok(child_rel) => child_rels.push(child_rel),
                    Err(err) => self.record_error(err),
                }
            }
            let folder_guard = self
                .secure
                .registry()
                .folder_by_path(&rel.folder_form())
                .map(|f| f.guard)
                .unwrap_or(false);
            let new_guard = match target {
                GuardTarget::Toggle => !folder_guard,
                GuardTarget::Set(state) => state,
            };
            let breadcrumb = first.then(|| (rel.folder_alias(), ToggleKind::Folder));
            first = false;
            self.set_rel_files_guard(&child_rels, target, None, breadcrumb)?;
            self.secure
                .registry_mut()
                .set_folder_guard(&rel.folder_form(), new_guard)?;
        }
        self.save_registry()
    }
}
