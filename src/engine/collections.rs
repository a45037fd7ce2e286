/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;
use std::fmt::Display;
use std::path::Path;

use log::info;

use super::files::GuardTarget;
use super::warning::Warning;
use super::{Engine, EngineError, Result, RESERVED_NAMES};
use crate::config::{format_mode, ToggleKind};
use crate::path::RelPath;

/// Every file shared by targeted collections whose guard states disagree,
/// with the holders and their states. Raised before any mutation.
#[derive(Debug)]
pub struct ConflictReport {
    pub conflicts: Vec<FileConflict>,
}

#[derive(Debug)]
pub struct FileConflict {
    pub path: String,
    pub holders: Vec<(String, bool)>,
}

impl Display for ConflictReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "collections share files in different guard states:")?;
        for conflict in &self.conflicts {
            let holders: Vec<String> = conflict
                .holders
                .iter()
                .map(|(name, guard)| format!("{} (guard: {})", name, guard))
                .collect();
            write!(f, "\n  '{}' in {}", conflict.path, holders.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionView {
    pub name: String,
    pub guard: bool,
    pub members: Vec<MemberView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberView {
    pub path: String,
    pub guard: bool,
    pub missing: bool,
}

impl Engine {
    fn ensure_not_reserved(&self, names: &[String]) -> Result<()> {
        for name in names {
            if RESERVED_NAMES.contains(&name.as_str()) {
                return Err(EngineError::ReservedName(name.clone()));
            }
        }
        Ok(())
    }

    pub fn add_collections(&mut self, names: &[String]) -> Result<()> {
        self.ensure_not_reserved(names)?;
        for name in names {
            if name.is_empty() {
                self.record_error("collection name cannot be empty");
                continue;
            }
            if self.secure.registry().collection(name).is_some() {
                self.warn(Warning::CollectionAlreadyExists { name: name.clone() });
                continue;
            }
            self.secure.registry_mut().add_collection(name)?;
            info!("created collection '{}'", name);
        }
        self.save_registry()
    }

    /// Removing a collection removes its member files from the registry too,
    /// restoring guarded ones first. Members missing on disk are left to
    /// cleanup and only warned about.
    pub fn remove_collections(&mut self, names: &[String]) -> Result<()> {
        let mut member_files: Vec<RelPath> = vec![];
        let mut found: Vec<String> = vec![];
        for name in names {
            let Some(collection) = self.secure.registry().collection(name).cloned() else {
                self.warn(Warning::CollectionNotFound { name: name.clone() });
                continue;
            };
            found.push(name.clone());
            for member in collection.files {
                let abs = self.secure.abs_path(&member);
                if !self.platform.file_exists(&abs) {
                    self.warn(Warning::FileMissing {
                        path: member.to_string(),
                    });
                    continue;
                }
                if !member_files.contains(&member) {
                    member_files.push(member);
                }
            }
        }
        self.remove_rel_files(&member_files)?;
        for name in &found {
            self.secure.registry_mut().remove_collection(name)?;
            info!("removed collection '{}'", name);
        }
        self.save_registry()
    }

    /// Disable guard on all members, then empty the member lists.
    /// The collection entries themselves remain.
    pub fn clear_collections(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            let Some(collection) = self.secure.registry().collection(name).cloned() else {
                self.warn(Warning::CollectionNotFound { name: name.clone() });
                continue;
            };
            if collection.files.is_empty() {
                self.warn(Warning::CollectionEmpty { name: name.clone() });
            }
            self.set_rel_files_guard(&collection.files, GuardTarget::Set(false), None, None)?;
            self.secure.registry_mut().clear_collection(name)?;
            info!("cleared collection '{}'", name);
        }
        self.save_registry()
    }

    pub fn enable_collections(&mut self, names: &[String]) -> Result<()> {
        self.set_collections_guard(names, true)
    }

    pub fn disable_collections(&mut self, names: &[String]) -> Result<()> {
        self.set_collections_guard(names, false)
    }

    fn set_collections_guard(&mut self, names: &[String], state: bool) -> Result<()> {
        let mut seen: HashSet<RelPath> = HashSet::new();
        let mut found: Vec<String> = vec![];
        for name in names {
            let Some(collection) = self.secure.registry().collection(name).cloned() else {
                self.warn(Warning::CollectionNotFound { name: name.clone() });
                continue;
            };
            if collection.files.is_empty() {
                self.warn(Warning::CollectionEmpty { name: name.clone() });
            }
            // dedupe the union: a file shared with an earlier collection in
            // the batch was already driven to the same state
            let batch: Vec<RelPath> = collection
                .files
                .iter()
                .filter(|member| seen.insert((*member).clone()))
                .cloned()
                .collect();
            let config = collection.effective_config(&self.secure.registry().config);
            let breadcrumb = found
                .is_empty()
                .then(|| (name.clone(), ToggleKind::Collection));
            found.push(name.clone());
            self.set_rel_files_guard(&batch, GuardTarget::Set(state), Some(config), breadcrumb)?;
        }
        for name in &found {
            self.secure.registry_mut().set_collection_guard(name, state)?;
        }
        self.save_registry()
    }

    /// Toggle collections as a unit. A file shared by targeted collections
    /// whose guard states disagree makes the whole command fail before any
    /// registry or filesystem mutation.
    pub fn toggle_collections(&mut self, names: &[String]) -> Result<()> {
        let mut targets = vec![];
        for name in names {
            match self.secure.registry().collection(name).cloned() {
                Some(collection) => targets.push(collection),
                None => self.warn(Warning::CollectionNotFound { name: name.clone() }),
            }
        }

        let mut file_holders: Vec<(RelPath, Vec<(String, bool)>)> = vec![];
        for collection in &targets {
            for member in &collection.files {
                match file_holders.iter_mut().find(|(path, _)| path == member) {
                    Some((_, holders)) => holders.push((collection.name.clone(), collection.guard)),
                    None => file_holders.push((
                        member.clone(),
                        vec![(collection.name.clone(), collection.guard)],
                    )),
                }
            }
        }
        let conflicts: Vec<FileConflict> = file_holders
            .into_iter()
            .filter(|(_, holders)| {
                holders.len() >= 2 && holders.iter().any(|(_, guard)| *guard != holders[0].1)
            })
            .map(|(path, holders)| FileConflict {
                path: path.to_string(),
                holders,
            })
            .collect();
        if !conflicts.is_empty() {
            return Err(EngineError::CollectionConflict(ConflictReport { conflicts }));
        }

        let mut seen: HashSet<RelPath> = HashSet::new();
        let mut first = true;
        for collection in &targets {
            let state = !collection.guard;
            let batch: Vec<RelPath> = collection
                .files
                .iter()
                .filter(|member| seen.insert((*member).clone()))
                .cloned()
                .collect();
            let config = collection.effective_config(&self.secure.registry().config);
            let breadcrumb = first.then(|| (collection.name.clone(), ToggleKind::Collection));
            first = false;
            self.set_rel_files_guard(&batch, GuardTarget::Set(state), Some(config), breadcrumb)?;
        }
        for collection in &targets {
            self.secure
                .registry_mut()
                .set_collection_guard(&collection.name, !collection.guard)?;
        }
        self.save_registry()
    }

    /// Unlike bare add, membership requires the files on disk: any missing
    /// file fails the whole command. Target collections are created on the
    /// fly with a warning.
    pub fn add_files_to_collections(
        &mut self,
        files: &[String],
        collections: &[String],
    ) -> Result<()> {
        self.ensure_not_reserved(collections)?;
        let mut rels: Vec<RelPath> = vec![];
        for raw in files {
            let rel = self.secure.validate_path(Path::new(raw))?;
            if !rels.contains(&rel) {
                rels.push(rel);
            }
        }
        let missing: Vec<String> = rels
            .iter()
            .filter(|rel| !self.platform.file_exists(&self.secure.abs_path(rel)))
            .map(|rel| rel.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::MissingFiles(missing));
        }

        for name in collections {
            if self.secure.registry().collection(name).is_none() {
                self.secure.registry_mut().add_collection(name)?;
                self.warn(Warning::CollectionCreated { name: name.clone() });
            }
        }
        for rel in &rels {
            if !self.secure.registry().is_registered_file(rel) {
                let abs = self.secure.abs_path(rel);
                match self.platform.file_info(&abs) {
                    Ok(file_info) => {
                        self.secure.registry_mut().register_file(
                            rel.clone(),
                            format_mode(file_info.mode),
                            file_info.owner,
                            file_info.group,
                        )?;
                    }
                    Err(err) => {
                        self.record_error(format!(
                            "failed to read metadata of '{}': {}",
                            rel, err
                        ));
                        continue;
                    }
                }
            }
            for name in collections {
                self.secure.registry_mut().add_file_to_collection(rel, name)?;
            }
        }
        self.save_registry()
    }

    pub fn remove_files_from_collections(
        &mut self,
        files: &[String],
        collections: &[String],
    ) -> Result<()> {
        let rels = self.validate_batch(files);
        for name in collections {
            if self.secure.registry().collection(name).is_none() {
                self.warn(Warning::CollectionNotFound { name: name.clone() });
                continue;
            }
            for rel in &rels {
                let removed = self
                    .secure
                    .registry_mut()
                    .remove_file_from_collection(rel, name)?;
                if !removed {
                    self.warn(Warning::FileNotInCollection {
                        path: rel.to_string(),
                        collection: name.clone(),
                    });
                }
            }
        }
        self.save_registry()
    }

    /// Union the source collections' members into the targets. Members
    /// missing on disk are filtered out with a warning; missing targets are
    /// created with a warning.
    pub fn add_collections_to_collections(
        &mut self,
        sources: &[String],
        targets: &[String],
    ) -> Result<()> {
        self.ensure_not_reserved(targets)?;
        let mut merged: Vec<RelPath> = vec![];
        for source in sources {
            let Some(collection) = self.secure.registry().collection(source).cloned() else {
                self.warn(Warning::CollectionNotFound {
                    name: source.clone(),
                });
                continue;
            };
            for member in collection.files {
                if !self.platform.file_exists(&self.secure.abs_path(&member)) {
                    self.warn(Warning::FileMissing {
                        path: member.to_string(),
                    });
                    continue;
                }
                if !merged.contains(&member) {
                    merged.push(member);
                }
            }
        }
        for target in targets {
            if self.secure.registry().collection(target).is_none() {
                self.secure.registry_mut().add_collection(target)?;
                self.warn(Warning::CollectionCreated {
                    name: target.clone(),
                });
            }
            for rel in &merged {
                self.secure
                    .registry_mut()
                    .add_file_to_collection(rel, target)?;
            }
        }
        self.save_registry()
    }

    /// Set difference: drop the source collections' members from the targets.
    pub fn remove_collections_from_collections(
        &mut self,
        sources: &[String],
        targets: &[String],
    ) -> Result<()> {
        let mut members: Vec<RelPath> = vec![];
        for source in sources {
            let Some(collection) = self.secure.registry().collection(source).cloned() else {
                self.warn(Warning::CollectionNotFound {
                    name: source.clone(),
                });
                continue;
            };
            for member in collection.files {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
        }
        for target in targets {
            if self.secure.registry().collection(target).is_none() {
                self.warn(Warning::CollectionNotFound {
                    name: target.clone(),
                });
                continue;
            }
            for rel in &members {
                self.secure
                    .registry_mut()
                    .remove_file_from_collection(rel, target)?;
            }
        }
        self.save_registry()
    }

    /// Structured view of collections; with no arguments, all of them.
    pub fn show_collections(&mut self, names: &[String]) -> Result<Vec<CollectionView>> {
        let names: Vec<String> = if names.is_empty() {
            self.secure
                .registry()
                .collections()
                .iter()
                .map(|c| c.name.clone())
                .collect()
        } else {
            names.to_vec()
        };
        let mut views = vec![];
        for name in &names {
            let Some(collection) = self.secure.registry().collection(name).cloned() else {
                self.warn(Warning::CollectionNotFound { name: name.clone() });
                continue;
            };
            let mut members = vec![];
            let mut any_missing = false;
            for member in &collection.files {
                let missing = !self.platform.file_exists(&self.secure.abs_path(member));
                any_missing = any_missing || missing;
                members.push(MemberView {
                    path: member.to_string(),
                    guard: self
                        .secure
                        .registry()
                        .file(member)
                        .map(|f| f.guard)
                        .unwrap_or(false),
                    missing,
                });
            }
            if any_missing {
                self.warn(Warning::CollectionHasMissingFiles { name: name.clone() });
            }
            views.push(CollectionView {
                name: collection.name,
                guard: collection.guard,
                members,
            });
        }
        Ok(views)
    }
}
