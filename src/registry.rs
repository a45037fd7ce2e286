/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{parse_file_mode, parse_guard_mode, Config, LastToggle, ToggleKind};
use crate::path::RelPath;

type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("file '{0}' is not registered")]
    FileNotRegistered(RelPath),
    #[error("file '{0}' is already registered")]
    FileAlreadyRegistered(RelPath),
    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),
    #[error("collection '{0}' already exists")]
    CollectionAlreadyExists(String),
    #[error("folder '{0}' does not exist")]
    FolderNotFound(String),
}

/// One protected file. `mode`, `owner` and `group` are the *original*
/// metadata observed at registration. They are captured exactly once and
/// never mutated by guard cycles: disable restores from them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub path: RelPath,
    /// Original permission bits, 4-digit octal
    pub mode: String,
    /// Original owner name, empty if lookup failed
    pub owner: String,
    /// Original group name, empty if lookup failed
    pub group: String,
    pub guard: bool,
}

/// A named set of registered file paths. Membership is stored as path keys
/// into the file table, so files and collections never own each other.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CollectionEntry {
    pub name: String,
    pub files: Vec<RelPath>,
    pub guard: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl CollectionEntry {
    /// Config used when enabling guard through this collection: override
    /// fields take effect, the rest falls back to the process defaults.
    pub fn effective_config(&self, base: &Config) -> Config {
        Config {
            guard_mode: self.mode.clone().unwrap_or_else(|| base.guard_mode.clone()),
            guard_owner: self
                .owner
                .clone()
                .unwrap_or_else(|| base.guard_owner.clone()),
            guard_group: self
                .group
                .clone()
                .unwrap_or_else(|| base.guard_group.clone()),
        }
    }
}

/// A directory whose immediate children are protected together.
/// `path` keeps a leading `./`; `name` is `@` + path without `./`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FolderEntry {
    pub name: String,
    pub path: String,
    pub guard: bool,
}

/// In-memory registry state, a faithful image of the control file.
///
/// Pure data with invariants: no I/O on protected files and no path
/// validation happens here (that is the security wrapper's job).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Registry {
    pub config: Config,
    #[serde(default)]
    files: Vec<FileEntry>,
    #[serde(default)]
    collections: Vec<CollectionEntry>,
    #[serde(default)]
    folders: Vec<FolderEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_toggle: Option<LastToggle>,
}

impl Registry {
    pub fn new(config: Config) -> Self {
        Registry {
            config,
            files: vec![],
            collections: vec![],
            folders: vec![],
            last_toggle: None,
        }
    }

    /// Structural validation run after deserialization: octal modes parse,
    /// names and paths are unique, every collection member is a declared
    /// file. Returns a description of the first violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        parse_guard_mode(&self.config.guard_mode)
            .map_err(|_| format!("config guard_mode '{}' is not octal", self.config.guard_mode))?;

        let mut seen_files = HashSet::new();
        for file in &self.files {
            parse_file_mode(&file.mode)
                .map_err(|_| format!("file '{}' mode '{}' is not octal", file.path, file.mode))?;
            if !seen_files.insert(&file.path) {
                return Err(format!("duplicate file entry '{}'", file.path));
            }
        }

        let mut seen_collections = HashSet::new();
        for collection in &self.collections {
            if collection.name.is_empty() {
                return Err("collection with empty name".to_owned());
            }
            if !seen_collections.insert(&collection.name) {
                return Err(format!("duplicate collection '{}'", collection.name));
            }
            if let Some(mode) = &collection.mode {
                parse_guard_mode(mode).map_err(|_| {
                    format!("collection '{}' mode '{}' is not octal", collection.name, mode)
                })?;
            }
            let mut seen_members = HashSet::new();
            for member in &collection.files {
                if !seen_files.contains(member) {
                    return Err(format!(
                        "collection '{}' references unregistered file '{}'",
                        collection.name, member
                    ));
                }
                if !seen_members.insert(member) {
                    return Err(format!(
                        "collection '{}' lists '{}' twice",
                        collection.name, member
                    ));
                }
            }
        }

        let mut seen_folders = HashSet::new();
        for folder in &self.folders {
            let Some(stripped) = folder.path.strip_prefix("./") else {
                return Err(format!("folder path '{}' lacks './' prefix", folder.path));
            };
            if folder.name != format!("@{}", stripped) {
                return Err(format!(
                    "folder name '{}' does not match path '{}'",
                    folder.name, folder.path
                ));
            }
            if !seen_folders.insert(&folder.name) {
                return Err(format!("duplicate folder '{}'", folder.name));
            }
        }

        Ok(())
    }

    pub fn register_file(
        &mut self,
        path: RelPath,
        mode: String,
        owner: String,
        group: String,
    ) -> Result<()> {
        if self.is_registered_file(&path) {
            return Err(RegistryError::FileAlreadyRegistered(path));
        }
        self.files.push(FileEntry {
            path,
            mode,
            owner,
            group,
            guard: false,
        });
        Ok(())
    }

    /// Drops a file entry and, atomically with it, its membership in every
    /// collection.
    pub fn unregister_file(&mut self, path: &RelPath, ignore_missing: bool) -> Result<()> {
        if !self.is_registered_file(path) {
            if ignore_missing {
                return Ok(());
            }
            return Err(RegistryError::FileNotRegistered(path.clone()));
        }
        self.remove_file_from_all_collections(path);
        self.files.retain(|f| &f.path != path);
        Ok(())
    }

    pub fn is_registered_file(&self, path: &RelPath) -> bool {
        self.files.iter().any(|f| &f.path == path)
    }

    pub fn file(&self, path: &RelPath) -> Option<&FileEntry> {
        self.files.iter().find(|f| &f.path == path)
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn set_file_guard(&mut self, path: &RelPath, guard: bool) -> Result<()> {
        let file = self
            .files
            .iter_mut()
            .find(|f| &f.path == path)
            .ok_or_else(|| RegistryError::FileNotRegistered(path.clone()))?;
        file.guard = guard;
        Ok(())
    }

    pub fn add_collection(&mut self, name: &str) -> Result<()> {
        if self.collection(name).is_some() {
            return Err(RegistryError::CollectionAlreadyExists(name.to_owned()));
        }
        self.collections.push(CollectionEntry {
            name: name.to_owned(),
            files: vec![],
            guard: false,
            mode: None,
            owner: None,
            group: None,
        });
        Ok(())
    }

    pub fn remove_collection(&mut self, name: &str) -> Result<()> {
        if self.collection(name).is_none() {
            return Err(RegistryError::CollectionNotFound(name.to_owned()));
        }
        self.collections.retain(|c| c.name != name);
        Ok(())
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionEntry> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn collection_mut(&mut self, name: &str) -> Option<&mut CollectionEntry> {
        self.collections.iter_mut().find(|c| c.name == name)
    }

    pub fn collections(&self) -> &[CollectionEntry] {
        &self.collections
    }

    pub fn set_collection_guard(&mut self, name: &str, guard: bool) -> Result<()> {
        let collection = self
            .collections
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| RegistryError::CollectionNotFound(name.to_owned()))?;
        collection.guard = guard;
        Ok(())
    }

    /// Idempotent membership add; the file must already be registered.
    /// Returns whether the member was actually added.
    pub fn add_file_to_collection(&mut self, path: &RelPath, name: &str) -> Result<bool> {
        if !self.is_registered_file(path) {
            return Err(RegistryError::FileNotRegistered(path.clone()));
        }
        let collection = self
            .collections
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| RegistryError::CollectionNotFound(name.to_owned()))?;
        if collection.files.contains(path) {
            return Ok(false);
        }
        collection.files.push(path.clone());
        Ok(true)
    }

    /// Returns whether the member was actually removed.
    pub fn remove_file_from_collection(&mut self, path: &RelPath, name: &str) -> Result<bool> {
        let collection = self
            .collections
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| RegistryError::CollectionNotFound(name.to_owned()))?;
        let before = collection.files.len();
        collection.files.retain(|p| p != path);
        Ok(collection.files.len() != before)
    }

    pub fn remove_file_from_all_collections(&mut self, path: &RelPath) {
        for collection in &mut self.collections {
            collection.files.retain(|p| p != path);
        }
    }

    pub fn clear_collection(&mut self, name: &str) -> Result<()> {
        let collection = self
            .collections
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| RegistryError::CollectionNotFound(name.to_owned()))?;
        collection.files.clear();
        Ok(())
    }

    pub fn collections_containing(&self, path: &RelPath) -> Vec<&str> {
        self.collections
            .iter()
            .filter(|c| c.files.contains(path))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Creates the folder entry for `path` if absent. Returns whether a new
    /// entry was created.
    pub fn register_folder(&mut self, path: &RelPath) -> bool {
        let form = path.folder_form();
        if self.folder_by_path(&form).is_some() {
            return false;
        }
        self.folders.push(FolderEntry {
            name: path.folder_alias(),
            path: form,
            guard: false,
        });
        true
    }

    pub fn folder_by_name(&self, name: &str) -> Option<&FolderEntry> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn folder_by_path(&self, path_form: &str) -> Option<&FolderEntry> {
        self.folders.iter().find(|f| f.path == path_form)
    }

    pub fn folders(&self) -> &[FolderEntry] {
        &self.folders
    }

    pub fn set_folder_guard(&mut self, path_form: &str, guard: bool) -> Result<()> {
        let folder = self
            .folders
            .iter_mut()
            .find(|f| f.path == path_form)
            .ok_or_else(|| RegistryError::FolderNotFound(path_form.to_owned()))?;
        folder.guard = guard;
        Ok(())
    }

    pub fn set_last_toggle(&mut self, name: String, kind: ToggleKind) {
        self.last_toggle = Some(LastToggle { name, kind });
    }

    pub fn last_toggle(&self) -> Option<&LastToggle> {
        self.last_toggle.as_ref()
    }

    /// True when any file or collection currently has guard enabled.
    pub fn any_guard_active(&self) -> bool {
        self.files.iter().any(|f| f.guard) || self.collections.iter().any(|c| c.guard)
    }
}
