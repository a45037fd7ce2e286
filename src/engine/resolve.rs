/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::Path;

use super::{Engine, EngineError, Result};
use crate::path::RelPath;

/// Entity an argument resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    File(String),
    Folder(String),
    Collection(String),
}

/// Parallel lists in input order, one per entity kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolvedArgs {
    pub files: Vec<String>,
    pub folders: Vec<String>,
    pub collections: Vec<String>,
}

impl Engine {
    /// Strict resolution priority: directory on disk, regular file on disk,
    /// collection name, `@`-prefixed folder name, registered file path.
    pub fn resolve_argument(&self, arg: &str) -> Result<Resolved> {
        let path = Path::new(arg);
        if self.platform.is_dir(path) {
            return Ok(Resolved::Folder(arg.to_owned()));
        }
        if self.platform.file_exists(path) {
            return Ok(Resolved::File(arg.to_owned()));
        }
        if self.secure.registry().collection(arg).is_some() {
            return Ok(Resolved::Collection(arg.to_owned()));
        }
        if let Some(folder) = self.secure.registry().folder_by_name(&format!("@{arg}")) {
            return Ok(Resolved::Folder(folder.path.clone()));
        }
        if self
            .secure
            .registry()
            .is_registered_file(&RelPath::from(arg))
        {
            return Ok(Resolved::File(arg.to_owned()));
        }
        Err(EngineError::NotFound(arg.to_owned()))
    }

    /// Resolve a whole argument list, preserving order. Any unknown
    /// argument fails the entire resolution; no partial state.
    pub fn resolve_arguments(&self, args: &[String]) -> Result<ResolvedArgs> {
        let mut resolved = ResolvedArgs::default();
        for arg in args {
            match self.resolve_argument(arg)? {
                Resolved::File(file) => resolved.files.push(file),
                Resolved::Folder(folder) => resolved.folders.push(folder),
                Resolved::Collection(collection) => resolved.collections.push(collection),
            }
        }
        Ok(resolved)
    }
}
