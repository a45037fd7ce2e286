/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! In-memory [`Platform`] double for engine tests. Injected through the same
//! `Box<dyn Platform>` seam production uses, so the immutable-flag protocol
//! is exercised without root privileges and without touching real inode
//! flags. The guardfile still lands on a real temporary directory.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tempfile::TempDir;

use crate::engine::Engine;
use crate::platform::{
    DirEntryInfo, FileInfo, FlagOutcome, PermissionOutcome, Platform, PlatformError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemFile {
    pub mode: u32,
    pub owner: String,
    pub group: String,
    pub immutable: bool,
}

#[derive(Default)]
pub struct MemState {
    files: RefCell<BTreeMap<PathBuf, MemFile>>,
    dirs: RefCell<BTreeSet<PathBuf>>,
}

/// Cloning shares the underlying state, so tests keep a probe handle while
/// the engine owns the boxed platform.
#[derive(Clone)]
pub struct MemPlatform {
    root_privileges: bool,
    state: Rc<MemState>,
}

impl MemPlatform {
    pub fn new(root_privileges: bool) -> Self {
        MemPlatform {
            root_privileges,
            state: Rc::new(MemState::default()),
        }
    }

    pub fn add_file(&self, path: &Path, mode: u32, owner: &str, group: &str) {
        self.state.files.borrow_mut().insert(
            path.to_path_buf(),
            MemFile {
                mode,
                owner: owner.to_owned(),
                group: group.to_owned(),
                immutable: false,
            },
        );
    }

    pub fn add_dir(&self, path: &Path) {
        self.state.dirs.borrow_mut().insert(path.to_path_buf());
    }

    pub fn remove_file(&self, path: &Path) {
        self.state.files.borrow_mut().remove(path);
    }

    /// Simulate drift from outside the tool.
    pub fn chmod_external(&self, path: &Path, mode: u32) {
        self.state
            .files
            .borrow_mut()
            .get_mut(path)
            .expect("no such mem file")
            .mode = mode;
    }

    pub fn mem_file(&self, path: &Path) -> MemFile {
        self.state
            .files
            .borrow()
            .get(path)
            .expect("no such mem file")
            .clone()
    }
}

impl Platform for MemPlatform {
    fn file_info(&self, path: &Path) -> Result<FileInfo, PlatformError> {
        let files = self.state.files.borrow();
        let file = files
            .get(path)
            .ok_or_else(|| PlatformError::NotFound(path.to_path_buf()))?;
        Ok(FileInfo {
            mode: file.mode,
            owner: file.owner.clone(),
            group: file.group.clone(),
        })
    }

    fn apply_permissions(
        &self,
        path: &Path,
        mode: u32,
        owner: &str,
        group: &str,
    ) -> Result<PermissionOutcome, PlatformError> {
        let mut files = self.state.files.borrow_mut();
        let file = files
            .get_mut(path)
            .ok_or_else(|| PlatformError::NotFound(path.to_path_buf()))?;
        file.mode = mode;
        if owner.is_empty() && group.is_empty() {
            return Ok(PermissionOutcome {
                ownership_skipped: false,
            });
        }
        if !self.root_privileges {
            return Ok(PermissionOutcome {
                ownership_skipped: true,
            });
        }
        if !owner.is_empty() {
            file.owner = owner.to_owned();
        }
        if !group.is_empty() {
            file.group = group.to_owned();
        }
        Ok(PermissionOutcome {
            ownership_skipped: false,
        })
    }

    fn set_immutable(&self, path: &Path) -> Result<FlagOutcome, PlatformError> {
        if !self.root_privileges {
            return Ok(FlagOutcome { skipped: true });
        }
        let mut files = self.state.files.borrow_mut();
        let file = files
            .get_mut(path)
            .ok_or_else(|| PlatformError::NotFound(path.to_path_buf()))?;
        file.immutable = true;
        Ok(FlagOutcome { skipped: false })
    }

    fn clear_immutable(&self, path: &Path) -> Result<FlagOutcome, PlatformError> {
        if !self.root_privileges {
            return Ok(FlagOutcome { skipped: true });
        }
        let mut files = self.state.files.borrow_mut();
        let file = files
            .get_mut(path)
            .ok_or_else(|| PlatformError::NotFound(path.to_path_buf()))?;
        file.immutable = false;
        Ok(FlagOutcome { skipped: false })
    }

    fn is_immutable(&self, path: &Path) -> Result<bool, PlatformError> {
        Ok(self
            .state
            .files
            .borrow()
            .get(path)
            .map(|f| f.immutable)
            .unwrap_or(false))
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.state.files.borrow().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state.dirs.borrow().contains(path)
            || self
                .state
                .files
                .borrow()
                .keys()
                .any(|k| k.parent().map(|p| p.starts_with(path)).unwrap_or(false))
    }

    fn is_symlink(&self, _path: &Path) -> bool {
        false
    }

    fn collect_immediate_files(&self, dir: &Path) -> Result<Vec<PathBuf>, PlatformError> {
        Ok(self
            .state
            .files
            .borrow()
            .keys()
            .filter(|k| k.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn collect_files_recursive(&self, dir: &Path) -> Result<Vec<PathBuf>, PlatformError> {
        Ok(self
            .state
            .files
            .borrow()
            .keys()
            .filter(|k| k.starts_with(dir))
            .cloned()
            .collect())
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<DirEntryInfo>, PlatformError> {
        let mut entries = vec![];
        for path in self.collect_immediate_files(dir)? {
            entries.push(DirEntryInfo {
                name: path.file_name().unwrap().to_string_lossy().into_owned(),
                path: path.clone(),
                is_dir: false,
                is_symlink: false,
            });
        }
        Ok(entries)
    }

    fn has_root_privileges(&self) -> bool {
        self.root_privileges
    }
}

/// Fresh project in a temp dir with a non-root in-memory platform and the
/// default test config (mode 0640, owner alice, group staff).
pub fn setup() -> (TempDir, Engine, MemPlatform) {
    setup_with_root(false)
}

pub fn setup_with_root(root_privileges: bool) -> (TempDir, Engine, MemPlatform) {
    let root = TempDir::new().unwrap();
    let platform = MemPlatform::new(root_privileges);
    let probe = platform.clone();
    let engine = Engine::init(
        root.path(),
        Box::new(platform),
        "0640",
        "alice",
        "staff",
        false,
    )
    .unwrap();
    (root, engine, probe)
}

/// Absolute location of `name` under the (canonicalized) project root.
/// The engine resolves against the canonical root, so the fake disk must
/// key its entries the same way.
pub fn abs(root: &TempDir, name: &str) -> PathBuf {
    root.path().canonicalize().unwrap().join(name)
}

/// Absolute path string for passing through the engine's raw-path API.
pub fn arg(root: &TempDir, name: &str) -> String {
    abs(root, name).display().to_string()
}

/// Register a file on the fake disk and return its engine argument.
pub fn seed_file(root: &TempDir, probe: &MemPlatform, name: &str, mode: u32) -> String {
    probe.add_file(&abs(root, name), mode, "alice", "staff");
    arg(root, name)
}
