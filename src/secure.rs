/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::config::Config;
use crate::guardfile::{self, GuardfileError};
use crate::path::{clean_path, RelPath};
use crate::registry::Registry;

type Result<T> = std::result::Result<T, SecurityError>;

#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("'{0}' is a symbolic link, refusing to track it")]
    SymlinkRejected(String),
    #[error("'{0}' is outside the project root")]
    OutsideProjectRoot(String),
    #[error("guardfile tampering detected: {0}")]
    Tampering(String),
    #[error(transparent)]
    Guardfile(#[from] GuardfileError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Path-confinement wrapper around the registry.
///
/// Every path that reaches the registry goes through [`validate_path`]
/// first, and every load re-checks the stored paths, so a hand-edited
/// guardfile cannot point the tool at anything outside the project tree.
///
/// [`validate_path`]: SecureRegistry::validate_path
pub struct SecureRegistry {
    root: PathBuf,
    registry: Registry,
}

impl SecureRegistry {
    /// Load the control file under `root` and scan it for tampering.
    /// The registry is not exposed unless the scan passes.
    pub fn load(root: &Path) -> Result<Self> {
        let root = fs::canonicalize(root)?;
        let registry = guardfile::load(&root)?;
        let secure = SecureRegistry { root, registry };
        secure.scan_stored_paths()?;
        Ok(secure)
    }

    /// Initialize a fresh control file under `root`.
    pub fn create(root: &Path, config: Config, overwrite: bool) -> Result<Self> {
        let root = fs::canonicalize(root)?;
        if guardfile::exists(&root) && !overwrite {
            return Err(GuardfileError::AlreadyInitialized.into());
        }
        let registry = Registry::new(config);
        guardfile::save(&root, &registry)?;
        debug!("initialized guardfile at '{}'", root.display());
        Ok(SecureRegistry { root, registry })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn guardfile_path(&self) -> PathBuf {
        guardfile::guardfile_path(&self.root)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable registry access. Paths handed to the registry through this
    /// must come out of [`SecureRegistry::validate_path`].
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn save(&self) -> std::result::Result<(), GuardfileError> {
        guardfile::save(&self.root, &self.registry)
    }

    pub fn delete_guardfile(&self) -> std::result::Result<(), GuardfileError> {
        guardfile::delete(&self.root)
    }

    /// Validate a user-supplied path and return its canonical
    /// project-relative form.
    ///
    /// Symbolic links are rejected outright; nonexistent paths are tolerated
    /// (registration must work for files mid-deletion), as is anything that
    /// cleans to a location inside the project root. Cleaning is lexical so
    /// link targets never leak into the stored form.
    pub fn validate_path(&self, raw: &Path) -> Result<RelPath> {
        let display = raw.display().to_string();
        let abs = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            env::current_dir()?.join(raw)
        };
        let is_symlink = fs::symlink_metadata(&abs)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if is_symlink {
            return Err(SecurityError::SymlinkRejected(display));
        }
        let cleaned = clean_path(&abs);
        let rel = cleaned
            .strip_prefix(&self.root)
            .map_err(|_| SecurityError::OutsideProjectRoot(display.clone()))?;
        if rel.as_os_str().is_empty() {
            return Err(SecurityError::OutsideProjectRoot(display));
        }
        Ok(RelPath::from(rel.to_string_lossy().into_owned()))
    }

    /// Relative form used in user-facing messages.
    pub fn display_path(&self, abs: &Path) -> String {
        abs.strip_prefix(&self.root)
            .unwrap_or(abs)
            .display()
            .to_string()
    }

    /// Absolute on-disk location of a stored path.
    pub fn abs_path(&self, rel: &RelPath) -> PathBuf {
        self.root.join(rel.as_str())
    }

    fn scan_stored_paths(&self) -> Result<()> {
        for file in self.registry.files() {
            self.check_stored_path(file.path.as_str())?;
        }
        for collection in self.registry.collections() {
            for member in &collection.files {
                self.check_stored_path(member.as_str())?;
            }
        }
        for folder in self.registry.folders() {
            let stripped = folder.path.strip_prefix("./").unwrap_or(&folder.path);
            self.check_stored_path(stripped)?;
        }
        Ok(())
    }

    fn check_stored_path(&self, stored: &str) -> Result<()> {
        let path = Path::new(stored);
        let escapes = path.is_absolute()
            || stored.is_empty()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
        if escapes {
            return Err(SecurityError::Tampering(format!(
                "stored path '{stored}' escapes the project root"
            )));
        }
        let abs = self.root.join(stored);
        let is_symlink = fs::symlink_metadata(&abs)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if is_symlink {
            return Err(SecurityError::Tampering(format!(
                "stored path '{stored}' is a symbolic link on disk"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use tempfile::TempDir;

    use super::*;
    use crate::guardfile::guardfile_path;

    fn config() -> Config {
        Config {
            guard_mode: "0640".to_owned(),
            guard_owner: "".to_owned(),
            guard_group: "".to_owned(),
        }
    }

    fn init(root: &TempDir) -> SecureRegistry {
        SecureRegistry::create(root.path(), config(), false).unwrap()
    }

    #[test]
    fn test_create_then_load() {
        let root = TempDir::new().unwrap();
        init(&root);
        let secure = SecureRegistry::load(root.path()).unwrap();
        assert_eq!("0640", secure.registry().config.guard_mode);
    }

    #[test]
    fn test_create_twice_requires_overwrite() {
        let root = TempDir::new().unwrap();
        init(&root);
        assert!(matches!(
            SecureRegistry::create(root.path(), config(), false),
            Err(SecurityError::Guardfile(GuardfileError::AlreadyInitialized))
        ));
        SecureRegistry::create(root.path(), config(), true).unwrap();
    }

    #[test]
    fn test_validate_path_inside_root() {
        let root = TempDir::new().unwrap();
        let secure = init(&root);
        fs::write(root.path().join("a.txt"), "x").unwrap();

        let rel = secure
            .validate_path(&secure.root().join("sub/./a/../b.txt"))
            .unwrap();
        assert_eq!(RelPath::from("sub/b.txt"), rel);
        // nonexistent paths are fine as long as they stay inside
        let rel = secure.validate_path(&secure.root().join("ghost.txt")).unwrap();
        assert_eq!(RelPath::from("ghost.txt"), rel);
    }

    #[test]
    fn test_validate_path_rejects_escape() {
        let root = TempDir::new().unwrap();
        let secure = init(&root);
        assert!(matches!(
            secure.validate_path(Path::new("/etc/passwd")),
            Err(SecurityError::OutsideProjectRoot(_))
        ));
        assert!(matches!(
            secure.validate_path(&secure.root().join("a/../../outside.txt")),
            Err(SecurityError::OutsideProjectRoot(_))
        ));
        assert!(matches!(
            secure.validate_path(secure.root()),
            Err(SecurityError::OutsideProjectRoot(_))
        ));
    }

    #[test]
    fn test_validate_path_rejects_symlink() {
        let root = TempDir::new().unwrap();
        let secure = init(&root);
        fs::write(root.path().join("foo.txt"), "x").unwrap();
        symlink(root.path().join("foo.txt"), root.path().join("bar.txt")).unwrap();

        assert!(matches!(
            secure.validate_path(&secure.root().join("bar.txt")),
            Err(SecurityError::SymlinkRejected(_))
        ));
    }

    #[test]
    fn test_load_detects_traversal_tampering() {
        let root = TempDir::new().unwrap();
        let text = "\
config:
  guard_mode: \"0640\"
  guard_owner: \"\"
  guard_group: \"\"
files:
  - path: \"../outside.txt\"
    mode: \"0644\"
    owner: \"\"
    group: \"\"
    guard: false
";
        fs::write(guardfile_path(root.path()), text).unwrap();
        assert!(matches!(
            SecureRegistry::load(root.path()),
            Err(SecurityError::Tampering(_))
        ));
    }

    #[test]
    fn test_load_detects_symlink_tampering() {
        let root = TempDir::new().unwrap();
        let mut secure = init(&root);
        fs::write(root.path().join("foo.txt"), "x").unwrap();
        let rel = secure.validate_path(&root.path().join("foo.txt")).unwrap();
        secure
            .registry_mut()
            .register_file(rel, "0644".into(), "".into(), "".into())
            .unwrap();
        secure.save().unwrap();

        fs::remove_file(root.path().join("foo.txt")).unwrap();
        symlink("/etc/passwd", root.path().join("foo.txt")).unwrap();

        assert!(matches!(
            SecureRegistry::load(root.path()),
            Err(SecurityError::Tampering(_))
        ));
    }

    #[test]
    fn test_display_path() {
        let root = TempDir::new().unwrap();
        let secure = init(&root);
        assert_eq!(
            "sub/a.txt",
            secure.display_path(&secure.root().join("sub/a.txt"))
        );
    }
}
