/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod immutable;

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;
use walkdir::WalkDir;

type Result<T> = std::result::Result<T, PlatformError>;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("'{0}' not found")]
    NotFound(PathBuf),
    #[error("permission denied for '{0}'")]
    Permission(PathBuf),
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    #[error("unknown group '{0}'")]
    UnknownGroup(String),
    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PlatformError {
    fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => PlatformError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => PlatformError::Permission(path.to_path_buf()),
            _ => PlatformError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

/// Permission bits plus resolved owner and group names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub mode: u32,
    pub owner: String,
    pub group: String,
}

/// One directory entry, lstat-based so symlinks report as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// Result of a permission apply; ownership changes are skipped without root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionOutcome {
    pub ownership_skipped: bool,
}

/// Result of an immutable-flag change; skipped without root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagOutcome {
    pub skipped: bool,
}

/// POSIX capability set the engine runs against. One production
/// implementation ([`LocalPlatform`]) plus in-memory doubles in tests.
///
/// Implementations never print and never consult the registry; every
/// failure is returned as data for the caller to warn, retry or abort on.
pub trait Platform {
    fn file_info(&self, path: &Path) -> Result<FileInfo>;

    /// `chmod` unconditionally, then ownership if `owner`/`group` are
    /// non-empty. Without root privileges ownership is skipped, not errored;
    /// the outcome reports the skip so the caller can warn once per batch.
    fn apply_permissions(
        &self,
        path: &Path,
        mode: u32,
        owner: &str,
        group: &str,
    ) -> Result<PermissionOutcome>;

    /// Same semantics as [`Platform::apply_permissions`]; separate entry
    /// point so call sites read as what they are (guard off, not on).
    fn restore_permissions(
        &self,
        path: &Path,
        mode: u32,
        owner: &str,
        group: &str,
    ) -> Result<PermissionOutcome> {
        self.apply_permissions(path, mode, owner, group)
    }

    fn set_immutable(&self, path: &Path) -> Result<FlagOutcome>;
    fn clear_immutable(&self, path: &Path) -> Result<FlagOutcome>;
    fn is_immutable(&self, path: &Path) -> Result<bool>;

    /// Regular files only: false for directories, symlinks and specials.
    fn file_exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn is_symlink(&self, path: &Path) -> bool;

    /// Order-preserving partition into (existing, missing).
    fn check_files_exist(&self, paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut existing = vec![];
        let mut missing = vec![];
        for path in paths {
            if self.file_exists(path) {
                existing.push(path.clone());
            } else {
                missing.push(path.clone());
            }
        }
        (existing, missing)
    }

    /// Regular files directly in `dir`, symlinks and subdirectories excluded.
    fn collect_immediate_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Regular files anywhere under `dir`, symlinks excluded, never followed.
    fn collect_files_recursive(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Entries sorted directories-first, then alphabetically.
    fn read_dir(&self, dir: &Path) -> Result<Vec<DirEntryInfo>>;

    fn has_root_privileges(&self) -> bool;
}

/// Platform backed by the host filesystem.
pub struct LocalPlatform {}

impl LocalPlatform {
    pub fn new() -> Self {
        LocalPlatform {}
    }
}

fn owner_name(uid: u32) -> String {
    uzers::get_user_by_uid(uid)
        .map(|u| u.name().to_string_lossy().into_owned())
        .unwrap_or_else(|| uid.to_string())
}

fn group_name(gid: u32) -> String {
    uzers::get_group_by_gid(gid)
        .map(|g| g.name().to_string_lossy().into_owned())
        .unwrap_or_else(|| gid.to_string())
}

fn cstring(path: &Path) -> io::Result<std::ffi::CString> {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

/// `chown` with either side left unchanged when `None`.
fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    let cpath = cstring(path)?;
    let uid = uid.map(|v| v as libc::uid_t).unwrap_or(libc::uid_t::MAX);
    let gid = gid.map(|v| v as libc::gid_t).unwrap_or(libc::gid_t::MAX);
    if unsafe { libc::chown(cpath.as_ptr(), uid, gid) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Platform for LocalPlatform {
    fn file_info(&self, path: &Path) -> Result<FileInfo> {
        let meta = fs::metadata(path).map_err(|err| PlatformError::from_io(path, err))?;
        Ok(FileInfo {
            mode: meta.mode() & 0o7777,
            owner: owner_name(meta.uid()),
            group: group_name(meta.gid()),
        })
    }

    fn apply_permissions(
        &self,
        path: &Path,
        mode: u32,
        owner: &str,
        group: &str,
    ) -> Result<PermissionOutcome> {
        debug!(
            "apply mode {:04o}, owner '{}', group '{}' to '{}'",
            mode,
            owner,
            group,
            path.display()
        );
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|err| PlatformError::from_io(path, err))?;

        if owner.is_empty() && group.is_empty() {
            return Ok(PermissionOutcome {
                ownership_skipped: false,
            });
        }
        if !self.has_root_privileges() {
            return Ok(PermissionOutcome {
                ownership_skipped: true,
            });
        }

        if !owner.is_empty() {
            let uid = uzers::get_user_by_name(owner)
                .map(|u| u.uid())
                .ok_or_else(|| PlatformError::UnknownUser(owner.to_owned()))?;
            chown(path, Some(uid), None).map_err(|err| PlatformError::from_io(path, err))?;
        }
        if !group.is_empty() {
            let gid = uzers::get_group_by_name(group)
                .map(|g| g.gid())
                .ok_or_else(|| PlatformError::UnknownGroup(group.to_owned()))?;
            chown(path, None, Some(gid)).map_err(|err| PlatformError::from_io(path, err))?;
        }
        Ok(PermissionOutcome {
            ownership_skipped: false,
        })
    }

    fn set_immutable(&self, path: &Path) -> Result<FlagOutcome> {
        if !self.has_root_privileges() {
            return Ok(FlagOutcome { skipped: true });
        }
        debug!("set immutable flag on '{}'", path.display());
        immutable::set(path).map_err(|err| PlatformError::from_io(path, err))?;
        Ok(FlagOutcome { skipped: false })
    }

    fn clear_immutable(&self, path: &Path) -> Result<FlagOutcome> {
        if !self.has_root_privileges() {
            return Ok(FlagOutcome { skipped: true });
        }
        debug!("clear immutable flag on '{}'", path.display());
        immutable::clear(path).map_err(|err| PlatformError::from_io(path, err))?;
        Ok(FlagOutcome { skipped: false })
    }

    fn is_immutable(&self, path: &Path) -> Result<bool> {
        immutable::query(path).map_err(|err| PlatformError::from_io(path, err))
    }

    fn file_exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_file())
            .unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_dir())
            .unwrap_or(false)
    }

    fn is_symlink(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false)
    }

    fn collect_immediate_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(dir).map_err(|err| PlatformError::from_io(dir, err))?;
        let mut files = vec![];
        for entry in entries {
            let entry = entry.map_err(|err| PlatformError::from_io(dir, err))?;
            let file_type = entry
                .file_type()
                .map_err(|err| PlatformError::from_io(&entry.path(), err))?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn collect_files_recursive(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = vec![];
        for entry in WalkDir::new(dir).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
            let entry = entry.map_err(|err| PlatformError::Io {
                path: dir.to_path_buf(),
                source: err.into(),
            })?;
            if entry.file_type().is_file() {
                files.push(entry.path().to_path_buf());
            }
        }
        Ok(files)
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<DirEntryInfo>> {
        let entries = fs::read_dir(dir).map_err(|err| PlatformError::from_io(dir, err))?;
        let mut infos = vec![];
        for entry in entries {
            let entry = entry.map_err(|err| PlatformError::from_io(dir, err))?;
            let file_type = entry
                .file_type()
                .map_err(|err| PlatformError::from_io(&entry.path(), err))?;
            infos.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_dir: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
            });
        }
        infos.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
        Ok(infos)
    }

    fn has_root_privileges(&self) -> bool {
        uzers::get_effective_uid() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use tempfile::TempDir;

    use super::*;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, "content").unwrap();
        path
    }

    #[test]
    fn test_file_info_captures_permission_bits() {
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "a.txt");
        fs::set_permissions(&file, fs::Permissions::from_mode(0o640)).unwrap();

        let info = LocalPlatform::new().file_info(&file).unwrap();
        assert_eq!(0o640, info.mode);
        assert!(!info.owner.is_empty());
        assert!(!info.group.is_empty());
    }

    #[test]
    fn test_file_info_missing() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            LocalPlatform::new().file_info(&dir.path().join("ghost")),
            Err(PlatformError::NotFound(_))
        ));
    }

    #[test]
    fn test_apply_permissions_chmods() {
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "a.txt");

        let platform = LocalPlatform::new();
        let outcome = platform.apply_permissions(&file, 0o600, "", "").unwrap();
        assert!(!outcome.ownership_skipped);
        assert_eq!(0o600, platform.file_info(&file).unwrap().mode);
    }

    #[test]
    fn test_ownership_skipped_without_root() {
        let platform = LocalPlatform::new();
        if platform.has_root_privileges() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "a.txt");
        let outcome = platform
            .apply_permissions(&file, 0o600, "nobody", "")
            .unwrap();
        assert!(outcome.ownership_skipped);
        // chmod still ran
        assert_eq!(0o600, platform.file_info(&file).unwrap().mode);
    }

    #[test]
    fn test_file_exists_only_for_regular_files() {
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "a.txt");
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let link = dir.path().join("link");
        symlink(&file, &link).unwrap();

        let platform = LocalPlatform::new();
        assert!(platform.file_exists(&file));
        assert!(!platform.file_exists(&sub));
        assert!(!platform.file_exists(&link));
        assert!(!platform.file_exists(&dir.path().join("ghost")));
    }

    #[test]
    fn test_check_files_exist_preserves_order() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a.txt");
        let b = touch(&dir, "b.txt");
        let ghost = dir.path().join("ghost");

        let (existing, missing) =
            LocalPlatform::new().check_files_exist(&[b.clone(), ghost.clone(), a.clone()]);
        assert_eq!(vec![b, a], existing);
        assert_eq!(vec![ghost], missing);
    }

    #[test]
    fn test_collect_immediate_skips_dirs_and_symlinks() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a.txt");
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "x").unwrap();
        symlink(&a, dir.path().join("link")).unwrap();

        let files = LocalPlatform::new()
            .collect_immediate_files(dir.path())
            .unwrap();
        assert_eq!(vec![a], files);
    }

    #[test]
    fn test_collect_recursive_includes_nested() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a.txt");
        fs::create_dir(dir.path().join("sub")).unwrap();
        let nested = dir.path().join("sub/nested.txt");
        fs::write(&nested, "x").unwrap();
        symlink(&a, dir.path().join("link")).unwrap();

        let files = LocalPlatform::new()
            .collect_files_recursive(dir.path())
            .unwrap();
        assert_eq!(vec![a, nested], files);
    }

    #[test]
    fn test_read_dir_sorts_dirs_first() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "b.txt");
        touch(&dir, "a.txt");
        fs::create_dir(dir.path().join("zdir")).unwrap();

        let names: Vec<String> = LocalPlatform::new()
            .read_dir(dir.path())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(vec!["zdir", "a.txt", "b.txt"], names);
    }
}
