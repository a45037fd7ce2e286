/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Immutable-flag syscalls. The only genuinely platform-specific code in the
//! tool: Linux drives the `FS_IOC_GETFLAGS`/`FS_IOC_SETFLAGS` ioctls on an
//! open descriptor, the BSD family reads `st_flags` and calls `chflags`.
//! Both paths read-modify-write so unrelated flags survive.

use std::io;
use std::path::Path;

#[cfg(not(target_os = "linux"))]
fn cstring(path: &Path) -> io::Result<std::ffi::CString> {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

/// Filesystems without attribute support answer the GETFLAGS ioctl with an
/// errno, not with empty flags; treat that as "not immutable".
fn flags_unsupported(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ENOTTY
        || code == libc::ENOTSUP
        || code == libc::EINVAL)
}

pub fn set(path: &Path) -> io::Result<()> {
    update(path, |flags| flags | IMMUTABLE)
}

pub fn clear(path: &Path) -> io::Result<()> {
    update(path, |flags| flags & !IMMUTABLE)
}

pub fn query(path: &Path) -> io::Result<bool> {
    match read_flags(path) {
        Ok(flags) => Ok(flags & IMMUTABLE != 0),
        Err(err) if flags_unsupported(&err) => Ok(false),
        Err(err) => Err(err),
    }
}

// Not exposed by the `libc` crate; value is stable ABI from linux/fs.h.
#[cfg(target_os = "linux")]
const FS_IMMUTABLE_FL: libc::c_long = 0x00000010;

#[cfg(target_os = "linux")]
const IMMUTABLE: libc::c_long = FS_IMMUTABLE_FL;

#[cfg(target_os = "linux")]
fn read_flags(path: &Path) -> io::Result<libc::c_long> {
    use std::os::fd::AsRawFd;
    let file = std::fs::File::open(path)?;
    let mut flags: libc::c_long = 0;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), libc::FS_IOC_GETFLAGS, &mut flags) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags)
}

#[cfg(target_os = "linux")]
fn update(path: &Path, update: impl Fn(libc::c_long) -> libc::c_long) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    let file = std::fs::File::open(path)?;
    let fd = file.as_raw_fd();
    let mut flags: libc::c_long = 0;
    if unsafe { libc::ioctl(fd, libc::FS_IOC_GETFLAGS, &mut flags) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let updated = update(flags);
    if updated == flags {
        return Ok(());
    }
    if unsafe { libc::ioctl(fd, libc::FS_IOC_SETFLAGS, &updated) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
const IMMUTABLE: libc::c_long = libc::SF_IMMUTABLE as libc::c_long;

#[cfg(not(target_os = "linux"))]
fn read_flags(path: &Path) -> io::Result<libc::c_long> {
    let cpath = cstring(path)?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(cpath.as_ptr(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st.st_flags as libc::c_long)
}

#[cfg(not(target_os = "linux"))]
fn update(path: &Path, update: impl Fn(libc::c_long) -> libc::c_long) -> io::Result<()> {
    let flags = read_flags(path)?;
    let updated = update(flags);
    if updated == flags {
        return Ok(());
    }
    let cpath = cstring(path)?;
    if unsafe { libc::chflags(cpath.as_ptr(), updated as _) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_regular_file_is_not_immutable() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "content").unwrap();
        assert_eq!(false, query(&file).unwrap());
    }

    #[test]
    fn test_query_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(query(&dir.path().join("ghost")).is_err());
    }
}
