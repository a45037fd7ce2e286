/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::Display;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Project-root-relative path in canonical form: `/`-separated,
/// no leading `/` or `./`, no `..` components.
///
/// Values are produced by path validation (see [`crate::secure`]) or by
/// deserialization, in which case they are re-checked after load.
#[derive(Debug, Clone, Hash, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct RelPath(String);

impl Display for RelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RelPath {
    fn from(value: &str) -> Self {
        RelPath(value.to_owned())
    }
}

impl From<String> for RelPath {
    fn from(value: String) -> Self {
        RelPath(value)
    }
}

impl AsRef<Path> for RelPath {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl RelPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the stored form stays inside the project root:
    /// not absolute and not reaching through a leading `..`.
    pub fn is_confined(&self) -> bool {
        let path = Path::new(&self.0);
        !path.is_absolute()
            && !matches!(path.components().next(), Some(Component::ParentDir))
            && !self.0.is_empty()
    }

    /// Folder form of this path, with the leading `./` folders carry.
    pub fn folder_form(&self) -> String {
        format!("./{}", self.0)
    }

    /// Folder alias: `@` + path without `./` (e.g. `src/x` -> `@src/x`).
    pub fn folder_alias(&self) -> String {
        format!("@{}", self.0)
    }
}

/// Strip the decorations a folder path may carry (`./` prefix, trailing `/`)
/// so equal folders compare equal before validation.
pub fn strip_folder_decorations(raw: &str) -> &str {
    let raw = raw.strip_prefix("./").unwrap_or(raw);
    raw.strip_suffix('/').unwrap_or(raw)
}

/// Collapse `.` and `..` components lexically, without touching the
/// filesystem. Unlike `canonicalize` this never follows symlinks, which is
/// what path confinement needs: link targets must not leak into stored paths.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut cleaned = if let Some(c @ Component::Prefix(..)) = components.peek() {
        let buf = PathBuf::from(c.as_os_str());
        components.next();
        buf
    } else {
        PathBuf::new()
    };
    for component in components {
        match component {
            Component::Prefix(..) => unreachable!(),
            Component::RootDir => cleaned.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            Component::Normal(c) => cleaned.push(c),
        }
    }
    cleaned
}
