/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid octal mode '{0}'")]
pub struct ModeError(pub String);

/// Process-wide defaults written at init time and applied whenever a guard
/// is enabled.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Permission bits applied to guarded files, 4-digit octal string
    pub guard_mode: String,
    /// Owner applied to guarded files, empty means "unchanged"
    pub guard_owner: String,
    /// Group applied to guarded files, empty means "unchanged"
    pub guard_group: String,
}

/// Breadcrumb recording the most recent toggle target, for undo UX.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LastToggle {
    pub name: String,
    pub kind: ToggleKind,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToggleKind {
    File,
    Folder,
    Collection,
}

/// Parse a guard mode string as octal in `0000..=0777`.
pub fn parse_guard_mode(s: &str) -> Result<u32, ModeError> {
    let mode = parse_octal(s, 4)?;
    if mode > 0o777 {
        return Err(ModeError(s.to_owned()));
    }
    Ok(mode)
}

/// Parse an original file mode as octal in `0000..=7777`.
/// Recorded modes keep setuid/setgid/sticky bits so restore is exact.
pub fn parse_file_mode(s: &str) -> Result<u32, ModeError> {
    parse_octal(s, 4)
}

fn parse_octal(s: &str, max_digits: usize) -> Result<u32, ModeError> {
    if s.is_empty() || s.len() > max_digits || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(ModeError(s.to_owned()));
    }
    u32::from_str_radix(s, 8).map_err(|_| ModeError(s.to_owned()))
}

pub fn format_mode(mode: u32) -> String {
    format!("{:04o}", mode)
}
