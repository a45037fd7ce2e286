/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/// Non-fatal diagnostics accumulated during one command and printed at the
/// end, grouped by kind with duplicates coalesced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    FileMissing { path: String },
    FileNotInRegistry { path: String },
    /// Recorded for idempotent adds but never printed.
    FileAlreadyInRegistry { path: String },
    FileAlreadyGuarded { path: String },
    FileNotInCollection { path: String, collection: String },
    CollectionEmpty { name: String },
    CollectionNotFound { name: String },
    CollectionAlreadyExists { name: String },
    CollectionHasMissingFiles { name: String },
    CollectionCreated { name: String },
    FolderEmpty { path: String },
    Generic { message: String },
}

const CLEANUP_SUGGESTION: &str = "run cleanup to remove missing files from the registry";

impl Warning {
    /// Stable grouping order for rendering.
    fn group(&self) -> usize {
        match self {
            Warning::FileMissing { .. } => 0,
            Warning::FileNotInRegistry { .. } => 1,
            Warning::FileAlreadyInRegistry { .. } => 2,
            Warning::FileAlreadyGuarded { .. } => 3,
            Warning::FileNotInCollection { .. } => 4,
            Warning::CollectionEmpty { .. } => 5,
            Warning::CollectionNotFound { .. } => 6,
            Warning::CollectionAlreadyExists { .. } => 7,
            Warning::CollectionHasMissingFiles { .. } => 8,
            Warning::CollectionCreated { .. } => 9,
            Warning::FolderEmpty { .. } => 10,
            Warning::Generic { .. } => 11,
        }
    }

    fn line(&self) -> Option<String> {
        match self {
            Warning::FileMissing { path } => Some(format!("file '{path}' not found on disk")),
            Warning::FileNotInRegistry { path } => Some(format!("file '{path}' is not registered")),
            Warning::FileAlreadyInRegistry { .. } => None,
            Warning::FileAlreadyGuarded { path } => {
                Some(format!("file '{path}' is already guarded"))
            }
            Warning::FileNotInCollection { path, collection } => {
                Some(format!("file '{path}' is not in collection '{collection}'"))
            }
            Warning::CollectionEmpty { name } => Some(format!("collection '{name}' has no files")),
            Warning::CollectionNotFound { name } => {
                Some(format!("collection '{name}' does not exist"))
            }
            Warning::CollectionAlreadyExists { name } => {
                Some(format!("collection '{name}' already exists"))
            }
            Warning::CollectionHasMissingFiles { name } => {
                Some(format!("collection '{name}' has files missing on disk"))
            }
            Warning::CollectionCreated { name } => Some(format!("collection '{name}' was created")),
            Warning::FolderEmpty { path } => Some(format!("folder '{path}' has no files")),
            Warning::Generic { message } => Some(message.clone()),
        }
    }
}

/// Render one line per warning, grouped by kind, duplicates dropped.
/// The cleanup suggestion follows the missing-file lines exactly once,
/// however many files are missing.
pub fn render(warnings: &[Warning]) -> Vec<String> {
    let mut sorted: Vec<&Warning> = warnings.iter().collect();
    sorted.sort_by_key(|w| w.group());

    let mut lines = vec![];
    let mut seen = vec![];
    let mut any_missing = false;
    for warning in sorted {
        if seen.contains(&warning) {
            continue;
        }
        seen.push(warning);
        if let Warning::FileMissing { .. } = warning {
            any_missing = true;
        }
        if let Some(line) = warning.line() {
            lines.push(line);
        }
    }
    if any_missing {
        // groups are contiguous, so the suggestion lands after the last
        // missing-file line
        let after_missing = lines
            .iter()
            .rposition(|l| l.starts_with("file '") && l.ends_with("not found on disk"))
            .map(|i| i + 1)
            .unwrap_or(lines.len());
        lines.insert(after_missing, CLEANUP_SUGGESTION.to_owned());
    }
    lines
}
