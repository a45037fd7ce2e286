/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;
use std::path::PathBuf;

use log::{debug, info};

use super::warning::Warning;
use super::{Engine, Result};
use crate::config::{format_mode, parse_file_mode, parse_guard_mode, Config, ToggleKind};
use crate::path::RelPath;

/// Desired end state for a guard batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardTarget {
    Toggle,
    Set(bool),
}

/// One registry flip awaiting its filesystem step.
struct PendingApply {
    rel: RelPath,
    abs: PathBuf,
    guard: bool,
    original_mode: u32,
    original_owner: String,
    original_group: String,
}

/// Privilege-skip warnings are emitted once per batch, not once per file.
#[derive(Default)]
pub(crate) struct SkipNotes {
    ownership_noted: bool,
    immutable_noted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileView {
    pub path: String,
    pub guard: bool,
    pub collections: Vec<String>,
}

impl Engine {
    /// Register files, capturing their current metadata as the restore
    /// target. Already-registered files are silently skipped, missing ones
    /// warned about; neither aborts the batch.
    pub fn add_files(&mut self, paths: &[String]) -> Result<()> {
        let rels = self.validate_batch(paths);
        for rel in rels {
            let abs = self.secure.abs_path(&rel);
            if !self.platform.file_exists(&abs) {
                self.warn(Warning::FileMissing {
                    path: rel.to_string(),
                });
                continue;
            }
            if self.secure.registry().is_registered_file(&rel) {
                self.warn(Warning::FileAlreadyInRegistry {
                    path: rel.to_string(),
                });
                continue;
            }
            match self.platform.file_info(&abs) {
                Ok(file_info) => {
                    self.secure.registry_mut().register_file(
                        rel.clone(),
                        format_mode(file_info.mode),
                        file_info.owner,
                        file_info.group,
                    )?;
                    info!("registered '{}'", rel);
                }
                Err(err) => {
                    self.record_error(format!("failed to read metadata of '{}': {}", rel, err))
                }
            }
        }
        self.save_registry()
    }

    /// Unregister files. Fixed order per file: detach from all collections,
    /// restore guarded files, then drop the entry. A failed restore keeps
    /// the entry registered so the user can retry.
    pub fn remove_files(&mut self, paths: &[String]) -> Result<()> {
        let rels = self.validate_batch(paths);
        self.remove_rel_files(&rels)?;
        self.save_registry()
    }

    pub(crate) fn remove_rel_files(&mut self, rels: &[RelPath]) -> Result<()> {
        let mut notes = SkipNotes::default();
        for rel in rels.iter().cloned() {
            let Some(entry) = self.secure.registry().file(&rel).cloned() else {
                self.warn(Warning::FileNotInRegistry {
                    path: rel.to_string(),
                });
                continue;
            };
            self.secure
                .registry_mut()
                .remove_file_from_all_collections(&rel);
            if entry.guard {
                let pending = PendingApply {
                    abs: self.secure.abs_path(&rel),
                    rel: rel.clone(),
                    guard: false,
                    original_mode: parse_file_mode(&entry.mode)?,
                    original_owner: entry.owner,
                    original_group: entry.group,
                };
                if !self.restore_one(&pending, &mut notes) {
                    continue;
                }
            }
            self.secure.registry_mut().unregister_file(&rel, true)?;
            info!("unregistered '{}'", rel);
        }
        Ok(())
    }

    pub fn toggle_files(&mut self, paths: &[String]) -> Result<()> {
        let rels = self.validate_batch(paths);
        let breadcrumb = rels.first().map(|r| (r.to_string(), ToggleKind::File));
        self.set_rel_files_guard(&rels, GuardTarget::Toggle, None, breadcrumb)
    }

    pub fn enable_files(&mut self, paths: &[String]) -> Result<()> {
        let rels = self.validate_batch(paths);
        for rel in &rels {
            if self
                .secure
                .registry()
                .file(rel)
                .map(|f| f.guard)
                .unwrap_or(false)
            {
                self.warn(Warning::FileAlreadyGuarded {
                    path: rel.to_string(),
                });
            }
        }
        let breadcrumb = rels.first().map(|r| (r.to_string(), ToggleKind::File));
        self.set_rel_files_guard(&rels, GuardTarget::Set(true), None, breadcrumb)
    }

    pub fn disable_files(&mut self, paths: &[String]) -> Result<()> {
        let rels = self.validate_batch(paths);
        let breadcrumb = rels.first().map(|r| (r.to_string(), ToggleKind::File));
        self.set_rel_files_guard(&rels, GuardTarget::Set(false), None, breadcrumb)
    }

    /// Structured view of registered files; with no arguments, all of them.
    pub fn show_files(&mut self, paths: &[String]) -> Result<Vec<FileView>> {
        if paths.is_empty() {
            let registry = self.secure.registry();
            return Ok(registry
                .files()
                .iter()
                .map(|entry| FileView {
                    path: entry.path.to_string(),
                    guard: entry.guard,
                    collections: registry
                        .collections_containing(&entry.path)
                        .into_iter()
                        .map(str::to_owned)
                        .collect(),
                })
                .collect());
        }
        let rels = self.validate_batch(paths);
        let mut views = vec![];
        for rel in rels {
            let view = {
                let registry = self.secure.registry();
                registry.file(&rel).map(|entry| FileView {
                    path: entry.path.to_string(),
                    guard: entry.guard,
                    collections: registry
                        .collections_containing(&entry.path)
                        .into_iter()
                        .map(str::to_owned)
                        .collect(),
                })
            };
            match view {
                Some(view) => views.push(view),
                None => self.warn(Warning::FileNotInRegistry {
                    path: rel.to_string(),
                }),
            }
        }
        Ok(views)
    }

    /// The three-phase guard protocol.
    ///
    /// Phase 1 mutates the registry in memory only. Phase 2 persists it:
    /// saving *before* touching immutability means a crash in phase 3
    /// leaves a consistent record that later runs can reconcile, instead of
    /// an immutable file the registry still claims is unguarded. Phase 3
    /// applies to the filesystem, accumulating per-item errors without
    /// aborting the batch.
    pub(crate) fn set_rel_files_guard(
        &mut self,
        rels: &[RelPath],
        target: GuardTarget,
        apply_config: Option<Config>,
        breadcrumb: Option<(String, ToggleKind)>,
    ) -> Result<()> {
        let abs_paths: Vec<PathBuf> = rels.iter().map(|r| self.secure.abs_path(r)).collect();
        let (existing, missing) = self.platform.check_files_exist(&abs_paths);
        for abs in &missing {
            let path = self.secure.display_path(abs);
            self.warn(Warning::FileMissing { path });
        }
        let existing: HashSet<PathBuf> = existing.into_iter().collect();

        let mut pending: Vec<PendingApply> = vec![];
        for (rel, abs) in rels.iter().zip(abs_paths) {
            if !existing.contains(&abs) {
                continue;
            }
            if !self.secure.registry().is_registered_file(rel) {
                if target == GuardTarget::Set(false) {
                    self.warn(Warning::FileNotInRegistry {
                        path: rel.to_string(),
                    });
                    continue;
                }
                match self.platform.file_info(&abs) {
                    Ok(file_info) => {
                        self.secure.registry_mut().register_file(
                            rel.clone(),
                            format_mode(file_info.mode),
                            file_info.owner,
                            file_info.group,
                        )?;
                        debug!("auto-registered '{}'", rel);
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
            let Some(entry) = self.secure.registry().file(rel).cloned() else {
                continue;
            };
            let new_guard = match target {
                GuardTarget::Toggle => !entry.guard,
                GuardTarget::Set(state) => state,
            };
            self.secure.registry_mut().set_file_guard(rel, new_guard)?;
            // disabling an already-unguarded file is a registry-only no-op
            if !new_guard && !entry.guard {
                continue;
            }
            pending.push(PendingApply {
                abs,
                rel: rel.clone(),
                guard: new_guard,
                original_mode: parse_file_mode(&entry.mode)?,
                original_owner: entry.owner,
                original_group: entry.group,
            });
        }
        if let Some((name, kind)) = breadcrumb {
            self.secure.registry_mut().set_last_toggle(name, kind);
        }

        self.save_registry()?;

        let config = apply_config.unwrap_or_else(|| self.secure.registry().config.clone());
        let guard_mode = parse_guard_mode(&config.guard_mode)?;
        let mut notes = SkipNotes::default();
        for item in pending {
            if item.guard {
                self.guard_one(&item, &config, guard_mode, &mut notes);
            } else {
                self.restore_one(&item, &mut notes);
            }
        }
        Ok(())
    }

    /// Guard on: permissions first, immutability last.
    fn guard_one(
        &mut self,
        item: &PendingApply,
        config: &Config,
        guard_mode: u32,
        notes: &mut SkipNotes,
    ) -> bool {
        match self.platform.apply_permissions(
            &item.abs,
            guard_mode,
            &config.guard_owner,
            &config.guard_group,
        ) {
            Ok(outcome) => {
                if outcome.ownership_skipped {
                    self.note_ownership_skip(notes);
                }
            }
            Err(err) => {
                self.record_error(format!("failed to guard '{}': {}", item.rel, err));
                return false;
            }
        }
        match self.platform.set_immutable(&item.abs) {
            Ok(outcome) => {
                if outcome.skipped {
                    self.note_immutable_skip(notes);
                }
                info!("guard enabled for '{}'", item.rel);
                true
            }
            Err(err) => {
                self.record_error(format!(
                    "failed to set immutable flag on '{}': {}",
                    item.rel, err
                ));
                false
            }
        }
    }

    /// Guard off: immutability must go first, ownership last since it is the
    /// step that most commonly fails without root.
    fn restore_one(&mut self, item: &PendingApply, notes: &mut SkipNotes) -> bool {
        match self.platform.clear_immutable(&item.abs) {
            Ok(outcome) => {
                if outcome.skipped {
                    self.note_immutable_skip(notes);
                }
            }
            Err(err) => {
                self.record_error(format!(
                    "failed to clear immutable flag on '{}': {}",
                    item.rel, err
                ));
                return false;
            }
        }
        match self.platform.restore_permissions(
            &item.abs,
            item.original_mode,
            &item.original_owner,
            &item.original_group,
        ) {
            Ok(outcome) => {
                if outcome.ownership_skipped {
                    self.note_ownership_skip(notes);
                }
                info!("guard disabled for '{}'", item.rel);
                true
            }
            Err(err) => {
                self.record_error(format!(
                    "failed to restore permissions of '{}': {}",
                    item.rel, err
                ));
                false
            }
        }
    }

    fn note_ownership_skip(&mut self, notes: &mut SkipNotes) {
        if !notes.ownership_noted {
            notes.ownership_noted = true;
            self.warn(Warning::Generic {
                message: "ownership changes skipped (root privileges required)".to_owned(),
            });
        }
    }

    fn note_immutable_skip(&mut self, notes: &mut SkipNotes) {
        if !notes.immutable_noted {
            notes.immutable_noted = true;
            self.warn(Warning::Generic {
                message: "immutable flag changes skipped (root privileges required)".to_owned(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{abs, arg, seed_file, setup, setup_with_root};
    use super::super::warning;
    use super::*;

    #[test]
    fn test_protect_unprotect_cycle() {
        let (root, mut engine, probe) = setup();
        let foo = seed_file(&root, &probe, "foo.txt", 0o644);

        engine.add_files(&[foo.clone()]).unwrap();
        engine.enable_files(&[foo.clone()]).unwrap();

        // chmod applied, ownership skipped without root
        assert_eq!(0o640, probe.mem_file(&abs(&root, "foo.txt")).mode);
        assert_eq!("alice", probe.mem_file(&abs(&root, "foo.txt")).owner);
        assert_eq!(1, ownership_skips(&engine));

        engine.disable_files(&[foo]).unwrap();
        assert_eq!(0o644, probe.mem_file(&abs(&root, "foo.txt")).mode);
        // one skip per batch: the enable batch and the restore batch
        assert_eq!(2, ownership_skips(&engine));
        assert!(engine.errors().is_empty());
    }

    fn ownership_skips(engine: &crate::engine::Engine) -> usize {
        engine
            .warnings()
            .iter()
            .filter(|w| matches!(w, Warning::Generic { message } if message.contains("ownership")))
            .count()
    }

    #[test]
    fn test_batch_emits_single_ownership_skip() {
        let (root, mut engine, probe) = setup();
        let a = seed_file(&root, &probe, "a.txt", 0o644);
        let b = seed_file(&root, &probe, "b.txt", 0o644);

        engine.enable_files(&[a, b]).unwrap();

        // two files, one warning
        assert_eq!(1, ownership_skips(&engine));
        assert_eq!(0o640, probe.mem_file(&abs(&root, "a.txt")).mode);
        assert_eq!(0o640, probe.mem_file(&abs(&root, "b.txt")).mode);
    }

    #[test]
    fn test_enable_disable_restores_metadata_as_root() {
        let (root, mut engine, probe) = setup_with_root(true);
        let foo = seed_file(&root, &probe, "foo.txt", 0o644);

        engine.add_files(&[foo.clone()]).unwrap();
        engine.enable_files(&[foo.clone()]).unwrap();

        let guarded = probe.mem_file(&abs(&root, "foo.txt"));
        assert_eq!(0o640, guarded.mode);
        assert!(guarded.immutable);

        engine.disable_files(&[foo]).unwrap();
        let restored = probe.mem_file(&abs(&root, "foo.txt"));
        assert_eq!(0o644, restored.mode);
        assert_eq!("alice", restored.owner);
        assert_eq!("staff", restored.group);
        assert!(!restored.immutable);
    }

    #[test]
    fn test_add_is_idempotent() {
        let (root, mut engine, probe) = setup();
        let a = seed_file(&root, &probe, "a.txt", 0o644);

        engine.add_files(&[a.clone()]).unwrap();
        engine.add_files(&[a.clone()]).unwrap();
        engine.add_files(&[a]).unwrap();

        assert_eq!(1, engine.secure().registry().files().len());
        assert!(engine.errors().is_empty());
        assert!(warning::render(engine.warnings()).is_empty());
    }

    #[test]
    fn test_add_missing_warns_and_continues() {
        let (root, mut engine, probe) = setup();
        let a = seed_file(&root, &probe, "a.txt", 0o644);
        let ghost = arg(&root, "ghost.txt");

        engine.add_files(&[ghost, a]).unwrap();

        assert_eq!(1, engine.secure().registry().files().len());
        assert!(engine
            .warnings()
            .iter()
            .any(|w| matches!(w, Warning::FileMissing { path } if path == "ghost.txt")));
    }

    #[test]
    fn test_toggle_is_an_involution() {
        let (root, mut engine, probe) = setup();
        let a = seed_file(&root, &probe, "a.txt", 0o600);

        engine.toggle_files(&[a.clone()]).unwrap();
        assert!(engine.secure().registry().file(&"a.txt".into()).unwrap().guard);
        assert_eq!(0o640, probe.mem_file(&abs(&root, "a.txt")).mode);

        engine.toggle_files(&[a]).unwrap();
        let entry = engine.secure().registry().file(&"a.txt".into()).unwrap();
        assert!(!entry.guard);
        // original metadata captured at first toggle, restored at second
        assert_eq!("0600", entry.mode);
        assert_eq!(0o600, probe.mem_file(&abs(&root, "a.txt")).mode);
    }

    #[test]
    fn test_toggle_auto_registers_with_original_metadata() {
        let (root, mut engine, probe) = setup();
        let a = seed_file(&root, &probe, "a.txt", 0o755);

        engine.toggle_files(&[a]).unwrap();

        let entry = engine.secure().registry().file(&"a.txt".into()).unwrap();
        assert_eq!("0755", entry.mode);
        assert_eq!("alice", entry.owner);
        assert_eq!("staff", entry.group);
        assert!(entry.guard);
    }

    #[test]
    fn test_disable_unknown_warns_instead_of_registering() {
        let (root, mut engine, probe) = setup();
        let a = seed_file(&root, &probe, "a.txt", 0o644);

        engine.disable_files(&[a]).unwrap();

        assert!(engine.secure().registry().files().is_empty());
        assert!(engine
            .warnings()
            .iter()
            .any(|w| matches!(w, Warning::FileNotInRegistry { path } if path == "a.txt")));
    }

    #[test]
    fn test_disable_twice_is_idempotent() {
        let (root, mut engine, probe) = setup();
        let a = seed_file(&root, &probe, "a.txt", 0o644);
        engine.add_files(&[a.clone()]).unwrap();

        engine.disable_files(&[a.clone()]).unwrap();
        engine.disable_files(&[a]).unwrap();

        assert_eq!(0o644, probe.mem_file(&abs(&root, "a.txt")).mode);
        assert!(engine.errors().is_empty());
    }

    #[test]
    fn test_enable_already_guarded_warns() {
        let (root, mut engine, probe) = setup();
        let a = seed_file(&root, &probe, "a.txt", 0o644);
        engine.enable_files(&[a.clone()]).unwrap();
        engine.enable_files(&[a]).unwrap();
        assert!(engine
            .warnings()
            .iter()
            .any(|w| matches!(w, Warning::FileAlreadyGuarded { path } if path == "a.txt")));
    }

    #[test]
    fn test_remove_restores_and_detaches() {
        let (root, mut engine, probe) = setup_with_root(true);
        let a = seed_file(&root, &probe, "a.txt", 0o644);
        engine.add_files(&[a.clone()]).unwrap();
        engine
            .add_files_to_collections(&[a.clone()], &["docs".into()])
            .unwrap();
        engine.enable_files(&[a.clone()]).unwrap();

        engine.remove_files(&[a]).unwrap();

        assert!(engine.secure().registry().files().is_empty());
        assert!(engine
            .secure()
            .registry()
            .collection("docs")
            .unwrap()
            .files
            .is_empty());
        let restored = probe.mem_file(&abs(&root, "a.txt"));
        assert_eq!(0o644, restored.mode);
        assert!(!restored.immutable);
    }

    #[test]
    fn test_remove_unknown_warns() {
        let (root, mut engine, _probe) = setup();
        engine.remove_files(&[arg(&root, "nope.txt")]).unwrap();
        assert!(engine
            .warnings()
            .iter()
            .any(|w| matches!(w, Warning::FileNotInRegistry { .. })));
    }

    #[test]
    fn test_symlink_argument_is_rejected() {
        use std::os::unix::fs::symlink;
        let (root, mut engine, _probe) = setup();
        std::fs::write(root.path().join("foo.txt"), "x").unwrap();
        symlink(root.path().join("foo.txt"), root.path().join("bar.txt")).unwrap();

        engine.add_files(&[arg(&root, "bar.txt")]).unwrap();

        assert!(engine.secure().registry().files().is_empty());
        assert!(engine.errors().iter().any(|e| e.contains("symbolic link")));
    }

    #[test]
    fn test_show_files_lists_collections() {
        let (root, mut engine, probe) = setup();
        let a = seed_file(&root, &probe, "a.txt", 0o644);
        engine
            .add_files_to_collections(&[a.clone()], &["docs".into()])
            .unwrap();

        let views = engine.show_files(&[]).unwrap();
        assert_eq!(
            vec![FileView {
                path: "a.txt".to_owned(),
                guard: false,
                collections: vec!["docs".to_owned()],
            }],
            views
        );
    }
}
