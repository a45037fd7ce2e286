/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod collections;
pub mod files;
pub mod folders;
pub mod maintenance;
pub mod resolve;
pub mod warning;

#[cfg(test)]
pub(crate) mod testutil;

use std::fmt::Display;
use std::path::Path;

use log::{debug, info};
use thiserror::Error;

use crate::config::{format_mode, parse_guard_mode, Config, ModeError};
use crate::guardfile::GuardfileError;
use crate::path::RelPath;
use crate::platform::{Platform, PlatformError};
use crate::registry::RegistryError;
use crate::secure::{SecureRegistry, SecurityError};
use self::warning::Warning;

type Result<T> = std::result::Result<T, EngineError>;

/// Names the collection namespace keeps for the command grammar.
pub const RESERVED_NAMES: &[&str] = &[
    "to",
    "from",
    "add",
    "remove",
    "file",
    "collection",
    "create",
    "destroy",
    "clear",
    "update",
    "uninstall",
];

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("'{0}' does not match any file, folder or collection")]
    NotFound(String),
    #[error("'{0}' is a reserved keyword and cannot be used as a collection name")]
    ReservedName(String),
    #[error("{0}")]
    CollectionConflict(collections::ConflictReport),
    #[error("files do not exist: {}", .0.join(", "))]
    MissingFiles(Vec<String>),
    #[error("destroy verification failed, guardfile kept:\n{0}")]
    DestroyVerificationFailed(String),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error(transparent)]
    Guardfile(#[from] GuardfileError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// The orchestration engine: business logic over a [`SecureRegistry`] and a
/// [`Platform`], accumulating warnings and per-item errors for the duration
/// of one command.
pub struct Engine {
    secure: SecureRegistry,
    platform: Box<dyn Platform>,
    warnings: Vec<Warning>,
    errors: Vec<String>,
}

impl Engine {
    /// Load an initialized project.
    pub fn open(root: &Path, platform: Box<dyn Platform>) -> Result<Self> {
        let secure = SecureRegistry::load(root)?;
        Ok(Engine {
            secure,
            platform,
            warnings: vec![],
            errors: vec![],
        })
    }

    /// Create the control file and return an engine over the fresh state.
    pub fn init(
        root: &Path,
        platform: Box<dyn Platform>,
        mode: &str,
        owner: &str,
        group: &str,
        overwrite: bool,
    ) -> Result<Self> {
        let mode = parse_guard_mode(mode)?;
        let config = Config {
            guard_mode: format_mode(mode),
            guard_owner: owner.to_owned(),
            guard_group: group.to_owned(),
        };
        let secure = SecureRegistry::create(root, config, overwrite)?;
        info!("initialized project at '{}'", secure.root().display());
        Ok(Engine {
            secure,
            platform,
            warnings: vec![],
            errors: vec![],
        })
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn config(&self) -> &Config {
        &self.secure.registry().config
    }

    pub fn secure(&self) -> &SecureRegistry {
        &self.secure
    }

    pub(crate) fn warn(&mut self, warning: Warning) {
        debug!("warning recorded: {:?}", warning);
        self.warnings.push(warning);
    }

    pub(crate) fn record_error(&mut self, message: impl Display) {
        let message = message.to_string();
        debug!("error recorded: {}", message);
        self.errors.push(message);
    }

    /// Persist the registry, clearing the immutable flag on the control file
    /// first when a previous run left it guarded.
    pub(crate) fn save_registry(&mut self) -> Result<()> {
        let guardfile = self.secure.guardfile_path();
        if self.platform.is_immutable(&guardfile).unwrap_or(false) {
            debug!("guardfile carries the immutable flag, clearing before save");
            self.platform.clear_immutable(&guardfile)?;
        }
        self.secure.save()?;
        Ok(())
    }

    /// Validate a batch of raw paths, deduplicated in input order.
    /// Validation failures are per-item: recorded and skipped.
    pub(crate) fn validate_batch(&mut self, paths: &[String]) -> Vec<RelPath> {
        let mut rels: Vec<RelPath> = vec![];
        for raw in paths {
            match self.secure.validate_path(Path::new(raw)) {
                Ok(rel) => {
                    if !rels.contains(&rel) {
                        rels.push(rel);
                    }
                }
                Err(err) => self.record_error(err),
            }
        }
        rels
    }

    fn warn_if_guards_active(&mut self) {
        if self.secure.registry().any_guard_active() {
            self.warn(Warning::Generic {
                message: "config change applies to future guard operations only; \
                          existing guards keep the config they were applied with"
                    .to_owned(),
            });
        }
    }

    pub fn set_guard_mode(&mut self, mode: &str) -> Result<()> {
        let parsed = parse_guard_mode(mode)?;
        self.warn_if_guards_active();
        self.secure.registry_mut().config.guard_mode = format_mode(parsed);
        self.save_registry()
    }

    pub fn set_guard_owner(&mut self, owner: &str) -> Result<()> {
        self.warn_if_guards_active();
        self.secure.registry_mut().config.guard_owner = owner.to_owned();
        self.save_registry()
    }

    pub fn set_guard_group(&mut self, group: &str) -> Result<()> {
        self.warn_if_guards_active();
        self.secure.registry_mut().config.guard_group = group.to_owned();
        self.save_registry()
    }
}
