/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Project root containing the control file
    #[arg(long, default_value_t = String::from("."))]
    pub project_root: String,

    #[clap(subcommand)]
    pub mode: Mode,
}

#[derive(Debug, PartialEq, Clone, Subcommand)]
#[clap(rename_all = "kebab_case")]
pub enum Mode {
    /// Create the control file in the project root
    Init {
        /// Permission mode applied to guarded files (octal)
        #[arg(short, long, default_value_t = String::from("0400"))]
        mode: String,
        /// Owner applied to guarded files (empty keeps the owner)
        #[arg(short, long, default_value_t = String::new())]
        owner: String,
        /// Group applied to guarded files (empty keeps the group)
        #[arg(short, long, default_value_t = String::new())]
        group: String,
        /// Overwrite an existing control file
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Register files without changing their guard state
    Add {
        /// Files to register
        paths: Vec<String>,
    },
    /// Restore original metadata and unregister files
    Remove {
        /// Files to unregister
        paths: Vec<String>,
    },
    /// Flip the guard state of files, folders or collections
    Toggle {
        /// Files, folders or collection names
        args: Vec<String>,
        /// Folders cover their whole tree instead of immediate files
        #[arg(short, long, default_value_t = false)]
        recursive: bool,
    },
    /// Enable the guard for files, folders or collections
    On {
        /// Files, folders or collection names
        args: Vec<String>,
        /// Folders cover their whole tree instead of immediate files
        #[arg(short, long, default_value_t = false)]
        recursive: bool,
    },
    /// Disable the guard for files, folders or collections
    Off {
        /// Files, folders or collection names
        args: Vec<String>,
        /// Folders cover their whole tree instead of immediate files
        #[arg(short, long, default_value_t = false)]
        recursive: bool,
    },
    /// List registered files with their guard state
    Show {
        /// Limit output to these files
        args: Vec<String>,
        /// Show collections instead of files
        #[arg(short, long, default_value_t = false)]
        collections: bool,
    },
    /// Manage collections
    Collection {
        #[clap(subcommand)]
        action: CollectionAction,
    },
    /// Drop registry entries whose files are gone, then empty collections
    Cleanup,
    /// Disable every guard, keeping all registrations
    Reset,
    /// Reset, clean up, verify and delete the control file
    Destroy,
    /// Show or change the guard defaults
    Config {
        #[clap(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, PartialEq, Clone, Subcommand)]
#[clap(rename_all = "kebab_case")]
pub enum CollectionAction {
    /// Create empty collections
    Add {
        /// Collection names
        names: Vec<String>,
    },
    /// Restore member files and drop collections
    Remove {
        /// Collection names
        names: Vec<String>,
    },
    /// Disable member guards and empty the member lists
    Clear {
        /// Collection names
        names: Vec<String>,
    },
    /// Add files to collections, creating them as needed
    Assign {
        /// Files to add
        #[arg(long, num_args = 1..)]
        files: Vec<String>,
        /// Target collections
        #[arg(long, num_args = 1..)]
        to: Vec<String>,
    },
    /// Remove files from collections
    Unassign {
        /// Files to remove
        #[arg(long, num_args = 1..)]
        files: Vec<String>,
        /// Collections to remove them from
        #[arg(long, num_args = 1..)]
        from: Vec<String>,
    },
    /// Union source collections' members into targets
    Merge {
        /// Source collections
        #[arg(long, num_args = 1..)]
        sources: Vec<String>,
        /// Target collections
        #[arg(long, num_args = 1..)]
        to: Vec<String>,
    },
    /// Remove source collections' members from targets
    Extract {
        /// Source collections
        #[arg(long, num_args = 1..)]
        sources: Vec<String>,
        /// Collections to remove them from
        #[arg(long, num_args = 1..)]
        from: Vec<String>,
    },
}

#[derive(Debug, PartialEq, Clone, Subcommand)]
#[clap(rename_all = "kebab_case")]
pub enum ConfigAction {
    /// Set the guard mode (octal)
    Mode {
        mode: String,
    },
    /// Set the guard owner (empty keeps owners unchanged)
    Owner {
        owner: String,
    },
    /// Set the guard group (empty keeps groups unchanged)
    Group {
        group: String,
    },
    /// Print the current defaults
    Show,
}
