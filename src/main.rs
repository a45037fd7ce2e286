/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

mod args;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use args::{Args, CollectionAction, ConfigAction, Mode};
use fsguard::engine::warning;
use fsguard::engine::Engine;
use fsguard::guardfile::GUARDFILE_NAME;
use fsguard::platform::{LocalPlatform, Platform};

const LOG_CONFIG_FILE: &str = "log4rs.yml";

fn main() -> ExitCode {
    match run() {
        Err(err) => {
            error!("{:?}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
        Ok(true) => ExitCode::FAILURE,
        Ok(false) => ExitCode::SUCCESS,
    }
}

/// Returns whether per-item errors accumulated during the command.
fn run() -> anyhow::Result<bool> {
    let args = Args::parse();
    init_logging()?;

    let platform: Box<dyn Platform> = Box::new(LocalPlatform::new());
    let root = Path::new(&args.project_root);

    let mut engine = match &args.mode {
        Mode::Init {
            mode,
            owner,
            group,
            force,
        } => {
            Engine::init(root, platform, mode, owner, group, *force)?;
            println!("initialized {GUARDFILE_NAME}");
            return Ok(false);
        }
        _ => Engine::open(root, platform)?,
    };

    let outcome = dispatch(&mut engine, &args.mode);

    for line in warning::render(engine.warnings()) {
        println!("Warning: {line}");
    }
    for err in engine.errors() {
        eprintln!("Error: {err}");
    }
    outcome?;
    Ok(engine.has_errors())
}

fn dispatch(engine: &mut Engine, mode: &Mode) -> anyhow::Result<()> {
    match mode {
        Mode::Init { .. } => unreachable!("handled before load"),
        Mode::Add { paths } => {
            info!("add {} file(s)", paths.len());
            engine.add_files(paths)?;
        }
        Mode::Remove { paths } => {
            info!("remove {} file(s)", paths.len());
            engine.remove_files(paths)?;
        }
        Mode::Toggle { args, recursive } => {
            let resolved = engine.resolve_arguments(args)?;
            engine.toggle_files(&resolved.files)?;
            if *recursive {
                engine.toggle_folders_recursive(&resolved.folders)?;
            } else {
                engine.toggle_folders(&resolved.folders)?;
            }
            engine.toggle_collections(&resolved.collections)?;
        }
        Mode::On { args, recursive } => {
            let resolved = engine.resolve_arguments(args)?;
            engine.enable_files(&resolved.files)?;
            if *recursive {
                engine.enable_folders_recursive(&resolved.folders)?;
            } else {
                engine.enable_folders(&resolved.folders)?;
            }
            engine.enable_collections(&resolved.collections)?;
        }
        Mode::Off { args, recursive } => {
            let resolved = engine.resolve_arguments(args)?;
            engine.disable_files(&resolved.files)?;
            if *recursive {
                engine.disable_folders_recursive(&resolved.folders)?;
            } else {
                engine.disable_folders(&resolved.folders)?;
            }
            engine.disable_collections(&resolved.collections)?;
        }
        Mode::Show { args, collections } => {
            if *collections {
                show_collections(engine, args)?;
            } else {
                show_files(engine, args)?;
            }
        }
        Mode::Collection { action } => dispatch_collection(engine, action)?,
        Mode::Cleanup => {
            let outcome = engine.cleanup()?;
            println!(
                "removed {} file(s) and {} collection(s) from the registry",
                outcome.files_removed.len(),
                outcome.collections_removed.len()
            );
        }
        Mode::Reset => {
            let outcome = engine.reset()?;
            println!(
                "disabled guard for {} file(s) and {} collection(s)",
                outcome.files_disabled, outcome.collections_disabled
            );
        }
        Mode::Destroy => {
            engine.destroy()?;
            println!("{GUARDFILE_NAME} removed");
        }
        Mode::Config { action } => match action {
            ConfigAction::Mode { mode } => engine.set_guard_mode(mode)?,
            ConfigAction::Owner { owner } => engine.set_guard_owner(owner)?,
            ConfigAction::Group { group } => engine.set_guard_group(group)?,
            ConfigAction::Show => {
                let config = engine.config();
                println!("mode:  {}", config.guard_mode);
                println!("owner: {}", config.guard_owner);
                println!("group: {}", config.guard_group);
            }
        },
    }
    Ok(())
}

fn dispatch_collection(engine: &mut Engine, action: &CollectionAction) -> anyhow::Result<()> {
    match action {
        CollectionAction::Add { names } => engine.add_collections(names)?,
        CollectionAction::Remove { names } => engine.remove_collections(names)?,
        CollectionAction::Clear { names } => engine.clear_collections(names)?,
        CollectionAction::Assign { files, to } => engine.add_files_to_collections(files, to)?,
        CollectionAction::Unassign { files, from } => {
            engine.remove_files_from_collections(files, from)?
        }
        CollectionAction::Merge { sources, to } => {
            engine.add_collections_to_collections(sources, to)?
        }
        CollectionAction::Extract { sources, from } => {
            engine.remove_collections_from_collections(sources, from)?
        }
    }
    Ok(())
}

fn show_files(engine: &mut Engine, args: &[String]) -> anyhow::Result<()> {
    let views = engine.show_files(args)?;
    for view in views {
        let marker = if view.guard { "on " } else { "off" };
        if view.collections.is_empty() {
            println!("{marker}  {}", view.path);
        } else {
            println!("{marker}  {}  ({})", view.path, view.collections.join(", "));
        }
    }
    Ok(())
}

fn show_collections(engine: &mut Engine, args: &[String]) -> anyhow::Result<()> {
    let views = engine.show_collections(args)?;
    for view in views {
        let marker = if view.guard { "on " } else { "off" };
        println!("{marker}  {}", view.name);
        for member in view.members {
            let marker = if member.guard { "on " } else { "off" };
            let missing = if member.missing { "  [missing]" } else { "" };
            println!("    {marker}  {}{missing}", member.path);
        }
    }
    Ok(())
}

fn init_logging() -> anyhow::Result<()> {
    if Path::new(LOG_CONFIG_FILE).exists() {
        log4rs::init_file(LOG_CONFIG_FILE, Default::default())
            .with_context(|| "failed to init logger")?;
    } else {
        use log4rs::append::console::{ConsoleAppender, Target};
        use log4rs::config::{Appender, Config, Root};
        use log4rs::encode::pattern::PatternEncoder;

        let stderr = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(Box::new(PatternEncoder::new("{h({l})} {m}{n}")))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stderr", Box::new(stderr)))
            .build(Root::builder().appender("stderr").build(log::LevelFilter::Warn))?;
        log4rs::init_config(config)?;
    }
    Ok(())
}
