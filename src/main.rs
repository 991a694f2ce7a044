/*
 * aurjail - Build AUR packages inside a container or chroot jail.
 * Copyright (C) 2025  aurjail contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod aur;
mod config;
mod error;
mod exec;
mod jail;
mod logging;
mod orchestrator;
mod pacman;
mod ui;

#[cfg(test)]
mod test_utils;

use aur::AurClient;
use config::Config;
use error::AurJailError;
use exec::{Shell, SystemRunner};
use jail::{JailKind, JailOptions};
use orchestrator::Orchestrator;
use pacman::Pacman;
use ui::TerminalPrompter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Copyright (C) 2025  aurjail contributors\n",
    "License GPLv3+: GNU GPL version 3 or later <https://gnu.org/licenses/gpl.html>\n\n",
    "This is free software; you are free to change and redistribute it.\n",
    "There is NO WARRANTY, to the extent permitted by law."
);

#[derive(Parser)]
#[command(name = "aurjail")]
#[command(version = VERSION)]
#[command(long_version = LONG_VERSION)]
#[command(about = "Build AUR packages inside a docker container or a clean chroot.")]
struct Cli {
    #[arg(short, long, value_enum, global = true, help = "Isolation used for builds")]
    jail: Option<JailKind>,
    #[arg(short, long, global = true, help = "Rebuild packages even when already built")]
    force: bool,
    #[arg(short = 'n', long, global = true, help = "Print privileged and build commands instead of running them")]
    dry_run: bool,
    #[arg(long, global = true, help = "Include -git, -svn... packages in search and upgrade")]
    with_devel: bool,
    #[arg(long, global = true, help = "Disable colored output")]
    no_color: bool,
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the AUR
    Search {
        #[arg(required = true, value_name = "TERMS")]
        terms: Vec<String>,
    },
    /// Show AUR package details
    Info {
        #[arg(required = true, value_name = "PACKAGES")]
        packages: Vec<String>,
    },
    /// List installed foreign packages
    List,
    /// Build and install AUR packages
    Install {
        #[arg(required = true, value_name = "PACKAGES")]
        packages: Vec<String>,
    },
    /// Rebuild installed AUR packages having a newer version
    Upgrade,
    /// Remove leftover build containers and images
    Prune,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load();
    if let Some(jail) = cli.jail {
        config.jail = jail;
    }
    config.with_devel |= cli.with_devel;
    if cli.no_color {
        config.color = false;
    }
    match cli.verbose {
        0 => {}
        1 => config.logging.level = "info".to_string(),
        _ => config.logging.level = "debug".to_string(),
    }
    config
        .validate()
        .map_err(|message| AurJailError::Config { message })?;

    logging::init_with_file(&config.logging.level, config.logging.file.as_deref());
    if !config.color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let options = JailOptions {
        force: cli.force,
        dry_run: cli.dry_run,
    };
    match run(cli.command, &config, options) {
        // Workdirs are gone by now, quitting is not a failure
        Err(e) if error::is_user_quit(&e) => {
            tracing::info!("quit requested");
            Ok(())
        }
        other => other,
    }
}

fn run(command: Commands, config: &Config, options: JailOptions) -> Result<()> {
    let runner = SystemRunner;
    let prompter = TerminalPrompter;
    let registry = AurClient::from_config(&config.aur);
    let pm = Pacman::new(&runner);
    let origin = std::env::current_dir().context("Failed to read the current directory")?;

    tracing::debug!(jail = %config.jail, dry_run = options.dry_run, force = options.force, "starting");
    let orchestrator = Orchestrator::new(
        config,
        Shell::new(&runner, &prompter),
        &registry,
        &pm,
        options,
        origin,
    );

    match command {
        Commands::Search { terms } => orchestrator.search(&terms),
        Commands::Info { packages } => orchestrator.info(&packages),
        Commands::List => orchestrator.list(),
        Commands::Install { packages } => orchestrator.install(&packages),
        Commands::Upgrade => orchestrator.upgrade(),
        Commands::Prune => orchestrator.prune(),
    }
}
