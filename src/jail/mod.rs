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

//! Isolated package builds.
//!
//! A [`Jail`] builds one target package and the AUR dependencies it needs.
//! Each single-package build walks the same sequence:
//!
//! ```text
//! prepare workdir -> fetch source -> verify integrity -> user confirm
//!                 -> build -> collect artifacts -> cleanup
//! ```
//!
//! Integrity is verified on the host, before entering the jail, because the
//! jails cannot always reach signing keys. The workdir is removed on every
//! path, including errors and a user quit.

pub mod chroot;
pub mod docker;
mod workdir;

pub use chroot::ChrootJail;
pub use docker::DockerJail;
pub use workdir::WorkDir;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::aur::{resolve_chain, Catalog, Package};
use crate::config::JailConfig;
use crate::error::AurJailError;
use crate::exec::{Cmd, Shell};
use crate::pacman::{PackageManager, Pacman};
use crate::ui;

/// Available isolation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JailKind {
    #[default]
    Docker,
    Chroot,
}

impl JailKind {
    pub fn backend(self, config: &JailConfig) -> Box<dyn BuildBackend> {
        match self {
            JailKind::Docker => Box::new(DockerJail::from_config(config)),
            JailKind::Chroot => Box::new(ChrootJail::from_config(config)),
        }
    }
}

impl fmt::Display for JailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JailKind::Docker => write!(f, "docker"),
            JailKind::Chroot => write!(f, "chroot"),
        }
    }
}

impl FromStr for JailKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(JailKind::Docker),
            "chroot" => Ok(JailKind::Chroot),
            other => Err(format!("unknown jail '{}', expected docker or chroot", other)),
        }
    }
}

/// Steps of a single-package build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PrepareWorkdir,
    FetchSource,
    VerifyIntegrity,
    UserConfirm,
    Build,
    CollectArtifacts,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PrepareWorkdir => "prepare_workdir",
            Stage::FetchSource => "fetch_source",
            Stage::VerifyIntegrity => "verify_integrity",
            Stage::UserConfirm => "user_confirm",
            Stage::Build => "build",
            Stage::CollectArtifacts => "collect_artifacts",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// What a backend gets to build one recipe
pub struct BuildContext<'b> {
    pub package: &'b Package,
    /// Checkout of the recipe, artifacts must end up here
    pub workdir: &'b Path,
    /// Artifacts of dependencies built earlier in this session
    pub dependencies: &'b [PathBuf],
}

/// An isolation technique able to run `makepkg` on an untrusted recipe
pub trait BuildBackend {
    fn kind(&self) -> JailKind;

    /// Binary that must be in `PATH`, and the package providing it
    fn required_tool(&self) -> (&'static str, &'static str);

    /// Session setup, run once before anything is built
    fn prepare(&self, shell: &Shell<'_>) -> Result<()>;

    fn build(&self, shell: &Shell<'_>, ctx: &BuildContext<'_>) -> Result<()>;

    /// Lines describing what `prepare` and `build` would do
    fn plan(&self, shell: &Shell<'_>, ctx: &BuildContext<'_>) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JailOptions {
    /// Rebuild even when artifacts are already known
    pub force: bool,
    /// Print privileged and build commands instead of running them
    pub dry_run: bool,
}

/// Everything a jail borrows from the running command
pub struct JailEnv<'a> {
    pub shell: Shell<'a>,
    pub catalog: &'a Catalog<'a>,
    pub pm: &'a dyn PackageManager,
    /// Base URL of the recipe git repositories
    pub git_url: String,
    pub workdir_prefix: String,
    /// Host package cache
    pub package_cache: PathBuf,
    /// Where built artifacts are moved to
    pub origin: PathBuf,
    pub options: JailOptions,
}

/// Build session for one target package and its AUR dependencies
pub struct Jail<'a> {
    env: &'a JailEnv<'a>,
    backend: &'a dyn BuildBackend,
    target: Package,
    built: Vec<PathBuf>,
}

impl<'a> Jail<'a> {
    pub fn new(env: &'a JailEnv<'a>, backend: &'a dyn BuildBackend, target: Package) -> Self {
        Self {
            env,
            backend,
            target,
            built: Vec::new(),
        }
    }

    pub fn target(&self) -> &Package {
        &self.target
    }

    /// Build the target, its AUR dependencies first.
    ///
    /// Returns every artifact produced in this session, or the target's
    /// known artifacts when it is already built. An empty list means nothing
    /// usable came out: missing jail tool, declined or failed build.
    pub fn build(&mut self) -> Result<Vec<PathBuf>> {
        let (binary, provider) = self.backend.required_tool();
        if !self.env.shell.runner.has_program(binary) {
            let err = AurJailError::MissingTool {
                binary: binary.to_string(),
                provider: provider.to_string(),
                jail: self.backend.kind().to_string(),
            };
            tracing::error!("{}", err);
            ui::error(&err.to_string());
            return Ok(Vec::new());
        }

        if self.env.options.dry_run {
            tracing::info!(jail = %self.backend.kind(), "dry run, jail setup skipped");
        } else if let Err(e) = self.backend.prepare(&self.env.shell) {
            return recover(self.setup_error(e));
        }

        if !self.target.built().is_empty() && !self.env.options.force {
            ui::result(&format!("{} is already built", self.target.name()));
            return Ok(self.target.built().to_vec());
        }

        if !self.build_dependencies()? {
            return Ok(Vec::new());
        }

        let target = self.target.clone();
        let artifacts = self.build_package(&target)?;
        if artifacts.is_empty() {
            return Ok(Vec::new());
        }
        self.target.set_built(artifacts);
        Ok(self.built.clone())
    }

    /// Install dependencies as such, then the target, then keep the
    /// tarballs in the host cache
    pub fn install(&self) -> Result<()> {
        let main = self.target.built().to_vec();
        if main.is_empty() {
            return Ok(());
        }
        let dependencies: Vec<PathBuf> = self
            .built
            .iter()
            .filter(|p| !main.contains(p))
            .cloned()
            .collect();
        let relocated: Vec<PathBuf> = dependencies
            .iter()
            .chain(&main)
            .filter(|p| !p.starts_with(&self.env.package_cache))
            .cloned()
            .collect();

        let mut steps = Vec::new();
        if !dependencies.is_empty() {
            steps.push(Pacman::install_command(&dependencies, true));
        }
        steps.push(Pacman::install_command(&main, false));
        if !relocated.is_empty() {
            steps.push(
                Cmd::new("cp")
                    .args(relocated.iter().map(|p| p.to_string_lossy().into_owned()))
                    .arg(self.env.package_cache.to_string_lossy().into_owned()),
            );
        }

        if self.env.options.dry_run {
            let sudo = if self.env.shell.runner.is_root() { "" } else { "sudo " };
            for step in &steps {
                dry_run_line(&format!("{}{}", sudo, step));
            }
            if !relocated.is_empty() {
                dry_run_line(&format!("rm {}", join_paths(&relocated)));
            }
            return Ok(());
        }

        for step in steps {
            let cmd = self.env.shell.elevate(step)?;
            self.env.shell.run_checked(&cmd, None)?;
        }
        for path in &relocated {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }

        tracing::info!(package = self.target.name(), "installed");
        ui::result(&format!("{} installed", self.target.name()));
        Ok(())
    }

    /// `false` when the target must not be built: declined or failed chain
    fn build_dependencies(&mut self) -> Result<bool> {
        let spinner = spinner(&format!("Resolving dependencies of {}", self.target.name()));
        let chain = resolve_chain(&self.target, self.env.catalog, self.env.pm);
        spinner.finish_and_clear();
        let chain = chain?;
        if chain.is_empty() {
            return Ok(true);
        }

        let names: Vec<&str> = chain.iter().map(Package::name).collect();
        ui::log(&format!("{} needs these AUR dependencies:", self.target.name()));
        ui::result(&names.join("  "));
        let answer = self
            .env
            .shell
            .prompter
            .confirm("Do you want to build them?", "[y/N/q]")?;
        if !answer.accepted()? {
            ui::result(&format!("{} will not be built", self.target.name()));
            return Ok(false);
        }

        let mut bases: HashSet<String> = HashSet::new();
        for dependency in &chain {
            if !dependency.built().is_empty() && !self.env.options.force {
                ui::result(&format!("{} is already built", dependency.name()));
                for artifact in dependency.built() {
                    self.record(artifact.clone());
                }
                continue;
            }
            if bases.contains(dependency.base()) {
                tracing::debug!(
                    package = dependency.name(),
                    base = dependency.base(),
                    "already produced by its recipe base"
                );
                continue;
            }

            if self.build_package(dependency)?.is_empty() {
                ui::error(&format!(
                    "{} could not be built, {} will not be built either",
                    dependency.name(),
                    self.target.name()
                ));
                return Ok(false);
            }
            bases.insert(dependency.base().to_string());
        }
        Ok(true)
    }

    /// One pass of the build sequence in a fresh workdir
    fn build_package(&mut self, package: &Package) -> Result<Vec<PathBuf>> {
        let span = crate::span_build!(package.name());
        let _enter = span.enter();

        tracing::debug!(stage = %Stage::PrepareWorkdir);
        let workdir = WorkDir::create(&self.env.workdir_prefix)?;
        let outcome = self.run_stages(package, workdir.path());

        tracing::debug!(stage = %Stage::Cleanup);
        if let Err(e) = workdir.close() {
            tracing::warn!("{:#}", e);
            ui::warning(&format!("{:#}", e));
        }

        match outcome {
            Ok(artifacts) => {
                for artifact in &artifacts {
                    self.record(artifact.clone());
                }
                Ok(artifacts)
            }
            Err(e) => recover(e),
        }
    }

    fn run_stages(&self, package: &Package, workdir: &Path) -> Result<Vec<PathBuf>> {
        let shell = &self.env.shell;

        tracing::debug!(stage = %Stage::FetchSource);
        let url = format!(
            "{}/{}.git",
            self.env.git_url.trim_end_matches('/'),
            package.base()
        );
        let clone = Cmd::new("git").args([
            "clone".to_string(),
            url,
            workdir.to_string_lossy().into_owned(),
        ]);
        if !succeeded(shell.runner.run(&clone, None)) {
            return Err(AurJailError::CloneFailed {
                package: package.name().to_string(),
            }
            .into());
        }
        if !workdir.join("PKGBUILD").is_file() {
            return Err(AurJailError::RecipeMissing {
                package: package.name().to_string(),
            }
            .into());
        }
        ui::log(&format!(
            "{} is ready to be built in {}",
            style(package.name()).yellow().bold(),
            workdir.display()
        ));

        tracing::debug!(stage = %Stage::VerifyIntegrity);
        let verify = Cmd::new("makepkg").arg("--verifysource");
        if !succeeded(shell.runner.run(&verify, Some(workdir))) {
            return Err(AurJailError::Integrity {
                package: package.name().to_string(),
            }
            .into());
        }

        tracing::debug!(stage = %Stage::UserConfirm);
        ui::log("Please review the PKGBUILD and every file it uses before going further");
        let answer = shell.prompter.confirm(
            &format!("Do you want to build {} in the {} jail?", package.name(), self.backend.kind()),
            "[y/N/q]",
        )?;
        if !answer.accepted()? {
            ui::result(&format!("{} skipped", package.name()));
            return Ok(Vec::new());
        }

        tracing::debug!(stage = %Stage::Build);
        let dependencies = self.built.clone();
        let ctx = BuildContext {
            package,
            workdir,
            dependencies: &dependencies,
        };
        if self.env.options.dry_run {
            for line in self.backend.plan(shell, &ctx)? {
                dry_run_line(&line);
            }
            return self.collect(package, workdir, false);
        }
        self.backend
            .build(shell, &ctx)
            .map_err(|e| classify(e, |message| AurJailError::BuildFailed {
                package: package.name().to_string(),
                message,
            }))?;

        tracing::debug!(stage = %Stage::CollectArtifacts);
        self.collect(package, workdir, true)
    }

    /// Artifacts announced by `makepkg --packagelist` for this machine,
    /// moved to the origin directory when `relocate` is set
    fn collect(&self, package: &Package, workdir: &Path, relocate: bool) -> Result<Vec<PathBuf>> {
        let listed = self
            .env
            .shell
            .runner
            .capture(&Cmd::new("makepkg").arg("--packagelist"), Some(workdir))?;

        let mut artifacts = Vec::new();
        for line in listed.lines() {
            let listed_path = PathBuf::from(&line);
            let Some(file) = listed_path.file_name().map(|f| f.to_string_lossy().into_owned())
            else {
                continue;
            };
            if !matches_arch(&file, package.arch()) {
                continue;
            }

            let destination = self.env.origin.join(&file);
            if relocate {
                let Some(produced) = [workdir.join(&file), listed_path]
                    .into_iter()
                    .find(|p| p.is_file())
                else {
                    tracing::debug!(%file, "listed but not produced");
                    continue;
                };
                move_file(&produced, &destination)?;
                ui::result(&format!("{} -> {}", file, destination.display()));
            }
            artifacts.push(destination);
        }

        if artifacts.is_empty() {
            return Err(AurJailError::NoArtifacts {
                package: package.name().to_string(),
            }
            .into());
        }
        tracing::info!(package = package.name(), count = artifacts.len(), "artifacts collected");
        Ok(artifacts)
    }

    fn setup_error(&self, err: anyhow::Error) -> anyhow::Error {
        classify(err, |message| AurJailError::JailSetup {
            jail: self.backend.kind().to_string(),
            message,
        })
    }

    fn record(&mut self, artifact: PathBuf) {
        if !self.built.contains(&artifact) {
            self.built.push(artifact);
        }
    }
}

/// Turn a build abort into an empty contribution, pass anything else on
fn recover(err: anyhow::Error) -> Result<Vec<PathBuf>> {
    let aborted = err
        .downcast_ref::<AurJailError>()
        .map(AurJailError::is_build_abort)
        .unwrap_or(false);
    if aborted {
        tracing::warn!("{}", err);
        ui::error(&err.to_string());
        Ok(Vec::new())
    } else {
        Err(err)
    }
}

/// Keep typed errors as they are, wrap anything else with `wrap`
fn classify(err: anyhow::Error, wrap: impl FnOnce(String) -> AurJailError) -> anyhow::Error {
    if err.downcast_ref::<AurJailError>().is_some() {
        err
    } else {
        wrap(format!("{:#}", err)).into()
    }
}

/// A command that could not even be spawned counts as a failed one
fn succeeded(outcome: Result<bool>) -> bool {
    outcome.unwrap_or_else(|e| {
        tracing::warn!("{:#}", e);
        false
    })
}

/// Tarball built for `arch` or for any architecture
pub fn matches_arch(file: &str, arch: &str) -> bool {
    let stem = file.find(".pkg.tar").map_or(file, |i| &file[..i]);
    stem.ends_with("-any") || stem.ends_with(&format!("-{}", arch))
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Different filesystems
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    fs::remove_file(from).with_context(|| format!("Failed to remove {}", from.display()))?;
    Ok(())
}

fn dry_run_line(line: &str) {
    println!("{} {}", style("[dry-run]").dim(), line);
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
