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

//! Queries against the host package manager.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::exec::{Cmd, CommandRunner};

/// What the build pipeline needs to know about the host system
pub trait PackageManager {
    /// Whether the sync repositories can provide `name` on their own
    fn in_sync_repos(&self, name: &str) -> bool;

    /// Whether `name` is installed, whatever its origin
    fn is_installed(&self, name: &str) -> bool;

    /// Installed version of `name`, `None` when not installed
    fn installed_version(&self, name: &str) -> Result<Option<String>>;

    /// Names of installed packages not found in any sync repository
    fn foreign_packages(&self) -> Result<Vec<String>>;

    /// Compare two version strings the way the package manager does
    fn vercmp(&self, a: &str, b: &str) -> Result<Ordering>;
}

/// `pacman` and `vercmp` driven through a [`CommandRunner`]
pub struct Pacman<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Pacman<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// `pacman -U [--asdeps] <paths>`
    pub fn install_command(paths: &[PathBuf], as_deps: bool) -> Cmd {
        let mut cmd = Cmd::new("pacman").arg("-U");
        if as_deps {
            cmd = cmd.arg("--asdeps");
        }
        cmd.args(paths.iter().map(|p| p.to_string_lossy().into_owned()))
    }

    fn succeeds(&self, cmd: Cmd) -> bool {
        self.runner
            .capture(&cmd, None)
            .map(|c| c.success())
            .unwrap_or(false)
    }
}

fn version_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Version\s*:\s*(\S+)\s*$").expect("valid regex"))
}

/// Extract the version from `pacman -Qi` output
pub fn parse_installed_version(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| version_line().captures(line))
        .map(|caps| caps[1].to_string())
}

/// Interpret the `-1`, `0` or `1` printed by vercmp
pub fn parse_vercmp(output: &str) -> Result<Ordering> {
    let value: i32 = output
        .trim()
        .parse()
        .map_err(|_| anyhow!("unexpected vercmp output: {:?}", output.trim()))?;
    Ok(value.cmp(&0))
}

impl PackageManager for Pacman<'_> {
    fn in_sync_repos(&self, name: &str) -> bool {
        self.succeeds(Cmd::new("pacman").args(["-Si", name]))
    }

    fn is_installed(&self, name: &str) -> bool {
        self.succeeds(Cmd::new("pacman").args(["-Qi", name]))
    }

    fn installed_version(&self, name: &str) -> Result<Option<String>> {
        let captured = self
            .runner
            .capture(&Cmd::new("pacman").args(["-Qi", name]), None)?;
        if !captured.success() {
            return Ok(None);
        }
        Ok(parse_installed_version(&captured.stdout))
    }

    fn foreign_packages(&self) -> Result<Vec<String>> {
        let captured = self
            .runner
            .capture(&Cmd::new("pacman").args(["--color=never", "-Qqm"]), None)?;
        Ok(captured.lines())
    }

    fn vercmp(&self, a: &str, b: &str) -> Result<Ordering> {
        let captured = self.runner.capture(&Cmd::new("vercmp").args([a, b]), None)?;
        parse_vercmp(&captured.stdout)
    }
}
