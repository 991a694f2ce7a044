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

//! devtools clean chroot backend.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::{BuildBackend, BuildContext, JailKind};
use crate::config::JailConfig;
use crate::exec::{Cmd, Shell};
use crate::ui;

/// Builds with `makechrootpkg` in a chroot kept between runs
pub struct ChrootJail {
    dir: PathBuf,
}

impl ChrootJail {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &JailConfig) -> Self {
        Self::new(&config.chroot_dir)
    }

    /// The clean root copied by `makechrootpkg` for every build
    pub fn root(&self) -> PathBuf {
        self.dir.join("root")
    }

    fn create_command(&self) -> Cmd {
        Cmd::new("mkarchroot").args([path_arg(&self.root()), "base-devel".to_string()])
    }

    fn refresh_command(&self) -> Cmd {
        Cmd::new("arch-nspawn").args([path_arg(&self.root()), "pacman".into(), "-Syu".into()])
    }

    fn build_command(&self, dependencies: &[PathBuf]) -> Cmd {
        let mut cmd = Cmd::new("makechrootpkg").args(["-c".to_string(), "-r".into(), path_arg(&self.dir)]);
        for dependency in dependencies {
            cmd = cmd.arg("-I").arg(path_arg(dependency));
        }
        cmd
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl BuildBackend for ChrootJail {
    fn kind(&self) -> JailKind {
        JailKind::Chroot
    }

    fn required_tool(&self) -> (&'static str, &'static str) {
        ("mkarchroot", "devtools")
    }

    fn prepare(&self, shell: &Shell<'_>) -> Result<()> {
        if self.root().is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        ui::log(&format!("Creating the build chroot in {}", self.dir.display()));
        shell.run_checked(&self.create_command(), None)
    }

    fn build(&self, shell: &Shell<'_>, ctx: &BuildContext<'_>) -> Result<()> {
        shell.run_checked(&self.refresh_command(), None)?;
        shell.run_checked(&self.build_command(ctx.dependencies), Some(ctx.workdir))
    }

    fn plan(&self, _shell: &Shell<'_>, ctx: &BuildContext<'_>) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        if !self.root().is_dir() {
            lines.push(self.create_command().to_string());
        }
        lines.push(self.refresh_command().to_string());
        lines.push(format!(
            "cd {} && {}",
            ctx.workdir.display(),
            self.build_command(ctx.dependencies)
        ));
        Ok(lines)
    }
}
