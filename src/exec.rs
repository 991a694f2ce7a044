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

//! Subprocess execution.
//!
//! Every external tool (pacman, vercmp, git, makepkg, docker, devtools) is
//! reached through [`CommandRunner`]. Commands always receive their
//! execution directory explicitly; the process working directory is never
//! changed.

use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::ui::Prompter;

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Prefix the command with another program (`sudo`, `exec`...)
    pub fn wrapped_in(self, program: &str) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: program.to_string(),
            args,
        }
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a quiet command
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub code: Option<i32>,
    pub stdout: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Non-empty stdout lines
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Seam between the build pipeline and the operating system
pub trait CommandRunner {
    /// Run with inherited stdio, returning whether the command succeeded
    fn run(&self, cmd: &Cmd, cwd: Option<&Path>) -> Result<bool>;

    /// Run with `LANG=C`, capturing stdout and discarding stderr
    fn capture(&self, cmd: &Cmd, cwd: Option<&Path>) -> Result<Captured>;

    /// Whether `program` can be found in `PATH`
    fn has_program(&self, program: &str) -> bool;

    /// Effective uid of the current process
    fn is_root(&self) -> bool;
}

/// Runs commands on the host with `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &Cmd, cwd: Option<&Path>) -> Result<bool> {
        tracing::debug!(command = %cmd, cwd = ?cwd, "running");
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let status = command
            .status()
            .with_context(|| format!("Failed to run {}", cmd.program))?;
        Ok(status.success())
    }

    fn capture(&self, cmd: &Cmd, cwd: Option<&Path>) -> Result<Captured> {
        tracing::debug!(command = %cmd, cwd = ?cwd, "capturing");
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .env("LANG", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .with_context(|| format!("Failed to run {}", cmd.program))?;
        Ok(Captured {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }

    fn has_program(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn is_root(&self) -> bool {
        unsafe { libc::getuid() == 0 }
    }
}

/// Runner plus the interactive pieces needed around privileged commands
pub struct Shell<'a> {
    pub runner: &'a dyn CommandRunner,
    pub prompter: &'a dyn Prompter,
}

impl<'a> Shell<'a> {
    pub fn new(runner: &'a dyn CommandRunner, prompter: &'a dyn Prompter) -> Self {
        Self { runner, prompter }
    }

    /// Run and turn a non-zero exit into an error
    pub fn run_checked(&self, cmd: &Cmd, cwd: Option<&Path>) -> Result<()> {
        if self.runner.run(cmd, cwd)? {
            Ok(())
        } else {
            Err(crate::error::AurJailError::CommandFailed {
                command: cmd.to_string(),
                code: None,
            }
            .into())
        }
    }

    /// Prefix `cmd` with sudo.
    ///
    /// When sudo would ask for a password, warn first and wait for Enter so
    /// the password prompt does not show up in the middle of build output.
    /// Some users allow docker or pacman in their sudoers, so those are checked
    /// directly.
    pub fn elevate(&self, cmd: Cmd) -> Result<Cmd> {
        if self.runner.is_root() {
            return Ok(cmd);
        }

        let guard = if cmd.program == "docker" || cmd.program == "pacman" {
            Cmd::new("sudo").args(["-n", cmd.program.as_str(), "--version"])
        } else {
            Cmd::new("sudo").args(["-n", "true"])
        };

        let allowed = self
            .runner
            .capture(&guard, None)
            .map(|c| c.success())
            .unwrap_or(false);
        if !allowed {
            self.prompter.pause(
                "You are going to run a `sudo' command and a password will be prompted. \
                 Press Enter to continue.",
            )?;
        }

        Ok(cmd.wrapped_in("sudo"))
    }
}
