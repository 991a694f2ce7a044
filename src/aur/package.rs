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

//! A single AUR package and its state on the local system.

use anyhow::Result;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use super::client::{AurPackageInfo, Registry};
use crate::pacman::PackageManager;
use crate::ui;

/// Suffixes of packages tracking a VCS head
const DEVEL_SUFFIXES: [&str; 5] = ["-bzr", "-cvs", "-git", "-hg", "-svn"];

/// Development packages have meaningless version strings
pub fn is_devel(name: &str) -> bool {
    DEVEL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// An AUR package, identified by its name.
///
/// Lives for one command invocation. The only state mutated after creation
/// is the cached local version and the list of built artifacts.
#[derive(Debug, Clone)]
pub struct Package {
    info: AurPackageInfo,
    arch: String,
    local_version: Option<String>,
    built: Vec<PathBuf>,
}

impl Package {
    /// Wrap registry data. A tarball of this exact version already sitting in
    /// the host cache counts as built, except for development packages.
    pub fn new(info: AurPackageInfo, arch: &str, package_cache: &Path) -> Self {
        let cache_path = package_cache.join(format!(
            "{}-{}-{}.pkg.tar.zst",
            info.package_base, info.version, arch
        ));
        let mut built = Vec::new();
        if cache_path.exists() && !is_devel(&info.name) {
            built.push(cache_path);
        }

        Self {
            info,
            arch: arch.to_string(),
            local_version: None,
            built,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn description(&self) -> Option<&str> {
        self.info.description.as_deref()
    }

    /// Recipe base shared by split packages
    pub fn base(&self) -> &str {
        &self.info.package_base
    }

    pub fn info(&self) -> &AurPackageInfo {
        &self.info
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn is_outdated(&self) -> bool {
        self.info.out_of_date.is_some()
    }

    pub fn is_devel(&self) -> bool {
        is_devel(&self.info.name)
    }

    pub fn built(&self) -> &[PathBuf] {
        &self.built
    }

    pub fn set_built(&mut self, artifacts: Vec<PathBuf>) {
        self.built = artifacts;
    }

    /// Version found by the last successful local lookup
    pub fn local_version(&self) -> Option<&str> {
        self.local_version.as_deref()
    }

    /// Ask the host package manager once; a positive answer is kept
    pub fn is_locally_installed(&mut self, pm: &dyn PackageManager) -> Result<bool> {
        if self.local_version.is_some() {
            return Ok(true);
        }
        self.local_version = pm.installed_version(self.name())?;
        Ok(self.local_version.is_some())
    }

    /// Whether the AUR carries something newer than what is installed
    pub fn needs_upgrade(&mut self, pm: &dyn PackageManager) -> Result<bool> {
        if !self.is_locally_installed(pm)? {
            return Ok(false);
        }
        if self.is_devel() {
            return Ok(true);
        }

        let local = self.local_version.clone().unwrap_or_default();
        if local == self.info.version {
            return Ok(false);
        }

        match pm.vercmp(&local, &self.info.version)? {
            Ordering::Less => Ok(true),
            Ordering::Equal => Ok(false),
            Ordering::Greater => {
                tracing::warn!(package = self.name(), %local, remote = %self.info.version, "local version is newer");
                ui::warning(&format!(
                    "{} is newer locally ({}) than on the AUR ({})",
                    self.name(),
                    local,
                    self.info.version
                ));
                Ok(false)
            }
        }
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.info.name == other.info.name
    }
}

impl Eq for Package {}

/// Turns registry answers into [`Package`]s for this machine
pub struct Catalog<'a> {
    registry: &'a dyn Registry,
    arch: String,
    package_cache: PathBuf,
}

impl<'a> Catalog<'a> {
    pub fn new(registry: &'a dyn Registry, arch: &str, package_cache: &Path) -> Self {
        Self {
            registry,
            arch: arch.to_string(),
            package_cache: package_cache.to_path_buf(),
        }
    }

    pub fn search(&self, terms: &[String]) -> Result<Vec<Package>> {
        Ok(self
            .registry
            .search(terms)?
            .into_iter()
            .map(|info| Package::new(info, &self.arch, &self.package_cache))
            .collect())
    }

    /// Lookup by name, an `aur/` prefix is accepted
    pub fn details(&self, name: &str) -> Result<Option<Package>> {
        let name = name.strip_prefix("aur/").unwrap_or(name);
        Ok(self
            .registry
            .info(name)?
            .map(|info| Package::new(info, &self.arch, &self.package_cache)))
    }
}

/// Architecture tag of the running machine
pub fn machine_arch() -> &'static str {
    std::env::consts::ARCH
}
