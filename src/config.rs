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

//! Configuration management with validation and defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::jail::JailKind;

/// Main configuration structure for aurjail
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Isolation backend used for builds
    pub jail: JailKind,

    /// Show development packages (-git, -svn...) in search and upgrade
    pub with_devel: bool,

    /// Enable colored output
    pub color: bool,

    /// AUR registry configuration
    pub aur: AurConfig,

    /// Jail backends configuration
    #[serde(rename = "jail_settings")]
    pub jails: JailConfig,

    /// Host package cache
    pub cache: CacheConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jail: JailKind::Docker,
            with_devel: false,
            color: true,
            aur: AurConfig::default(),
            jails: JailConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// AUR registry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AurConfig {
    /// RPC endpoint, methods are appended as path segments
    pub rpc_url: String,

    /// Base URL of the recipe git repositories
    pub git_url: String,

    /// Metadata cache size (number of entries)
    pub cache_size: usize,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl Default for AurConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://aur.archlinux.org/rpc/v5".to_string(),
            git_url: "https://aur.archlinux.org".to_string(),
            cache_size: 500,
            timeout_secs: 30,
        }
    }
}

/// Settings shared by the jail backends
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JailConfig {
    /// Name of the build image and of the build container
    pub image: String,

    /// Image the build image derives from
    pub base_image: String,

    /// Host mirrorlist copied into the build image
    pub mirrorlist: PathBuf,

    /// Open files limit of the build container
    pub nofile_limit: u32,

    /// Persistent chroot location
    pub chroot_dir: PathBuf,

    /// Prefix of the ephemeral build directories
    pub workdir_prefix: String,
}

impl Default for JailConfig {
    fn default() -> Self {
        let chroot_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("aurjail")
            .join("chroot");

        Self {
            image: "packaging".to_string(),
            base_image: "archlinux:base-devel".to_string(),
            mirrorlist: PathBuf::from("/etc/pacman.d/mirrorlist"),
            nofile_limit: 1024,
            chroot_dir,
            workdir_prefix: "aurjail_".to_string(),
        }
    }
}

/// Host cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Package cache directory of the host package manager
    pub package_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            package_dir: PathBuf::from("/var/cache/pacman/pkg"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (empty = no file logging)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. /etc/aurjail/aurjail.toml (system-wide)
    /// 2. ~/.config/aurjail/config.toml (user)
    /// 3. Environment variables (AURJAIL_*)
    pub fn load() -> Self {
        let mut config = Config::default();

        if let Some(parsed) = Self::read_file(Path::new("/etc/aurjail/aurjail.toml")) {
            config = config.merge(parsed);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("aurjail").join("config.toml");
            if let Some(parsed) = Self::read_file(&user_config) {
                config = config.merge(parsed);
            }
        }

        config.apply_env_overrides()
    }

    fn read_file(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str::<Config>(&content) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("ignoring invalid configuration {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one (other takes precedence for non-default values)
    fn merge(mut self, other: Config) -> Self {
        let default = Config::default();

        if other.jail != default.jail {
            self.jail = other.jail;
        }
        if other.with_devel != default.with_devel {
            self.with_devel = other.with_devel;
        }
        if other.color != default.color {
            self.color = other.color;
        }
        if other.logging.level != default.logging.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.file.is_some() {
            self.logging.file = other.logging.file;
        }
        if other.cache.package_dir != default.cache.package_dir {
            self.cache.package_dir = other.cache.package_dir;
        }

        self.aur = self.aur.merge(other.aur);
        self.jails = self.jails.merge(other.jails);

        self
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("AURJAIL_JAIL") {
            match val.parse() {
                Ok(kind) => self.jail = kind,
                Err(e) => tracing::warn!("ignoring AURJAIL_JAIL: {}", e),
            }
        }

        if let Ok(val) = std::env::var("AURJAIL_WITH_DEVEL") {
            self.with_devel = val == "1" || val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("AURJAIL_RPC_URL") {
            self.aur.rpc_url = val;
        }

        if let Ok(val) = std::env::var("AURJAIL_LOG_LEVEL") {
            self.logging.level = val;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.aur.rpc_url.trim().is_empty() {
            return Err("aur.rpc_url must not be empty".to_string());
        }
        if self.aur.cache_size == 0 {
            return Err("aur.cache_size must be at least 1".to_string());
        }
        if self.jails.nofile_limit == 0 {
            return Err("jail_settings.nofile_limit must be at least 1".to_string());
        }
        Ok(())
    }
}

impl AurConfig {
    fn merge(mut self, other: AurConfig) -> Self {
        let default = AurConfig::default();

        if other.rpc_url != default.rpc_url {
            self.rpc_url = other.rpc_url;
        }
        if other.git_url != default.git_url {
            self.git_url = other.git_url;
        }
        if other.cache_size != default.cache_size {
            self.cache_size = other.cache_size;
        }
        if other.timeout_secs != default.timeout_secs {
            self.timeout_secs = other.timeout_secs;
        }

        self
    }
}

impl JailConfig {
    fn merge(mut self, other: JailConfig) -> Self {
        let default = JailConfig::default();

        if other.image != default.image {
            self.image = other.image;
        }
        if other.base_image != default.base_image {
            self.base_image = other.base_image;
        }
        if other.mirrorlist != default.mirrorlist {
            self.mirrorlist = other.mirrorlist;
        }
        if other.nofile_limit != default.nofile_limit {
            self.nofile_limit = other.nofile_limit;
        }
        if other.chroot_dir != default.chroot_dir {
            self.chroot_dir = other.chroot_dir;
        }
        if other.workdir_prefix != default.workdir_prefix {
            self.workdir_prefix = other.workdir_prefix;
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.jail, JailKind::Docker);
        assert!(!config.with_devel);
        assert_eq!(config.aur.rpc_url, "https://aur.archlinux.org/rpc/v5");
        assert_eq!(config.jails.nofile_limit, 1024);
        assert!(config.jails.chroot_dir.ends_with("aurjail/chroot"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.aur.cache_size = 0;
        assert!(config.validate().is_err());

        config.aur.cache_size = 10;
        config.jails.nofile_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_and_merge() {
        let parsed: Config = toml::from_str(
            r#"
            jail = "chroot"
            with_devel = true

            [jail_settings]
            image = "builder"

            [cache]
            package_dir = "/srv/pkg"
            "#,
        )
        .unwrap();

        let merged = Config::default().merge(parsed);
        assert_eq!(merged.jail, JailKind::Chroot);
        assert!(merged.with_devel);
        assert_eq!(merged.jails.image, "builder");
        assert_eq!(merged.jails.base_image, "archlinux:base-devel");
        assert_eq!(merged.cache.package_dir, PathBuf::from("/srv/pkg"));
        assert_eq!(merged.aur.git_url, "https://aur.archlinux.org");
    }
}
