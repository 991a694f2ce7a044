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

//! Error taxonomy for registry lookups, jail builds and installation.

use thiserror::Error;

/// Main error type for aurjail operations
#[derive(Debug, Error)]
pub enum AurJailError {
    /// Remote registry request failed (network, HTTP status or bad payload)
    #[error("AUR request to {url} failed: {message}")]
    Registry { url: String, message: String },

    /// Recipe repository could not be cloned
    #[error("Unable to clone the recipe of '{package}'")]
    CloneFailed { package: String },

    /// Clone succeeded but there is no PKGBUILD in it
    #[error("No PKGBUILD found after cloning '{package}'")]
    RecipeMissing { package: String },

    /// Source verification failed on the host
    #[error("Source integrity check failed for '{package}'")]
    Integrity { package: String },

    /// The build ran but nothing matching the package was produced
    #[error("No package was built for '{package}'")]
    NoArtifacts { package: String },

    /// The jail itself could not be set up (image build context, chroot dir)
    #[error("Unable to set up the {jail} jail: {message}")]
    JailSetup { jail: String, message: String },

    /// The build step failed before or around the jailed command
    #[error("Build of '{package}' failed: {message}")]
    BuildFailed { package: String, message: String },

    /// A command required by the build pipeline exited with an error
    #[error("Command `{command}` failed with exit code {code:?}")]
    CommandFailed { command: String, code: Option<i32> },

    /// The jail backend binary is not installed
    #[error("Missing {binary} (from package {provider}), required by the {jail} jail")]
    MissingTool {
        binary: String,
        provider: String,
        jail: String,
    },

    /// The user answered "quit" to a confirmation
    #[error("Aborted by user")]
    UserQuit,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl AurJailError {
    /// Errors that end a single package build without stopping the program.
    ///
    /// These are reported to the user and turn the package contribution into
    /// an empty artifact list.
    pub fn is_build_abort(&self) -> bool {
        matches!(
            self,
            AurJailError::CloneFailed { .. }
                | AurJailError::RecipeMissing { .. }
                | AurJailError::Integrity { .. }
                | AurJailError::NoArtifacts { .. }
                | AurJailError::JailSetup { .. }
                | AurJailError::BuildFailed { .. }
                | AurJailError::CommandFailed { .. }
        )
    }

    /// Create a registry error
    pub fn registry(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AurJailError::Registry {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

/// True when `err` carries a user quit request anywhere in its chain.
pub fn is_user_quit(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<AurJailError>(),
            Some(AurJailError::UserQuit)
        )
    })
}
