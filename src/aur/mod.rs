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

//! AUR (Arch User Repository) support module.
//!
//! - RPC client with an in-process metadata cache
//! - Package model with local installation state
//! - Resolution of the AUR-only dependency chain

pub mod client;
pub mod package;
pub mod resolver;

pub use client::{AurClient, AurPackageInfo, Registry};
pub use package::{Catalog, Package};
pub use resolver::resolve_chain;

use serde::Deserialize;

/// AUR RPC API response wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct AurRpcResponse {
    /// A missing `results` key means zero matches
    #[serde(default)]
    pub results: Vec<AurPackageInfo>,
    #[serde(default)]
    pub error: Option<String>,
}
