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

//! AUR dependency chain resolution.
//!
//! Only dependencies the host package manager cannot provide are kept. The
//! chain is built by a post-order DFS so every package comes after its own
//! AUR dependencies.

use anyhow::Result;
use std::collections::HashSet;

use super::client::parse_dependency;
use super::package::{Catalog, Package};
use crate::pacman::PackageManager;

/// Ordered list of AUR packages to build before `target`.
///
/// `target` itself is never part of the result. Dependencies sharing the
/// target's recipe base are left out since the target build produces them.
/// Registry failures abort the whole resolution.
pub fn resolve_chain(
    target: &Package,
    catalog: &Catalog<'_>,
    pm: &dyn PackageManager,
) -> Result<Vec<Package>> {
    // The target seeds the chain so that cycles back to it stop right away
    let mut chain = vec![target.clone()];
    let mut visiting = HashSet::from([target.name().to_string()]);
    visit(target, &mut chain, &mut visiting, catalog, pm)?;
    chain.remove(0);

    tracing::debug!(
        target = target.name(),
        chain = ?chain.iter().map(Package::name).collect::<Vec<_>>(),
        "dependency chain resolved"
    );
    Ok(chain)
}

fn visit(
    current: &Package,
    chain: &mut Vec<Package>,
    visiting: &mut HashSet<String>,
    catalog: &Catalog<'_>,
    pm: &dyn PackageManager,
) -> Result<()> {
    for list in current.info().dependency_lists() {
        for raw in list {
            let (name, _) = parse_dependency(raw);

            if pm.in_sync_repos(&name) {
                continue;
            }

            // Virtual packages and groups end up here, pacman handles them
            let Some(dependency) = catalog.details(&name)? else {
                tracing::debug!(dependency = %name, "not in the AUR, skipped");
                continue;
            };

            // Already chained, or an ancestor still being resolved (cycle)
            if chain.contains(&dependency) || visiting.contains(dependency.name()) {
                continue;
            }

            if dependency.base() == current.base() {
                // Built by the same recipe as `current`. Only recorded when
                // `current` is not itself waiting in the chain.
                if !chain.contains(current) {
                    chain.push(dependency);
                }
                continue;
            }

            visiting.insert(dependency.name().to_string());
            visit(&dependency, chain, visiting, catalog, pm)?;
            chain.push(dependency);
        }
    }
    Ok(())
}
