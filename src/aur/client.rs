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

//! AUR RPC API client with caching.

use anyhow::Result;
use lru::LruCache;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use super::AurRpcResponse;
use crate::config::AurConfig;
use crate::error::AurJailError;

/// AUR package information from RPC API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AurPackageInfo {
    #[serde(rename = "ID", default)]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub package_base: String,
    pub version: String,
    pub description: Option<String>,
    #[serde(rename = "URL")]
    pub url: Option<String>,
    #[serde(default)]
    pub num_votes: u32,
    #[serde(default)]
    pub popularity: f64,
    pub out_of_date: Option<i64>,
    pub maintainer: Option<String>,
    #[serde(default)]
    pub last_modified: i64,

    // Dependencies
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub make_depends: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub license: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl AurPackageInfo {
    /// Build-time lists first, then run-time, each in declared order
    pub fn dependency_lists(&self) -> [&[String]; 2] {
        [&self.make_depends, &self.depends]
    }

    /// Web page of the package on the AUR
    pub fn aur_page(&self) -> String {
        format!("https://aur.archlinux.org/packages/{}", self.name)
    }
}

/// Where package metadata comes from
pub trait Registry {
    /// Free text search, an empty list is a valid answer
    fn search(&self, terms: &[String]) -> Result<Vec<AurPackageInfo>>;

    /// Exact lookup of a single package
    fn info(&self, name: &str) -> Result<Option<AurPackageInfo>>;
}

/// Blocking AUR RPC client.
///
/// One GET per call, no retry. Successful `info` answers are kept in an LRU
/// cache so resolving a dependency twice hits the network once.
pub struct AurClient {
    agent: ureq::Agent,
    cache: Mutex<LruCache<String, AurPackageInfo>>,
    base_url: String,
}

impl AurClient {
    pub fn new() -> Self {
        Self::from_config(&AurConfig::default())
    }

    pub fn from_config(config: &AurConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("aurjail/", env!("CARGO_PKG_VERSION")))
            .build();
        let size = NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN);

        Self {
            agent,
            cache: Mutex::new(LruCache::new(size)),
            base_url: config.rpc_url.trim_end_matches('/').to_string(),
        }
    }

    /// `<base>/<method>/<term%20term...>`
    pub fn request_url(&self, method: &str, terms: &[String]) -> String {
        let encoded: Vec<String> = terms
            .iter()
            .map(|t| urlencoding::encode(t).into_owned())
            .collect();
        format!("{}/{}/{}", self.base_url, method, encoded.join("%20"))
    }

    fn get(&self, method: &str, terms: &[String]) -> Result<Vec<AurPackageInfo>> {
        let url = self.request_url(method, terms);
        tracing::debug!(%url, "AUR request");

        let body = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| AurJailError::registry(&url, e))?
            .into_string()
            .map_err(|e| AurJailError::registry(&url, e))?;

        parse_response(&body).map_err(|e| AurJailError::registry(&url, e).into())
    }

    fn cached(&self, name: &str) -> Option<AurPackageInfo> {
        self.cache.lock().ok()?.get(name).cloned()
    }
}

impl Default for AurClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for AurClient {
    fn search(&self, terms: &[String]) -> Result<Vec<AurPackageInfo>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        self.get("search", terms)
    }

    fn info(&self, name: &str) -> Result<Option<AurPackageInfo>> {
        if let Some(info) = self.cached(name) {
            return Ok(Some(info));
        }

        let found = self.get("info", &[name.to_string()])?.into_iter().next();
        if let Some(info) = &found {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(info.name.clone(), info.clone());
            }
        }
        Ok(found)
    }
}

/// Decode an RPC body
pub fn parse_response(body: &str) -> std::result::Result<Vec<AurPackageInfo>, String> {
    let response: AurRpcResponse = serde_json::from_str(body).map_err(|e| e.to_string())?;
    if let Some(error) = response.error {
        return Err(error);
    }
    Ok(response.results)
}

/// Parse dependency string into name and optional version constraint.
///
/// `python>=3.10` gives `("python", Some(">=3.10"))`. A string without any
/// operator is returned untouched.
pub fn parse_dependency(dep: &str) -> (String, Option<String>) {
    let dep = dep.trim();

    match dep.find(['<', '>', '=']) {
        Some(pos) => (dep[..pos].trim().to_string(), Some(dep[pos..].to_string())),
        None => (dep.to_string(), None),
    }
}
