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

//! In-memory doubles for the system seams.

use anyhow::{anyhow, Result};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use crate::aur::{AurPackageInfo, Registry};
use crate::exec::{Captured, Cmd, CommandRunner};
use crate::pacman::PackageManager;
use crate::ui::Prompter;

pub fn info(name: &str, base: &str, version: &str) -> AurPackageInfo {
    AurPackageInfo {
        name: name.to_string(),
        package_base: base.to_string(),
        version: version.to_string(),
        ..Default::default()
    }
}

pub fn info_with_deps(name: &str, base: &str, make: &[&str], depends: &[&str]) -> AurPackageInfo {
    AurPackageInfo {
        make_depends: make.iter().map(|d| d.to_string()).collect(),
        depends: depends.iter().map(|d| d.to_string()).collect(),
        ..info(name, base, "1.0-1")
    }
}

/// Records commands and fakes the side effects the pipeline relies on.
///
/// `git clone <url>/<base>.git <dir>` writes a PKGBUILD into `<dir>`.
/// `makepkg --packagelist` lists the configured products, and the build
/// commands (`makepkg -s`, `docker run`, `makechrootpkg`) create them in the
/// build directory. A `{base}` placeholder in a product name is replaced by
/// the recipe base that was cloned into that directory.
pub struct FakeRunner {
    history: RefCell<Vec<(String, Option<PathBuf>)>>,
    responses: RefCell<HashMap<String, Captured>>,
    failures: RefCell<Vec<String>>,
    missing: RefCell<HashSet<String>>,
    root: Cell<bool>,
    write_recipe: Cell<bool>,
    products: RefCell<Vec<String>>,
    clones: RefCell<HashMap<PathBuf, String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            history: RefCell::new(Vec::new()),
            responses: RefCell::new(HashMap::new()),
            failures: RefCell::new(Vec::new()),
            missing: RefCell::new(HashSet::new()),
            root: Cell::new(false),
            write_recipe: Cell::new(true),
            products: RefCell::new(vec!["{base}-1.0-1-x86_64.pkg.tar.zst".to_string()]),
            clones: RefCell::new(HashMap::new()),
        }
    }

    /// Canned answer for `capture` of an exact command line
    pub fn respond(&self, line: &str, code: i32, stdout: &str) {
        self.responses.borrow_mut().insert(
            line.to_string(),
            Captured {
                code: Some(code),
                stdout: stdout.to_string(),
            },
        );
    }

    /// Make every command line starting with `prefix` fail
    pub fn fail(&self, prefix: &str) {
        self.failures.borrow_mut().push(prefix.to_string());
    }

    pub fn remove_program(&self, program: &str) {
        self.missing.borrow_mut().insert(program.to_string());
    }

    pub fn set_root(&self, root: bool) {
        self.root.set(root);
    }

    /// Clones succeed but leave no PKGBUILD behind
    pub fn without_recipe(&self) {
        self.write_recipe.set(false);
    }

    pub fn set_products(&self, products: &[&str]) {
        *self.products.borrow_mut() = products.iter().map(|p| p.to_string()).collect();
    }

    pub fn history(&self) -> Vec<String> {
        self.history.borrow().iter().map(|(line, _)| line.clone()).collect()
    }

    /// Commands whose line contains `needle`
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.history()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.matching(needle).len()
    }

    /// Directories every `git clone` targeted
    pub fn cloned_dirs(&self) -> Vec<PathBuf> {
        self.clones.borrow().keys().cloned().collect()
    }

    fn products_for(&self, dir: &Path) -> Vec<String> {
        let base = self.clones.borrow().get(dir).cloned().unwrap_or_default();
        self.products
            .borrow()
            .iter()
            .map(|p| p.replace("{base}", &base))
            .collect()
    }

    /// Programs removed from `PATH` cannot be spawned at all
    fn spawnable(&self, cmd: &Cmd) -> Result<()> {
        if self.missing.borrow().contains(&cmd.program) {
            return Err(anyhow!("Failed to run {}", cmd.program));
        }
        Ok(())
    }

    fn fails(&self, line: &str) -> bool {
        self.failures.borrow().iter().any(|prefix| line.starts_with(prefix))
    }

    fn clone_repository(&self, cmd: &Cmd) -> Result<()> {
        let (Some(url), Some(dir)) = (cmd.args.get(1), cmd.args.get(2)) else {
            return Ok(());
        };
        let base = url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .trim_end_matches(".git")
            .to_string();
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir)?;
        if self.write_recipe.get() {
            std::fs::write(dir.join("PKGBUILD"), format!("pkgbase={}\n", base))?;
        }
        self.clones.borrow_mut().insert(dir, base);
        Ok(())
    }

    /// Directory a build command writes into
    fn build_dir(&self, cmd: &Cmd, cwd: Option<&Path>) -> Option<PathBuf> {
        let line = cmd.to_string();
        if line.contains("docker run") {
            return cmd.args.iter().find_map(|arg| {
                let source = arg.strip_prefix("type=bind,source=")?;
                let source = source.split(',').next()?;
                Some(PathBuf::from(source))
            });
        }
        if line.starts_with("makepkg -s") || cmd.program == "makechrootpkg" {
            return cwd.map(Path::to_path_buf);
        }
        None
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, cmd: &Cmd, cwd: Option<&Path>) -> Result<bool> {
        self.spawnable(cmd)?;
        let line = cmd.to_string();
        self.history
            .borrow_mut()
            .push((line.clone(), cwd.map(Path::to_path_buf)));
        if self.fails(&line) {
            return Ok(false);
        }

        if cmd.program == "git" && cmd.args.first().map(String::as_str) == Some("clone") {
            self.clone_repository(cmd)?;
        } else if let Some(dir) = self.build_dir(cmd, cwd) {
            for product in self.products_for(&dir) {
                std::fs::write(dir.join(product), b"tarball")?;
            }
        }
        Ok(true)
    }

    fn capture(&self, cmd: &Cmd, cwd: Option<&Path>) -> Result<Captured> {
        self.spawnable(cmd)?;
        let line = cmd.to_string();
        self.history
            .borrow_mut()
            .push((line.clone(), cwd.map(Path::to_path_buf)));

        if let Some(captured) = self.responses.borrow().get(&line) {
            return Ok(captured.clone());
        }
        if line == "makepkg --packagelist" {
            if let Some(dir) = cwd {
                let listed: Vec<String> = self
                    .products_for(dir)
                    .iter()
                    .map(|p| format!("/home/builder/packages/{}", p))
                    .collect();
                return Ok(Captured {
                    code: Some(0),
                    stdout: listed.join("\n"),
                });
            }
        }
        Ok(Captured {
            code: Some(1),
            stdout: String::new(),
        })
    }

    fn has_program(&self, program: &str) -> bool {
        !self.missing.borrow().contains(program)
    }

    fn is_root(&self) -> bool {
        self.root.get()
    }
}

/// Hands out prepared answers; an exhausted script answers with an empty line
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<String>>,
    questions: RefCell<Vec<String>>,
    pauses: Cell<usize>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().map(|a| a.to_string()).collect()),
            questions: RefCell::new(Vec::new()),
            pauses: Cell::new(0),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }

    pub fn pauses(&self) -> usize {
        self.pauses.get()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, question: &str, _choices: &str) -> Result<String> {
        self.questions.borrow_mut().push(question.to_string());
        Ok(self
            .answers
            .borrow_mut()
            .pop_front()
            .unwrap_or_default()
            .trim()
            .to_lowercase())
    }

    fn pause(&self, _message: &str) -> Result<()> {
        self.pauses.set(self.pauses.get() + 1);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    packages: RefCell<HashMap<String, AurPackageInfo>>,
    lookups: RefCell<HashMap<String, usize>>,
    failing: RefCell<HashSet<String>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, info: AurPackageInfo) {
        self.packages.borrow_mut().insert(info.name.clone(), info);
    }

    pub fn fail_on(&self, name: &str) {
        self.failing.borrow_mut().insert(name.to_string());
    }

    pub fn lookups(&self, name: &str) -> usize {
        self.lookups.borrow().get(name).copied().unwrap_or(0)
    }
}

impl Registry for FakeRegistry {
    fn search(&self, terms: &[String]) -> Result<Vec<AurPackageInfo>> {
        let mut found: Vec<AurPackageInfo> = self
            .packages
            .borrow()
            .values()
            .filter(|p| terms.iter().all(|t| p.name.contains(t.as_str())))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    fn info(&self, name: &str) -> Result<Option<AurPackageInfo>> {
        *self.lookups.borrow_mut().entry(name.to_string()).or_default() += 1;
        if self.failing.borrow().contains(name) {
            return Err(anyhow!("registry unreachable"));
        }
        Ok(self.packages.borrow().get(name).cloned())
    }
}

#[derive(Default)]
pub struct FakePackageManager {
    sync: RefCell<HashSet<String>>,
    installed: RefCell<HashMap<String, String>>,
    foreign: RefCell<Vec<String>>,
    ordering: RefCell<HashMap<(String, String), Ordering>>,
    version_queries: Cell<usize>,
    vercmp_calls: Cell<usize>,
}

impl FakePackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sync(&self, name: &str) {
        self.sync.borrow_mut().insert(name.to_string());
    }

    pub fn install(&self, name: &str, version: &str) {
        self.installed
            .borrow_mut()
            .insert(name.to_string(), version.to_string());
    }

    /// Installed and not provided by any sync repository
    pub fn install_foreign(&self, name: &str, version: &str) {
        self.install(name, version);
        self.foreign.borrow_mut().push(name.to_string());
    }

    pub fn set_vercmp(&self, a: &str, b: &str, ordering: Ordering) {
        self.ordering
            .borrow_mut()
            .insert((a.to_string(), b.to_string()), ordering);
    }

    pub fn version_queries(&self) -> usize {
        self.version_queries.get()
    }

    pub fn vercmp_calls(&self) -> usize {
        self.vercmp_calls.get()
    }
}

impl PackageManager for FakePackageManager {
    fn in_sync_repos(&self, name: &str) -> bool {
        self.sync.borrow().contains(name)
    }

    fn is_installed(&self, name: &str) -> bool {
        self.installed.borrow().contains_key(name)
    }

    fn installed_version(&self, name: &str) -> Result<Option<String>> {
        self.version_queries.set(self.version_queries.get() + 1);
        Ok(self.installed.borrow().get(name).cloned())
    }

    fn foreign_packages(&self) -> Result<Vec<String>> {
        Ok(self.foreign.borrow().clone())
    }

    fn vercmp(&self, a: &str, b: &str) -> Result<Ordering> {
        self.vercmp_calls.set(self.vercmp_calls.get() + 1);
        Ok(self
            .ordering
            .borrow()
            .get(&(a.to_string(), b.to_string()))
            .copied()
            .unwrap_or_else(|| a.cmp(b)))
    }
}
