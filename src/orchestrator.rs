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

//! User commands.

use anyhow::Result;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use console::style;
use std::path::PathBuf;

use crate::aur::client::parse_dependency;
use crate::aur::package::machine_arch;
use crate::aur::{Catalog, Package, Registry};
use crate::config::Config;
use crate::error::AurJailError;
use crate::exec::{Cmd, Shell};
use crate::jail::{DockerJail, Jail, JailEnv, JailKind, JailOptions};
use crate::pacman::PackageManager;
use crate::ui;

/// Answer to the upgrade menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Nothing,
    Quit,
    /// Zero-based, sorted, without duplicates
    Indices(Vec<usize>),
}

/// Read the upgrade menu answer for `count` entries.
///
/// An empty answer takes everything. Numbers are 1-based; out of range or
/// unparsable tokens are ignored.
pub fn parse_selection(answer: &str, count: usize) -> Selection {
    let answer = answer.trim().to_lowercase();
    match answer.as_str() {
        "" | "a" | "all" | "y" | "yes" => return Selection::All,
        "n" | "no" | "none" => return Selection::Nothing,
        "q" | "quit" => return Selection::Quit,
        _ => {}
    }

    let mut indices: Vec<usize> = answer
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|token| token.parse::<usize>().ok())
        .filter(|i| (1..=count).contains(i))
        .map(|i| i - 1)
        .collect();
    indices.sort_unstable();
    indices.dedup();

    if indices.is_empty() {
        Selection::Nothing
    } else {
        Selection::Indices(indices)
    }
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    shell: Shell<'a>,
    catalog: Catalog<'a>,
    pm: &'a dyn PackageManager,
    options: JailOptions,
    origin: PathBuf,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        shell: Shell<'a>,
        registry: &'a dyn Registry,
        pm: &'a dyn PackageManager,
        options: JailOptions,
        origin: PathBuf,
    ) -> Self {
        Self {
            config,
            shell,
            catalog: Catalog::new(registry, machine_arch(), &config.cache.package_dir),
            pm,
            options,
            origin,
        }
    }

    /// Registry matches, development packages filtered out unless wanted
    pub fn search_results(&self, terms: &[String]) -> Result<Vec<Package>> {
        let mut packages = self.catalog.search(terms)?;
        if !self.config.with_devel {
            packages.retain(|p| !p.is_devel());
        }
        Ok(packages)
    }

    pub fn search(&self, terms: &[String]) -> Result<()> {
        let packages = self.search_results(terms)?;
        if packages.is_empty() {
            ui::result(&format!("No AUR package matches {}", terms.join(" ")));
            return Ok(());
        }

        for mut package in packages {
            println!("{}", self.headline(&mut package)?);
            if let Some(description) = package.description() {
                println!("    {}", style(description).dim());
            }
        }
        Ok(())
    }

    /// `aur/<name> <version>` with installed and out of date badges
    fn headline(&self, package: &mut Package) -> Result<String> {
        let mut line = format!(
            "{}{} {}",
            style("aur/").magenta().bold(),
            style(package.name()).bold(),
            style(package.version()).green().bold()
        );
        if package.is_locally_installed(self.pm)? {
            let badge = match package.local_version() {
                Some(local) if local != package.version() => format!("[installed: {}]", local),
                _ => "[installed]".to_string(),
            };
            line.push_str(&format!(" {}", style(badge).cyan().bold()));
        }
        if package.is_outdated() {
            line.push_str(&format!(" {}", style("[out of date]").red().bold()));
        }
        Ok(line)
    }

    pub fn info(&self, names: &[String]) -> Result<()> {
        for name in names {
            let Some(mut package) = self.catalog.details(name)? else {
                ui::error(&format!("package '{}' was not found in the AUR", name));
                continue;
            };
            for (label, value) in self.info_fields(&package) {
                println!("{} {}", style(format!("{:<14}:", label)).bold(), value);
            }

            if package.is_locally_installed(self.pm)? && !package.built().is_empty() {
                let tarballs: Vec<String> = package
                    .built()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                ui::log(&format!(
                    "{} is already built: {}",
                    package.name(),
                    tarballs.join("  ")
                ));
            }
            println!();
        }
        Ok(())
    }

    fn info_fields(&self, package: &Package) -> Vec<(&'static str, String)> {
        let info = package.info();
        vec![
            ("Name", info.name.clone()),
            ("Version", info.version.clone()),
            ("Description", or_dashes(info.description.clone())),
            ("URL", or_dashes(info.url.clone())),
            ("License", join_or_dashes(&info.license)),
            ("Provides", join_or_dashes(&info.provides)),
            ("Depends", self.dependency_list(&info.depends)),
            ("MakeDepends", self.dependency_list(&info.make_depends)),
            ("Conflicts", join_or_dashes(&info.conflicts)),
            ("Maintainer", or_dashes(info.maintainer.clone())),
            ("LastModified", format_timestamp(info.last_modified)),
            (
                "OutOfDate",
                match info.out_of_date {
                    Some(since) => style(format!("since {}", format_timestamp(since)))
                        .red()
                        .bold()
                        .to_string(),
                    None => "No".to_string(),
                },
            ),
            ("NumVotes", info.num_votes.to_string()),
            ("Popularity", format!("{:.2}", info.popularity)),
            ("AUR page", info.aur_page()),
            ("Keywords", join_or_dashes(&info.keywords)),
        ]
    }

    /// Locally installed entries are underlined
    fn dependency_list(&self, dependencies: &[String]) -> String {
        if dependencies.is_empty() {
            return "--".to_string();
        }
        dependencies
            .iter()
            .map(|dep| {
                let (name, _) = parse_dependency(dep);
                if self.pm.is_installed(&name) {
                    style(dep).underlined().to_string()
                } else {
                    dep.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Foreign packages, as pacman prints them
    pub fn list(&self) -> Result<()> {
        self.shell.runner.run(&Cmd::new("pacman").arg("-Qm"), None)?;
        Ok(())
    }

    pub fn install(&self, names: &[String]) -> Result<()> {
        for name in names {
            match self.catalog.details(name)? {
                Some(package) => self.build_and_install(package)?,
                None => ui::error(&format!("package '{}' was not found in the AUR", name)),
            }
        }
        Ok(())
    }

    /// Installed AUR packages with a newer version available
    pub fn upgrade_candidates(&self) -> Result<Vec<Package>> {
        let mut candidates = Vec::new();
        for name in self.pm.foreign_packages()? {
            let Some(mut package) = self.catalog.details(&name)? else {
                tracing::debug!(package = %name, "foreign package unknown to the AUR");
                continue;
            };
            if package.is_devel() && !self.config.with_devel {
                continue;
            }
            if package.needs_upgrade(self.pm)? {
                candidates.push(package);
            }
        }
        Ok(candidates)
    }

    pub fn upgrade(&self) -> Result<()> {
        let candidates = self.upgrade_candidates()?;
        if candidates.is_empty() {
            ui::result("Every AUR package is up to date");
            return Ok(());
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["#", "package", "installed", "available"]);
        for (i, package) in candidates.iter().enumerate() {
            table.add_row(vec![
                (i + 1).to_string(),
                package.name().to_string(),
                package.local_version().unwrap_or("--").to_string(),
                package.version().to_string(),
            ]);
        }
        println!("{}", table);

        let choices = if candidates.len() == 1 {
            "[Y/n/q]".to_string()
        } else {
            format!("[A/1…{}/n/q]", candidates.len())
        };
        let answer = self
            .shell
            .prompter
            .ask("Which packages do you want to upgrade?", &choices)?;

        let selected: Vec<Package> = match parse_selection(&answer, candidates.len()) {
            Selection::Quit => return Err(AurJailError::UserQuit.into()),
            Selection::Nothing => {
                ui::result("Nothing to upgrade");
                return Ok(());
            }
            Selection::All => candidates,
            Selection::Indices(indices) => indices.into_iter().map(|i| candidates[i].clone()).collect(),
        };

        for package in selected {
            self.build_and_install(package)?;
        }
        Ok(())
    }

    /// Remove leftover build containers and images
    pub fn prune(&self) -> Result<()> {
        if self.config.jail != JailKind::Docker {
            ui::result(&format!("The {} jail leaves nothing to prune", self.config.jail));
            return Ok(());
        }
        if !self.shell.runner.has_program("docker") {
            ui::warning("docker is not installed, nothing to prune");
            return Ok(());
        }

        let docker = DockerJail::from_config(&self.config.jails);
        let containers = docker.containers(&self.shell)?;
        let images = docker.images(&self.shell)?;
        ui::log(&format!(
            "{} exited build container(s), {} build image(s)",
            containers.len(),
            images.len()
        ));
        if self.options.dry_run || (containers.is_empty() && images.is_empty()) {
            return Ok(());
        }

        // Containers first, they keep their image in use
        let removed = docker.remove_containers(&self.shell, containers)?;
        ui::result(&format!("{} container(s) removed", removed));
        let removed = docker.remove_images(&self.shell, images)?;
        ui::result(&format!("{} image(s) removed", removed));
        Ok(())
    }

    fn build_and_install(&self, package: Package) -> Result<()> {
        let backend = self.config.jail.backend(&self.config.jails);
        let env = JailEnv {
            shell: Shell::new(self.shell.runner, self.shell.prompter),
            catalog: &self.catalog,
            pm: self.pm,
            git_url: self.config.aur.git_url.clone(),
            workdir_prefix: self.config.jails.workdir_prefix.clone(),
            package_cache: self.config.cache.package_dir.clone(),
            origin: self.origin.clone(),
            options: self.options,
        };
        let mut jail = Jail::new(&env, backend.as_ref(), package);

        let built = jail.build()?;
        if built.is_empty() {
            return Ok(());
        }

        ui::log("Built packages:");
        let files: Vec<String> = built
            .iter()
            .filter_map(|p| p.file_name())
            .map(|f| f.to_string_lossy().into_owned())
            .collect();
        ui::result(&files.join("  "));

        let answer = self
            .shell
            .prompter
            .confirm("Do you want to install them?", "[y/N/q]")?;
        if answer.accepted()? {
            jail.install()
        } else {
            ui::result(&format!("{} was not installed", jail.target().name()));
            Ok(())
        }
    }
}

fn or_dashes(value: Option<String>) -> String {
    value.filter(|v| !v.is_empty()).unwrap_or_else(|| "--".to_string())
}

fn join_or_dashes(values: &[String]) -> String {
    if values.is_empty() {
        "--".to_string()
    } else {
        values.join(" ")
    }
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|utc| {
            utc.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "--".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_user_quit;
    use crate::test_utils::{info, info_with_deps, FakePackageManager, FakeRegistry, FakeRunner, ScriptedPrompter};
    use std::cmp::Ordering;
    use tempfile::TempDir;

    struct Fixture {
        runner: FakeRunner,
        registry: FakeRegistry,
        pm: FakePackageManager,
        config: Config,
        origin: TempDir,
        _dirs: Vec<TempDir>,
    }

    impl Fixture {
        fn new() -> Self {
            let runner = FakeRunner::new();
            runner.set_root(true);
            runner.set_products(&["{base}-1.0-1-any.pkg.tar.zst"]);
            let cache = TempDir::new().unwrap();
            let chroot = TempDir::new().unwrap();

            let mut config = Config::default();
            config.jail = JailKind::Chroot;
            config.jails.chroot_dir = chroot.path().to_path_buf();
            config.cache.package_dir = cache.path().to_path_buf();
            config.aur.git_url = "https://aur.example".to_string();

            Self {
                runner,
                registry: FakeRegistry::new(),
                pm: FakePackageManager::new(),
                config,
                origin: TempDir::new().unwrap(),
                _dirs: vec![cache, chroot],
            }
        }

        fn orchestrator<'a>(&'a self, prompter: &'a ScriptedPrompter) -> Orchestrator<'a> {
            Orchestrator::new(
                &self.config,
                Shell::new(&self.runner, prompter),
                &self.registry,
                &self.pm,
                JailOptions::default(),
                self.origin.path().to_path_buf(),
            )
        }
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("", 3), Selection::All);
        assert_eq!(parse_selection("A", 3), Selection::All);
        assert_eq!(parse_selection("n", 3), Selection::Nothing);
        assert_eq!(parse_selection("q", 3), Selection::Quit);
        assert_eq!(parse_selection("3 1", 3), Selection::Indices(vec![0, 2]));
        assert_eq!(parse_selection("2,2, 9 x", 3), Selection::Indices(vec![1]));
        assert_eq!(parse_selection("0 7", 3), Selection::Nothing);
    }

    #[test]
    fn test_search_hides_devel_packages() {
        let mut fx = Fixture::new();
        fx.registry.add(info("neovim-git", "neovim-git", "r1-1"));
        fx.registry.add(info("neovim-qt", "neovim-qt", "1.0-1"));
        let prompter = ScriptedPrompter::new(&[]);

        let terms = vec!["neovim".to_string()];
        let found = fx.orchestrator(&prompter).search_results(&terms).unwrap();
        assert_eq!(found.iter().map(Package::name).collect::<Vec<_>>(), vec!["neovim-qt"]);

        fx.config.with_devel = true;
        assert_eq!(fx.orchestrator(&prompter).search_results(&terms).unwrap().len(), 2);
    }

    #[test]
    fn test_headline_badges() {
        let fx = Fixture::new();
        let mut outdated = info("yay", "yay", "12.1-1");
        outdated.out_of_date = Some(1_700_000_000);
        fx.registry.add(outdated);
        fx.pm.install("yay", "12.0-1");
        let prompter = ScriptedPrompter::new(&[]);
        let orchestrator = fx.orchestrator(&prompter);

        let mut yay = orchestrator.catalog.details("yay").unwrap().unwrap();
        let line = console::strip_ansi_codes(&orchestrator.headline(&mut yay).unwrap()).to_string();
        assert_eq!(line, "aur/yay 12.1-1 [installed: 12.0-1] [out of date]");
    }

    #[test]
    fn test_info_fields() {
        let fx = Fixture::new();
        fx.registry.add(info_with_deps("app", "app", &["go"], &["glibc>=2.38"]));
        let prompter = ScriptedPrompter::new(&[]);
        let orchestrator = fx.orchestrator(&prompter);

        let app = orchestrator.catalog.details("app").unwrap().unwrap();
        let fields = orchestrator.info_fields(&app);
        let value = |label: &str| {
            let (_, value) = fields.iter().find(|(l, _)| *l == label).unwrap();
            console::strip_ansi_codes(value).to_string()
        };
        assert_eq!(value("Name"), "app");
        assert_eq!(value("Description"), "--");
        assert_eq!(value("Depends"), "glibc>=2.38");
        assert_eq!(value("MakeDepends"), "go");
        assert_eq!(value("OutOfDate"), "No");
        assert_eq!(value("AUR page"), "https://aur.archlinux.org/packages/app");
        assert_eq!(fields.len(), 16);
    }

    #[test]
    fn test_upgrade_candidates() {
        let fx = Fixture::new();
        fx.registry.add(info("old", "old", "2.0-1"));
        fx.registry.add(info("current", "current", "1.0-1"));
        fx.registry.add(info("tool-git", "tool-git", "r5-1"));
        fx.pm.install_foreign("old", "1.0-1");
        fx.pm.install_foreign("current", "1.0-1");
        fx.pm.install_foreign("tool-git", "r1-1");
        fx.pm.install_foreign("gone", "1.0-1");
        fx.pm.set_vercmp("1.0-1", "2.0-1", Ordering::Less);
        let prompter = ScriptedPrompter::new(&[]);

        let candidates = fx.orchestrator(&prompter).upgrade_candidates().unwrap();
        assert_eq!(candidates.iter().map(Package::name).collect::<Vec<_>>(), vec!["old"]);
    }

    #[test]
    fn test_install_builds_then_installs() {
        let fx = Fixture::new();
        fx.registry.add(info("foo", "foo", "1.0-1"));
        let prompter = ScriptedPrompter::new(&["y", "y"]);

        fx.orchestrator(&prompter)
            .install(&["foo".to_string(), "missing".to_string()])
            .unwrap();

        let artifact = fx.origin.path().join("foo-1.0-1-any.pkg.tar.zst");
        assert_eq!(fx.runner.count(&format!("pacman -U {}", artifact.display())), 1);
        assert!(!artifact.exists());
        assert_eq!(
            prompter.questions(),
            vec!["Do you want to build foo in the chroot jail?", "Do you want to install them?"]
        );
    }

    #[test]
    fn test_declined_install_keeps_artifacts() {
        let fx = Fixture::new();
        fx.registry.add(info("foo", "foo", "1.0-1"));
        let prompter = ScriptedPrompter::new(&["y", "n"]);

        fx.orchestrator(&prompter).install(&["foo".to_string()]).unwrap();

        assert_eq!(fx.runner.count("pacman -U"), 0);
        assert!(fx.origin.path().join("foo-1.0-1-any.pkg.tar.zst").is_file());
    }

    #[test]
    fn test_quit_at_install_prompt() {
        let fx = Fixture::new();
        fx.registry.add(info("foo", "foo", "1.0-1"));
        fx.registry.add(info("bar", "bar", "1.0-1"));
        let prompter = ScriptedPrompter::new(&["y", "q"]);

        let err = fx
            .orchestrator(&prompter)
            .install(&["foo".to_string(), "bar".to_string()])
            .unwrap_err();
        assert!(is_user_quit(&err));
        assert_eq!(fx.runner.count("git clone"), 1);
    }

    #[test]
    fn test_upgrade_selected_subset() {
        let fx = Fixture::new();
        for name in ["one", "two", "three"] {
            fx.registry.add(info(name, name, "2.0-1"));
            fx.pm.install_foreign(name, "1.0-1");
        }
        fx.pm.set_vercmp("1.0-1", "2.0-1", Ordering::Less);
        let prompter = ScriptedPrompter::new(&["2", "y", "y"]);

        fx.orchestrator(&prompter).upgrade().unwrap();

        let clones = fx.runner.matching("git clone");
        assert_eq!(clones.len(), 1);
        assert!(clones[0].starts_with("git clone https://aur.example/two.git"));
    }

    #[test]
    fn test_upgrade_quit() {
        let fx = Fixture::new();
        fx.registry.add(info("one", "one", "2.0-1"));
        fx.pm.install_foreign("one", "1.0-1");
        fx.pm.set_vercmp("1.0-1", "2.0-1", Ordering::Less);
        let prompter = ScriptedPrompter::new(&["q"]);

        assert!(is_user_quit(&fx.orchestrator(&prompter).upgrade().unwrap_err()));
        assert_eq!(fx.runner.count("git clone"), 0);
    }

    #[test]
    fn test_prune_docker_leftovers() {
        let mut fx = Fixture::new();
        fx.config.jail = JailKind::Docker;
        fx.runner.respond(
            "docker container ls --all --filter ancestor=packaging --filter status=exited --quiet",
            0,
            "c1\n",
        );
        fx.runner.respond("docker image ls packaging --quiet", 0, "i1\n");
        let prompter = ScriptedPrompter::new(&[]);

        fx.orchestrator(&prompter).prune().unwrap();

        let removals = fx.runner.matching(" rm ");
        assert_eq!(removals, vec!["docker container rm c1", "docker image rm i1"]);
    }

    #[test]
    fn test_prune_with_chroot_does_nothing() {
        let fx = Fixture::new();
        let prompter = ScriptedPrompter::new(&[]);
        fx.orchestrator(&prompter).prune().unwrap();
        assert!(fx.runner.history().is_empty());
    }
}
