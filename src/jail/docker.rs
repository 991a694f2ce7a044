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

//! Docker backend.
//!
//! The build image carries an unprivileged `package` user allowed to run
//! pacman. Each build mounts the recipe checkout and runs a generated
//! `roadmap.sh` as the container entrypoint.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{BuildBackend, BuildContext, JailKind};
use crate::config::JailConfig;
use crate::exec::{Cmd, Shell};
use crate::ui;

/// Script run inside the container
const ROADMAP: &str = "roadmap.sh";

/// Optional user script spliced into the roadmap
const USER_ROADMAP: &str = "my.roadmap.sh";

/// Mount point of the recipe checkout inside the container
const CONTAINER_PKG_DIR: &str = "/home/package/pkg";

pub struct DockerJail {
    image: String,
    base_image: String,
    mirrorlist: PathBuf,
    nofile_limit: u32,
}

impl DockerJail {
    pub fn from_config(config: &JailConfig) -> Self {
        Self {
            image: config.image.clone(),
            base_image: config.base_image.clone(),
            mirrorlist: config.mirrorlist.clone(),
            nofile_limit: config.nofile_limit,
        }
    }

    pub fn dockerfile(&self) -> String {
        format!(
            r#"FROM {base}

RUN useradd -m -d /home/package -c 'Package Creation User' -s /usr/bin/bash -g users package && \
    mkdir -p /run/user/1000 && chown package:users /run/user/1000 && \
    echo 'package ALL=(ALL) NOPASSWD: /usr/bin/pacman' >> /etc/sudoers && \
    sed -i 's/^#IgnorePkg *= *$/IgnorePkg = pacman-mirrorlist/' /etc/pacman.conf

COPY mirrorlist /etc/pacman.d/mirrorlist

RUN pacman -Syy && pacman -S --noconfirm archlinux-keyring && \
    pacman -S --noconfirm devtools

# Changes once a day, invalidating the layers below
ARG CACHE_DATE="-"
RUN pacman -Syu --noconfirm && pacman -Scc

RUN sed -i 's/^OPTIONS=(strip docs !libtool !staticlibs emptydirs zipman purge debug lto)$/OPTIONS=(strip docs !libtool !staticlibs !emptydirs zipman purge !debug lto)/' /etc/makepkg.conf

USER package
WORKDIR {pkg_dir}

ENTRYPOINT ["./{roadmap}"]
"#,
            base = self.base_image,
            pkg_dir = CONTAINER_PKG_DIR,
            roadmap = ROADMAP,
        )
    }

    fn image_build_command(&self, today: &str) -> Cmd {
        Cmd::new("docker").args([
            "build".to_string(),
            "-t".into(),
            self.image.clone(),
            "--build-arg".into(),
            format!("CACHE_DATE={}", today),
            ".".into(),
        ])
    }

    fn run_command(&self, workdir: &Path) -> Cmd {
        Cmd::new("docker").args([
            "run".to_string(),
            "--rm".into(),
            "--name".into(),
            self.image.clone(),
            "--ulimit".into(),
            format!("nofile={}", self.nofile_limit),
            "--mount".into(),
            format!(
                "type=bind,source={},destination={}",
                workdir.display(),
                CONTAINER_PKG_DIR
            ),
            self.image.clone(),
        ])
    }

    /// Content of `roadmap.sh` for this build.
    ///
    /// Updates the container, runs the user script, installs the
    /// dependencies built earlier, then hands over to makepkg. Sources were
    /// already verified on the host.
    pub fn roadmap(&self, ctx: &BuildContext<'_>) -> Result<Vec<String>> {
        let mut lines = vec![
            "#!/usr/bin/env sh".to_string(),
            "set -e".to_string(),
            "sudo pacman -Syu --noconfirm".to_string(),
        ];

        let user_script = ctx.workdir.join(USER_ROADMAP);
        if user_script.is_file() {
            let content = fs::read_to_string(&user_script)
                .with_context(|| format!("Failed to read {}", user_script.display()))?;
            lines.extend(content.lines().map(String::from));
        }

        for dependency in ctx.dependencies {
            let Some(file) = dependency.file_name() else {
                continue;
            };
            let install = format!(
                "sudo pacman -U --asdeps --noconfirm {}",
                file.to_string_lossy()
            );
            if !lines.contains(&install) {
                lines.push(install);
            }
        }

        lines.push("exec makepkg -s --noconfirm --skipinteg".to_string());
        Ok(lines)
    }

    fn containers_command(&self) -> Cmd {
        Cmd::new("docker").args([
            "container".to_string(),
            "ls".into(),
            "--all".into(),
            "--filter".into(),
            format!("ancestor={}", self.image),
            "--filter".into(),
            "status=exited".into(),
            "--quiet".into(),
        ])
    }

    fn images_command(&self) -> Cmd {
        Cmd::new("docker").args(["image".to_string(), "ls".into(), self.image.clone(), "--quiet".into()])
    }

    fn list(&self, shell: &Shell<'_>, cmd: Cmd) -> Result<Vec<String>> {
        let cmd = shell.elevate(cmd)?;
        Ok(shell.runner.capture(&cmd, None)?.lines())
    }

    /// Exited build containers
    pub fn containers(&self, shell: &Shell<'_>) -> Result<Vec<String>> {
        self.list(shell, self.containers_command())
    }

    /// Build image ids
    pub fn images(&self, shell: &Shell<'_>) -> Result<Vec<String>> {
        self.list(shell, self.images_command())
    }

    pub fn remove_containers(&self, shell: &Shell<'_>, ids: Vec<String>) -> Result<usize> {
        self.remove(shell, "container", ids)
    }

    pub fn remove_images(&self, shell: &Shell<'_>, ids: Vec<String>) -> Result<usize> {
        self.remove(shell, "image", ids)
    }

    fn remove(&self, shell: &Shell<'_>, what: &str, ids: Vec<String>) -> Result<usize> {
        let count = ids.len();
        if count == 0 {
            return Ok(0);
        }
        let cmd = shell.elevate(Cmd::new("docker").args([what, "rm"]).args(ids))?;
        shell.run_checked(&cmd, None)?;
        Ok(count)
    }
}

impl BuildBackend for DockerJail {
    fn kind(&self) -> JailKind {
        JailKind::Docker
    }

    fn required_tool(&self) -> (&'static str, &'static str) {
        ("docker", "docker")
    }

    /// Build (or refresh) the image in a scratch context directory
    fn prepare(&self, shell: &Shell<'_>) -> Result<()> {
        let context = tempfile::Builder::new()
            .prefix("aurjail_image_")
            .tempdir()
            .context("Failed to create the image build context")?;
        fs::write(context.path().join("Dockerfile"), self.dockerfile())
            .context("Failed to write Dockerfile")?;
        fs::copy(&self.mirrorlist, context.path().join("mirrorlist"))
            .with_context(|| format!("Failed to copy {}", self.mirrorlist.display()))?;

        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        ui::log(&format!("Building the {} image", self.image));
        let cmd = shell.elevate(self.image_build_command(&today))?;
        shell.run_checked(&cmd, Some(context.path()))
    }

    fn build(&self, shell: &Shell<'_>, ctx: &BuildContext<'_>) -> Result<()> {
        for dependency in ctx.dependencies {
            let Some(file) = dependency.file_name() else {
                continue;
            };
            fs::copy(dependency, ctx.workdir.join(file))
                .with_context(|| format!("Failed to copy {}", dependency.display()))?;
        }

        let script = ctx.workdir.join(ROADMAP);
        fs::write(&script, self.roadmap(ctx)?.join("\n"))
            .with_context(|| format!("Failed to write {}", script.display()))?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

        tracing::info!(package = ctx.package.name(), image = %self.image, "starting build container");
        let cmd = shell.elevate(self.run_command(ctx.workdir))?;
        shell.run_checked(&cmd, None)
    }

    fn plan(&self, shell: &Shell<'_>, ctx: &BuildContext<'_>) -> Result<Vec<String>> {
        let sudo = if shell.runner.is_root() { "" } else { "sudo " };
        let mut lines = vec![
            format!("build the {} image from {}", self.image, self.base_image),
            format!("{} >>>>", ROADMAP),
        ];
        lines.extend(self.roadmap(ctx)?);
        lines.push("<<<<".to_string());
        lines.push(format!("{}{}", sudo, self.run_command(ctx.workdir)));
        Ok(lines)
    }
}
