/*
 * resolve-builder - Build orchestration for the DaVinci Resolve Flatpak.
 * Copyright (C) 2025  resolve-builder contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 */

//! Desktop integration: `.desktop` entries and hicolor icons.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::layout::{copy_file, copy_tree, SandboxLayout};
use crate::channel::ReleaseChannel;
use crate::error::{BuilderResult, InstallContext};

/// Where an optional component is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    /// Directory in the extracted installer, copied into the sandbox
    Extracted(&'static str),
    /// Path that must already exist in the sandbox
    Installed(&'static str),
}

/// An auxiliary application with its own launcher entry
#[derive(Debug, Clone, Copy)]
struct Component {
    suffix: &'static str,
    display_name: &'static str,
    exec: &'static str,
    presence: Presence,
    icon: &'static str,
    icon_size: u32,
}

const COMPONENTS: &[Component] = &[
    Component {
        suffix: "RAWPlayer",
        display_name: "Blackmagic RAW Player",
        exec: "BlackmagicRAWPlayer/BlackmagicRAWPlayer",
        presence: Presence::Extracted("BlackmagicRAWPlayer"),
        icon: "graphics/blackmagicraw-player_256x256_apps.png",
        icon_size: 256,
    },
    Component {
        suffix: "RAWSpeedTest",
        display_name: "Blackmagic RAW Speed Test",
        exec: "BlackmagicRAWSpeedTest/BlackmagicRAWSpeedTest",
        presence: Presence::Extracted("BlackmagicRAWSpeedTest"),
        icon: "graphics/blackmagicraw-speedtest_256x256_apps.png",
        icon_size: 256,
    },
    Component {
        suffix: "PanelSetup",
        display_name: "DaVinci Control Panels Setup",
        exec: "DaVinci Control Panels Setup/DaVinci Control Panels Setup",
        presence: Presence::Installed("DaVinci Control Panels Setup/DaVinci Control Panels Setup"),
        icon: "graphics/DV_Panels.png",
        icon_size: 128,
    },
    Component {
        suffix: "RemoteMonitoring",
        display_name: "DaVinci Remote Monitoring",
        exec: "bin/DaVinci Remote Monitoring",
        presence: Presence::Installed("bin/DaVinci Remote Monitoring"),
        icon: "graphics/Remote_Monitoring.png",
        icon_size: 128,
    },
];

/// Installs launcher entries for one channel's application id
pub struct DesktopIntegrator<'a> {
    channel: ReleaseChannel,
    templates: PathBuf,
    layout: &'a SandboxLayout,
}

impl<'a> DesktopIntegrator<'a> {
    pub fn new(channel: ReleaseChannel, templates: PathBuf, layout: &'a SandboxLayout) -> Self {
        Self {
            channel,
            templates,
            layout,
        }
    }

    /// Main entry plus every optional component present in `extracted`.
    ///
    /// Returns the installed `.desktop` file names.
    pub fn install_all(&self, extracted: &Path) -> BuilderResult<Vec<String>> {
        let mut installed = Vec::new();

        for component in COMPONENTS {
            let present = match component.presence {
                Presence::Extracted(dir) => {
                    let src = extracted.join(dir);
                    if src.exists() {
                        info!("installing {}", component.display_name);
                        copy_tree(&src, &self.layout.root().join(dir))?;
                        true
                    } else {
                        false
                    }
                }
                Presence::Installed(path) => self.layout.root().join(path).exists(),
            };
            if !present {
                continue;
            }

            let name = format!("{}.{}", self.channel.app_id(), component.suffix);
            self.install_entry(
                &self.channel.component_desktop_template(component.suffix),
                &name,
                component.display_name,
                &self.layout.root().join(component.exec),
            )?;
            self.install_icon(extracted, component.icon, component.icon_size, &name)?;
            installed.push(format!("{}.desktop", name));
        }

        let main = self.channel.app_id().to_string();
        self.install_entry(
            &self.channel.desktop_template(),
            &main,
            &self.channel.app_name(),
            &self.layout.bin_dir().join("resolve"),
        )?;
        self.install_icon(extracted, "graphics/DV_Resolve.png", 128, &main)?;
        installed.push(format!("{}.desktop", main));

        Ok(installed)
    }

    /// Copy a template into `share/applications`, generating one when absent
    fn install_entry(&self, template: &str, name: &str, display_name: &str, exec: &Path) -> BuilderResult<()> {
        let src = self.templates.join(template);
        let dst = self.layout.applications_dir().join(format!("{}.desktop", name));

        if src.is_file() {
            copy_file(&src, &dst)?;
        } else {
            warn!(template = %src.display(), "desktop template missing, generating a default entry");
            let content = default_entry(display_name, exec, name);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).at_path(parent)?;
            }
            fs::write(&dst, content).at_path(&dst)?;
        }
        info!("installed {}.desktop", name);
        Ok(())
    }

    fn install_icon(&self, extracted: &Path, icon: &str, size: u32, name: &str) -> BuilderResult<()> {
        let src = extracted.join(icon);
        if !src.is_file() {
            return Ok(());
        }
        copy_file(&src, &self.layout.icon_dir(size).join(format!("{}.png", name)))
    }
}

fn default_entry(display_name: &str, exec: &Path, icon: &str) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name={}\n\
         Exec=\"{}\" %u\n\
         Icon={}\n\
         Terminal=false\n\
         Categories=AudioVideo;Video;AudioVideoEditing;\n",
        display_name,
        exec.display(),
        icon
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn extracted_tree(root: &Path) {
        fs::create_dir_all(root.join("graphics")).unwrap();
        fs::write(root.join("graphics/DV_Resolve.png"), b"png").unwrap();
        fs::create_dir_all(root.join("BlackmagicRAWPlayer")).unwrap();
        fs::write(root.join("BlackmagicRAWPlayer/BlackmagicRAWPlayer"), b"elf").unwrap();
        fs::write(root.join("graphics/blackmagicraw-player_256x256_apps.png"), b"png").unwrap();
    }

    #[test]
    fn test_install_all_with_templates_and_defaults() {
        let dir = tempdir().unwrap();
        let extracted = dir.path().join("squashfs-root");
        extracted_tree(&extracted);

        let templates = dir.path().join("desktop");
        fs::create_dir_all(&templates).unwrap();
        fs::write(
            templates.join("com.blackmagic.Resolve.desktop"),
            "[Desktop Entry]\nName=DaVinci Resolve\nExec=resolve.sh\n",
        )
        .unwrap();

        let layout = SandboxLayout::new(dir.path().join("app"));
        layout.create_skeleton().unwrap();
        let integrator = DesktopIntegrator::new(ReleaseChannel::Stable, templates, &layout);
        let installed = integrator.install_all(&extracted).unwrap();

        assert_eq!(
            installed,
            vec![
                "com.blackmagic.Resolve.RAWPlayer.desktop".to_string(),
                "com.blackmagic.Resolve.desktop".to_string(),
            ]
        );

        let main = fs::read_to_string(layout.applications_dir().join("com.blackmagic.Resolve.desktop")).unwrap();
        assert!(main.contains("Exec=resolve.sh"));

        let player = fs::read_to_string(
            layout.applications_dir().join("com.blackmagic.Resolve.RAWPlayer.desktop"),
        )
        .unwrap();
        assert!(player.contains("Name=Blackmagic RAW Player"));
        assert!(player.contains("Icon=com.blackmagic.Resolve.RAWPlayer"));

        assert!(layout.icon_dir(128).join("com.blackmagic.Resolve.png").is_file());
        assert!(layout.icon_dir(256).join("com.blackmagic.Resolve.RAWPlayer.png").is_file());
        assert!(layout.root().join("BlackmagicRAWPlayer/BlackmagicRAWPlayer").is_file());
    }

    #[test]
    fn test_installed_presence_for_beta() {
        let dir = tempdir().unwrap();
        let extracted = dir.path().join("squashfs-root");
        fs::create_dir_all(&extracted).unwrap();

        let layout = SandboxLayout::new(dir.path().join("app"));
        layout.create_skeleton().unwrap();
        fs::create_dir_all(layout.bin_dir()).unwrap();
        fs::write(layout.bin_dir().join("DaVinci Remote Monitoring"), b"elf").unwrap();

        let integrator = DesktopIntegrator::new(ReleaseChannel::Beta, dir.path().join("none"), &layout);
        let installed = integrator.install_all(&extracted).unwrap();
        assert_eq!(
            installed,
            vec![
                "com.blackmagic.Resolve.Beta.RemoteMonitoring.desktop".to_string(),
                "com.blackmagic.Resolve.Beta.desktop".to_string(),
            ]
        );
    }
}
