/*
 * resolve-builder - Build orchestration for the DaVinci Resolve Flatpak.
 * Copyright (C) 2025  resolve-builder contributors
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

//! Sandbox installation.
//!
//! Unpacks the vendor installer into a scratch directory and relocates the
//! parts the application needs at runtime into the sandbox prefix. Installer
//! only components (uninstaller, installer UI) are never copied.

mod desktop;
pub mod extract;
pub mod layout;

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, info, warn};

use crate::channel::ReleaseChannel;
use crate::downloader::{ArtifactOrigin, DownloadedArtifact};
use crate::error::{BuilderError, BuilderResult, InstallContext};
use desktop::DesktopIntegrator;
use extract::{detect_payload, extract_zip, find_installer, make_executable, PayloadKind, PayloadUnpacker};
use layout::{copy_file, copy_tree, ensure_symlink, fix_permissions, mark_executables, SandboxLayout};

const CORE_DIRS: &[&str] = &[
    "bin",
    "Control",
    "Certificates",
    "DaVinci Control Panels Setup",
    "Developer",
    "docs",
    "Fairlight Studio Utility",
    "Fusion",
    "graphics",
];

const RESOURCE_DIRS: &[&str] = &["LUT", "Onboarding", "plugins", "Technical Documentation", "UI_Resource"];

const SCRIPTS: &[&str] = &["script.checkfirmware", "script.getlogs.v4", "script.start"];

/// Files under `share/`; the last one only ships with some releases
const SHARE_FILES: &[&str] = &[
    "default-config.dat",
    "default_cm_config.bin",
    "log-conf.xml",
    "remote-monitoring-log-conf.xml",
];

/// Bundled libraries that clash with the runtime's GLib
const CONFLICTING_LIBS: &[&str] = &["libglib", "libgio", "libgmodule", "libgobject"];

const PANEL_ARCHIVE: &str = "share/panels/dvpanel-framework-linux-x86_64.tgz";
const PANEL_LIBS: &[&str] = &["libDaVinciPanelAPI.so", "libFairlightPanelAPI.so"];

/// Paths the extracted payload must contain before anything is copied
const EXPECTED_PAYLOAD: &[&str] = &["bin/resolve", "libs"];

/// Installs a downloaded artifact into the sandbox layout
pub struct SandboxInstaller {
    channel: ReleaseChannel,
    work_dir: PathBuf,
    desktop_templates: PathBuf,
    unpacker: Box<dyn PayloadUnpacker>,
}

impl SandboxInstaller {
    pub fn new(
        channel: ReleaseChannel,
        work_dir: PathBuf,
        desktop_templates: PathBuf,
        unpacker: Box<dyn PayloadUnpacker>,
    ) -> Self {
        Self {
            channel,
            work_dir,
            desktop_templates,
            unpacker,
        }
    }

    /// Install `artifact` into `target`, replacing whatever was there.
    ///
    /// A downloaded artifact is consumed: it is deleted once the install
    /// finishes, whether it succeeded or not.
    pub fn install(&self, artifact: &DownloadedArtifact, target: &Path) -> BuilderResult<SandboxLayout> {
        let result = self.install_inner(artifact, target);

        if artifact.origin == ArtifactOrigin::Downloaded {
            match fs::remove_file(&artifact.local_path) {
                Ok(()) => debug!(path = %artifact.local_path.display(), "removed consumed artifact"),
                Err(e) => warn!("could not remove artifact {}: {}", artifact.local_path.display(), e),
            }
        }

        result
    }

    fn install_inner(&self, artifact: &DownloadedArtifact, target: &Path) -> BuilderResult<SandboxLayout> {
        fs::create_dir_all(&self.work_dir).at_path(&self.work_dir)?;
        // Dropped on every return path, taking the extracted tree with it
        let scratch = tempfile::Builder::new()
            .prefix("resolve-extract-")
            .tempdir_in(&self.work_dir)
            .at_path(&self.work_dir)?;

        let extracted = self.unpack_payload(&artifact.local_path, scratch.path())?;
        check_payload(&extracted)?;
        fix_permissions(&extracted)?;

        let layout = SandboxLayout::new(target);
        info!(target = %target.display(), "installing into sandbox");
        layout.clear()?;
        layout.create_skeleton()?;

        self.copy_payload(&extracted, &layout)?;
        extract_panel_libraries(&extracted, &layout)?;
        link_raw_api(&layout)?;

        let entries = DesktopIntegrator::new(self.channel, self.desktop_templates.clone(), &layout)
            .install_all(&extracted)?;
        debug!(entries = entries.len(), "desktop entries installed");

        let marked = mark_executables(&layout.bin_dir())?;
        debug!(count = marked, "marked binaries executable");

        layout.verify()?;
        info!(app_id = self.channel.app_id(), "sandbox install complete");
        Ok(layout)
    }

    /// Turn the artifact into an extracted directory tree under `scratch`
    fn unpack_payload(&self, artifact: &Path, scratch: &Path) -> BuilderResult<PathBuf> {
        let installer = match detect_payload(artifact)? {
            PayloadKind::Zip { offset } => {
                debug!(offset, "artifact is a zip payload");
                let wrapper = scratch.join("wrapper");
                extract_zip(artifact, &wrapper)?;
                find_installer(&wrapper)?
            }
            PayloadKind::AppImage => {
                debug!("artifact is a bare installer");
                let copy = scratch.join(
                    artifact
                        .file_name()
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from("installer.run")),
                );
                fs::copy(artifact, &copy).at_path(&copy)?;
                copy
            }
        };
        make_executable(&installer)?;
        self.unpacker.unpack(&installer, scratch)
    }

    fn copy_payload(&self, extracted: &Path, layout: &SandboxLayout) -> BuilderResult<()> {
        let root = layout.root();

        for dir in CORE_DIRS {
            if copy_tree(&extracted.join(dir), &root.join(dir))? {
                debug!("copied {}", dir);
            }
        }

        let removed = remove_conflicting_libs(&extracted.join("libs"))?;
        if removed > 0 {
            info!(count = removed, "removed conflicting GLib libraries");
        }
        copy_tree(&extracted.join("libs"), &layout.libs_dir())?;

        for dir in RESOURCE_DIRS {
            if copy_tree(&extracted.join(dir), &root.join(dir))? {
                debug!("copied {}", dir);
            }
        }

        for script in SCRIPTS {
            let src = extracted.join("scripts").join(script);
            if src.is_file() {
                copy_file(&src, &root.join("scripts").join(script))?;
            }
        }

        for name in SHARE_FILES {
            let src = extracted.join("share").join(name);
            if src.is_file() {
                copy_file(&src, &root.join("share").join(name))?;
            }
        }
        Ok(())
    }
}

/// Schema drift check on the extracted installer
fn check_payload(extracted: &Path) -> BuilderResult<()> {
    for expected in EXPECTED_PAYLOAD {
        if !extracted.join(expected).exists() {
            return Err(BuilderError::install(format!(
                "installer layout changed: '{}' not found in the payload",
                expected
            )));
        }
    }
    Ok(())
}

/// Delete `libglib*`, `libgio*`, `libgmodule*` and `libgobject*` from `libs`
fn remove_conflicting_libs(libs: &Path) -> BuilderResult<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(libs).at_path(libs)? {
        let entry = entry.at_path(libs)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if CONFLICTING_LIBS.iter().any(|prefix| name.starts_with(prefix)) {
            let path = entry.path();
            if path.is_dir() && !path.is_symlink() {
                fs::remove_dir_all(&path).at_path(&path)?;
            } else {
                fs::remove_file(&path).at_path(&path)?;
            }
            debug!("removed {}", name);
            removed += 1;
        }
    }
    Ok(removed)
}

/// Pull the control panel libraries out of the bundled framework tarball
fn extract_panel_libraries(extracted: &Path, layout: &SandboxLayout) -> BuilderResult<usize> {
    let archive_path = extracted.join(PANEL_ARCHIVE);
    if !archive_path.is_file() {
        return Ok(0);
    }

    let file = File::open(&archive_path).at_path(&archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|e| BuilderError::install_with("cannot read panel framework archive", e))?;

    let mut count = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| BuilderError::install_with("corrupt panel framework archive", e))?;
        let name = match entry.path().ok().and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned())) {
            Some(name) => name,
            None => continue,
        };
        if !PANEL_LIBS.contains(&name.as_str()) {
            continue;
        }
        let dest = layout.libs_dir().join(&name);
        entry.unpack(&dest).at_path(&dest)?;
        info!("extracted {}", name);
        count += 1;
    }
    Ok(count)
}

/// Resolve looks for the RAW SDK next to its binaries
fn link_raw_api(layout: &SandboxLayout) -> BuilderResult<()> {
    let nested = layout.bin_dir().join("BlackmagicRawAPI");
    fs::create_dir_all(&nested).at_path(&nested)?;
    ensure_symlink(
        Path::new("../libs/libBlackmagicRawAPI.so"),
        &layout.bin_dir().join("libBlackmagicRawAPI.so"),
    )?;
    ensure_symlink(
        Path::new("../../libs/libBlackmagicRawAPI.so"),
        &nested.join("libBlackmagicRawAPI.so"),
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::extract::PayloadUnpacker;
    use crate::error::BuilderResult;
    use std::fs;
    use std::path::{Path, PathBuf};

    /// Builds a small resolve tree instead of running the installer
    pub struct FakeUnpacker {
        pub marker: &'static str,
        pub with_resolve: bool,
    }

    impl FakeUnpacker {
        pub fn new(marker: &'static str) -> Self {
            Self {
                marker,
                with_resolve: true,
            }
        }
    }

    impl PayloadUnpacker for FakeUnpacker {
        fn unpack(&self, installer: &Path, scratch: &Path) -> BuilderResult<PathBuf> {
            assert!(installer.is_file());
            let root = scratch.join("squashfs-root");
            fs::create_dir_all(root.join("bin")).unwrap();
            fs::create_dir_all(root.join("libs")).unwrap();
            fs::create_dir_all(root.join("graphics")).unwrap();
            fs::create_dir_all(root.join("scripts")).unwrap();
            fs::create_dir_all(root.join("share")).unwrap();
            fs::create_dir_all(root.join("installer")).unwrap();
            if self.with_resolve {
                fs::write(root.join("bin/resolve"), b"\x7fELF resolve").unwrap();
            }
            fs::write(root.join("bin").join(self.marker), b"marker").unwrap();
            fs::write(root.join("libs/libavcodec.so.60"), b"lib").unwrap();
            fs::write(root.join("libs/libglib-2.0.so.0"), b"glib").unwrap();
            fs::write(root.join("libs/libgobject-2.0.so.0"), b"gobject").unwrap();
            fs::write(root.join("graphics/DV_Resolve.png"), b"png").unwrap();
            fs::write(root.join("scripts/script.start"), b"#!/bin/sh\n").unwrap();
            fs::write(root.join("share/log-conf.xml"), b"<conf/>").unwrap();
            fs::write(root.join("installer/uninstall"), b"ui").unwrap();
            Ok(root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::extract::fixtures::write_zip;
    use super::testing::FakeUnpacker;
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use tempfile::tempdir;

    fn zip_artifact(dir: &Path, name: &str) -> DownloadedArtifact {
        let path = dir.join(name);
        write_zip(&path, b"", &[("DaVinci_Resolve_19.1_Linux.run", b"\x7fELF", 0o644)]);
        DownloadedArtifact {
            size_bytes: fs::metadata(&path).unwrap().len(),
            local_path: path,
            origin: ArtifactOrigin::Downloaded,
        }
    }

    fn installer(work: &Path, marker: &'static str) -> SandboxInstaller {
        SandboxInstaller::new(
            ReleaseChannel::Stable,
            work.to_path_buf(),
            work.join("desktop"),
            Box::new(FakeUnpacker::new(marker)),
        )
    }

    #[test]
    fn test_install_populates_layout() {
        let dir = tempdir().unwrap();
        let artifact = zip_artifact(dir.path(), "D1.zip");
        let target = dir.path().join("app");

        let layout = installer(dir.path(), "first").install(&artifact, &target).unwrap();

        assert!(layout.resolve_binary().is_file());
        assert!(layout.libs_dir().join("libavcodec.so.60").is_file());
        assert!(!layout.libs_dir().join("libglib-2.0.so.0").exists());
        assert!(!layout.libs_dir().join("libgobject-2.0.so.0").exists());
        assert!(target.join("scripts/script.start").is_file());
        assert!(target.join("share/log-conf.xml").is_file());
        assert!(!target.join("installer").exists());
        assert!(target.join("share/applications/com.blackmagic.Resolve.desktop").is_file());
        assert!(fs::symlink_metadata(target.join("bin/libBlackmagicRawAPI.so")).is_ok());
        assert_eq!(
            fs::read_link(target.join("bin/BlackmagicRawAPI/libBlackmagicRawAPI.so")).unwrap(),
            PathBuf::from("../../libs/libBlackmagicRawAPI.so")
        );

        // Consumed artifact and scratch space are gone
        assert!(!artifact.local_path.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("resolve-extract-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_second_install_overwrites_first() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("app");

        let first = zip_artifact(dir.path(), "A.zip");
        installer(dir.path(), "first").install(&first, &target).unwrap();
        fs::write(target.join("stray.txt"), b"left behind").unwrap();

        let second = zip_artifact(dir.path(), "B.zip");
        installer(dir.path(), "second").install(&second, &target).unwrap();

        assert!(target.join("bin/second").is_file());
        assert!(!target.join("bin/first").exists());
        assert!(!target.join("stray.txt").exists());
    }

    #[test]
    fn test_schema_drift_is_install_error() {
        let dir = tempdir().unwrap();
        let artifact = zip_artifact(dir.path(), "D1.zip");
        let mut unpacker = FakeUnpacker::new("x");
        unpacker.with_resolve = false;
        let installer = SandboxInstaller::new(
            ReleaseChannel::Stable,
            dir.path().to_path_buf(),
            dir.path().join("desktop"),
            Box::new(unpacker),
        );

        let err = installer.install(&artifact, &dir.path().join("app")).unwrap_err();
        assert!(matches!(err, BuilderError::Install { .. }));
        assert!(err.to_string().contains("bin/resolve"));
        assert!(!artifact.local_path.exists());
    }

    #[test]
    fn test_user_supplied_artifact_is_kept() {
        let dir = tempdir().unwrap();
        let mut artifact = zip_artifact(dir.path(), "local.zip");
        artifact.origin = ArtifactOrigin::UserSupplied;

        installer(dir.path(), "m").install(&artifact, &dir.path().join("app")).unwrap();
        assert!(artifact.local_path.exists());
    }

    #[test]
    fn test_unrecognized_artifact_is_install_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("D1.zip");
        fs::write(&path, b"<html>login required</html>").unwrap();
        let artifact = DownloadedArtifact {
            local_path: path,
            size_bytes: 27,
            origin: ArtifactOrigin::Downloaded,
        };

        let err = installer(dir.path(), "m").install(&artifact, &dir.path().join("app")).unwrap_err();
        assert!(matches!(err, BuilderError::Install { .. }));
    }

    #[test]
    fn test_extract_panel_libraries() {
        let dir = tempdir().unwrap();
        let extracted = dir.path().join("squashfs-root");
        let archive = extracted.join(PANEL_ARCHIVE);
        fs::create_dir_all(archive.parent().unwrap()).unwrap();

        let gz = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, data) in [
            ("libDaVinciPanelAPI.so", &b"panel"[..]),
            ("libFairlightPanelAPI.so", &b"fairlight"[..]),
            ("README", &b"ignored"[..]),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let layout = SandboxLayout::new(dir.path().join("app"));
        fs::create_dir_all(layout.libs_dir()).unwrap();
        assert_eq!(extract_panel_libraries(&extracted, &layout).unwrap(), 2);
        assert_eq!(fs::read(layout.libs_dir().join("libDaVinciPanelAPI.so")).unwrap(), b"panel");
        assert!(!layout.libs_dir().join("README").exists());
    }
}
