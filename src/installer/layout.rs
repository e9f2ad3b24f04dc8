/*
 * resolve-builder - Build orchestration for the DaVinci Resolve Flatpak.
 * Copyright (C) 2025  resolve-builder contributors
 */

//! Sandbox directory layout and the file operations that populate it.

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BuilderError, BuilderResult, InstallContext};

/// Paths the launcher script execs; they must exist after every install
pub const REQUIRED_FILES: &[&str] = &["bin/resolve"];
pub const REQUIRED_DIRS: &[&str] = &["libs"];

/// Directories created up front, even when the installer leaves them empty
pub const SKELETON_DIRS: &[&str] = &[
    "easyDCP",
    "scripts",
    "share",
    "Fairlight",
    "share/applications",
    "share/icons/hicolor/128x128/apps",
    "share/icons/hicolor/256x256/apps",
    "Apple Immersive/Calibration",
    "Extras",
    "share/metainfo",
];

/// Fixed target directory structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLayout {
    root: PathBuf,
}

impl SandboxLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn libs_dir(&self) -> PathBuf {
        self.root.join("libs")
    }

    pub fn resolve_binary(&self) -> PathBuf {
        self.bin_dir().join("resolve")
    }

    pub fn applications_dir(&self) -> PathBuf {
        self.root.join("share").join("applications")
    }

    pub fn metainfo_dir(&self) -> PathBuf {
        self.root.join("share").join("metainfo")
    }

    /// hicolor icon directory, e.g. `icon_dir(128)`
    pub fn icon_dir(&self, size: u32) -> PathBuf {
        self.root
            .join("share/icons/hicolor")
            .join(format!("{0}x{0}", size))
            .join("apps")
    }

    /// Remove everything below the root, keeping the root itself
    pub fn clear(&self) -> BuilderResult<()> {
        if !self.root.exists() {
            return fs::create_dir_all(&self.root).at_path(&self.root);
        }
        for entry in fs::read_dir(&self.root).at_path(&self.root)? {
            let path = entry.at_path(&self.root)?.path();
            let file_type = fs::symlink_metadata(&path).at_path(&path)?.file_type();
            if file_type.is_dir() {
                fs::remove_dir_all(&path).at_path(&path)?;
            } else {
                fs::remove_file(&path).at_path(&path)?;
            }
        }
        Ok(())
    }

    pub fn create_skeleton(&self) -> BuilderResult<()> {
        for dir in SKELETON_DIRS {
            create_dir(&self.root.join(dir), 0o755)?;
        }
        Ok(())
    }

    /// Check the invariant the launcher relies on
    pub fn verify(&self) -> BuilderResult<()> {
        for file in REQUIRED_FILES {
            let path = self.root.join(file);
            if !path.is_file() {
                return Err(BuilderError::install(format!(
                    "sandbox is missing required file '{}'",
                    file
                )));
            }
        }
        for dir in REQUIRED_DIRS {
            if !self.root.join(dir).is_dir() {
                return Err(BuilderError::install(format!(
                    "sandbox is missing required directory '{}'",
                    dir
                )));
            }
        }
        Ok(())
    }
}

pub fn create_dir(path: &Path, mode: u32) -> BuilderResult<()> {
    fs::create_dir_all(path).at_path(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).at_path(path)
}

/// `chmod a+r,u+w` on files and `a+rx,u+w` on directories, keeping exec bits
pub fn fix_permissions(root: &Path) -> BuilderResult<()> {
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| BuilderError::install_with("cannot walk extracted tree", e))?;
        if entry.path_is_symlink() {
            continue;
        }
        let path = entry.path();
        let mode = entry
            .metadata()
            .map_err(|e| BuilderError::install_with("cannot stat extracted file", e))?
            .permissions()
            .mode();
        let wanted = if entry.file_type().is_dir() {
            mode | 0o555 | 0o200
        } else {
            mode | 0o444 | 0o200
        };
        if wanted != mode {
            fs::set_permissions(path, fs::Permissions::from_mode(wanted)).at_path(path)?;
        }
    }
    Ok(())
}

/// Copy a tree, preserving symlinks and permissions; a missing source is skipped
pub fn copy_tree(src: &Path, dst: &Path) -> BuilderResult<bool> {
    if !src.exists() {
        return Ok(false);
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| BuilderError::install_with("cannot walk source tree", e))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BuilderError::install_with("walked outside the source tree", e))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&target).at_path(&target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    debug!(src = %src.display(), dst = %dst.display(), "copied tree");
    Ok(true)
}

/// Copy one file with its permissions, replacing any existing target
pub fn copy_file(src: &Path, dst: &Path) -> BuilderResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).at_path(parent)?;
    }
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst).at_path(dst)?;
    }
    fs::copy(src, dst).at_path(dst)?;
    Ok(())
}

fn copy_symlink(src: &Path, dst: &Path) -> BuilderResult<()> {
    let link = fs::read_link(src).at_path(src)?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).at_path(parent)?;
    }
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst).at_path(dst)?;
    }
    symlink(&link, dst).at_path(dst)
}

/// Create `link -> target` unless something already sits at `link`
pub fn ensure_symlink(target: &Path, link: &Path) -> BuilderResult<()> {
    if fs::symlink_metadata(link).is_ok() {
        return Ok(());
    }
    symlink(target, link).at_path(link)
}

/// Set exec bits on every regular file directly below `dir`
pub fn mark_executables(dir: &Path) -> BuilderResult<usize> {
    let mut count = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| BuilderError::install_with("cannot walk binaries", e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let mut perms = fs::metadata(path).at_path(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms).at_path(path)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let layout = SandboxLayout::new("/sandbox");
        assert_eq!(layout.resolve_binary(), PathBuf::from("/sandbox/bin/resolve"));
        assert_eq!(
            layout.icon_dir(256),
            PathBuf::from("/sandbox/share/icons/hicolor/256x256/apps")
        );
        assert_eq!(layout.metainfo_dir(), PathBuf::from("/sandbox/share/metainfo"));
    }

    #[test]
    fn test_clear_keeps_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("app");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/old"), b"x").unwrap();
        fs::write(root.join("stale.txt"), b"x").unwrap();
        symlink("bin/old", root.join("dangling")).unwrap();

        let layout = SandboxLayout::new(&root);
        layout.clear().unwrap();
        assert!(root.is_dir());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn test_verify() {
        let dir = tempdir().unwrap();
        let layout = SandboxLayout::new(dir.path());
        assert!(layout.verify().is_err());

        fs::create_dir_all(layout.bin_dir()).unwrap();
        fs::write(layout.resolve_binary(), b"elf").unwrap();
        assert!(layout.verify().is_err());

        fs::create_dir_all(layout.libs_dir()).unwrap();
        assert!(layout.verify().is_ok());
    }

    #[test]
    fn test_copy_tree_preserves_symlinks() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/libfoo.so.1"), b"lib").unwrap();
        symlink("libfoo.so.1", src.join("nested/libfoo.so")).unwrap();

        let dst = dir.path().join("dst");
        assert!(copy_tree(&src, &dst).unwrap());
        let link = dst.join("nested/libfoo.so");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("libfoo.so.1"));

        assert!(!copy_tree(&dir.path().join("missing"), &dst).unwrap());
    }

    #[test]
    fn test_fix_permissions_and_executables() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let file = bin.join("resolve");
        fs::write(&file, b"elf").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o400)).unwrap();

        fix_permissions(dir.path()).unwrap();
        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o644);

        assert_eq!(mark_executables(&bin).unwrap(), 1);
        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o755);
    }
}
