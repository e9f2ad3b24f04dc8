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

//! Installer extraction.
//!
//! The vendor ships a zip holding a `DaVinci_Resolve_*_Linux.run` AppImage.
//! The zip may be wrapped in a self-extracting stub, so the payload is found
//! by scanning rather than by trusting the first bytes.

use regex::Regex;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::error::{BuilderError, BuilderResult, InstallContext};

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ELF_MAGIC: &[u8] = b"\x7fELF";
const INSTALLER_PATTERN: &str = r"^DaVinci_Resolve_.*_Linux\.run$";
/// Directory `--appimage-extract` unpacks into
pub const SQUASHFS_ROOT: &str = "squashfs-root";

/// Detected artifact layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Zip archive starting `offset` bytes into the file
    Zip { offset: u64 },
    /// The artifact is the AppImage installer itself
    AppImage,
}

/// Find the archive payload inside `path`
pub fn detect_payload(path: &Path) -> BuilderResult<PayloadKind> {
    let mut file = File::open(path).at_path(path)?;
    let mut head = [0u8; 4];
    let read = file.read(&mut head).at_path(path)?;
    if read == 4 && head == ELF_MAGIC {
        // An ELF may still be a zip SFX stub; prefer the embedded zip if there is one
        return Ok(match scan_for(path, ZIP_LOCAL_HEADER).at_path(path)? {
            Some(offset) if zip_readable(path) => PayloadKind::Zip { offset },
            _ => PayloadKind::AppImage,
        });
    }

    match scan_for(path, ZIP_LOCAL_HEADER).at_path(path)? {
        Some(offset) => Ok(PayloadKind::Zip { offset }),
        None => Err(BuilderError::install(format!(
            "'{}' contains neither a zip payload nor an AppImage installer",
            path.display()
        ))),
    }
}

fn zip_readable(path: &Path) -> bool {
    File::open(path)
        .ok()
        .and_then(|f| zip::ZipArchive::new(BufReader::new(f)).ok())
        .is_some()
}

/// Offset of the first occurrence of `needle`, reading in chunks
fn scan_for(path: &Path, needle: &[u8]) -> io::Result<Option<u64>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buffer = vec![0u8; 64 * 1024];
    let mut carry: Vec<u8> = Vec::new();
    let mut consumed = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            return Ok(None);
        }
        let mut window = std::mem::take(&mut carry);
        let window_start = consumed - window.len() as u64;
        window.extend_from_slice(&buffer[..n]);
        consumed += n as u64;

        if let Some(pos) = window.windows(needle.len()).position(|w| w == needle) {
            return Ok(Some(window_start + pos as u64));
        }
        let keep = needle.len().saturating_sub(1).min(window.len());
        carry = window[window.len() - keep..].to_vec();
    }
}

/// Unpack a zip payload into `dest`, tolerating leading non-archive bytes
pub fn extract_zip(path: &Path, dest: &Path) -> BuilderResult<usize> {
    fs::create_dir_all(dest).at_path(dest)?;
    let file = File::open(path).at_path(path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| BuilderError::install_with(format!("invalid zip payload in '{}'", path.display()), e))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| BuilderError::install_with("cannot read zip entry", e))?;

        let relative = entry.enclosed_name().ok_or_else(|| {
            BuilderError::install(format!("zip entry '{}' escapes the extraction directory", entry.name()))
        })?;
        let outpath = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath).at_path(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).at_path(parent)?;
        }
        let mut out = File::create(&outpath).at_path(&outpath)?;
        io::copy(&mut entry, &mut out).at_path(&outpath)?;
        if let Some(mode) = entry.unix_mode() {
            fs::set_permissions(&outpath, fs::Permissions::from_mode(mode & 0o7777)).at_path(&outpath)?;
        }
        written += 1;
    }

    debug!(entries = written, dest = %dest.display(), "zip payload extracted");
    Ok(written)
}

/// Locate the `.run` installer among extracted files
pub fn find_installer(dir: &Path) -> BuilderResult<PathBuf> {
    let pattern = Regex::new(INSTALLER_PATTERN)
        .map_err(|e| BuilderError::install_with("invalid installer pattern", e))?;

    let mut candidates: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().map(|n| pattern.is_match(n)).unwrap_or(false))
        .map(|e| e.into_path())
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        BuilderError::install("no DaVinci_Resolve_*_Linux.run installer found in the artifact")
    })
}

/// Make a file executable for everyone, keeping the other bits
pub fn make_executable(path: &Path) -> BuilderResult<()> {
    let mut perms = fs::metadata(path).at_path(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms).at_path(path)
}

/// Turns the `.run` installer into a directory tree
pub trait PayloadUnpacker {
    /// Unpack `installer` below `scratch`, returning the unpacked root
    fn unpack(&self, installer: &Path, scratch: &Path) -> BuilderResult<PathBuf>;
}

/// Runs the AppImage runtime's own `--appimage-extract`
#[derive(Debug, Default)]
pub struct AppImageUnpacker;

impl PayloadUnpacker for AppImageUnpacker {
    fn unpack(&self, installer: &Path, scratch: &Path) -> BuilderResult<PathBuf> {
        info!(installer = %installer.display(), "extracting installer payload");
        let output = Command::new(installer)
            .arg("--appimage-extract")
            .current_dir(scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                BuilderError::install_with(format!("cannot run '{}'", installer.display()), e)
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuilderError::install(format!(
                "installer extraction exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let root = scratch.join(SQUASHFS_ROOT);
        if !root.is_dir() {
            return Err(BuilderError::install(format!(
                "installer extraction did not produce '{}'",
                SQUASHFS_ROOT
            )));
        }
        Ok(root)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;
    use std::path::Path;

    /// Build a zip with the given (name, contents) entries, optionally behind a stub
    pub fn write_zip(path: &Path, stub: &[u8], entries: &[(&str, &[u8], u32)]) {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            for (name, contents, mode) in entries {
                let options = zip::write::SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Stored)
                    .unix_permissions(*mode);
                zip.start_file(*name, options).unwrap();
                zip.write_all(contents).unwrap();
            }
            zip.finish().unwrap();
        }
        let mut bytes = stub.to_vec();
        bytes.extend_from_slice(cursor.get_ref());
        std::fs::write(path, bytes).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::write_zip;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_detect_plain_zip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resolve.zip");
        write_zip(&path, b"", &[("readme.txt", b"hi", 0o644)]);
        assert_eq!(detect_payload(&path).unwrap(), PayloadKind::Zip { offset: 0 });
    }

    #[test]
    fn test_detect_zip_behind_stub() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resolve.bin");
        let stub = b"#!/bin/sh\necho self-extracting stub\nexit 0\n";
        write_zip(&path, stub, &[("readme.txt", b"hi", 0o644)]);
        assert_eq!(
            detect_payload(&path).unwrap(),
            PayloadKind::Zip { offset: stub.len() as u64 }
        );
    }

    #[test]
    fn test_detect_appimage_and_garbage() {
        let dir = tempdir().unwrap();
        let appimage = dir.path().join("DaVinci_Resolve_19.1_Linux.run");
        fs::write(&appimage, b"\x7fELF\x02\x01\x01 runtime then squashfs").unwrap();
        assert_eq!(detect_payload(&appimage).unwrap(), PayloadKind::AppImage);

        let garbage = dir.path().join("garbage.bin");
        fs::write(&garbage, b"<html>not an installer</html>").unwrap();
        assert!(matches!(detect_payload(&garbage), Err(BuilderError::Install { .. })));
    }

    #[test]
    fn test_scan_across_chunk_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let mut bytes = vec![b'x'; 64 * 1024 - 2];
        bytes.extend_from_slice(ZIP_LOCAL_HEADER);
        fs::write(&path, &bytes).unwrap();
        assert_eq!(scan_for(&path, ZIP_LOCAL_HEADER).unwrap(), Some(64 * 1024 - 2));
    }

    #[test]
    fn test_extract_zip_with_prefix_keeps_modes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resolve.zip");
        write_zip(
            &path,
            b"HEADER-BYTES-BEFORE-PAYLOAD",
            &[
                ("DaVinci_Resolve_19.1_Linux.run", b"#!/bin/sh\n", 0o755),
                ("Linux_Installation_Instructions.pdf", b"%PDF", 0o644),
            ],
        );

        let out = dir.path().join("out");
        assert_eq!(extract_zip(&path, &out).unwrap(), 2);

        let installer = find_installer(&out).unwrap();
        assert!(installer.ends_with("DaVinci_Resolve_19.1_Linux.run"));
        let mode = fs::metadata(&installer).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn test_find_installer_missing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("something_else.run"), b"").unwrap();
        assert!(find_installer(dir.path()).is_err());
    }

    #[test]
    fn test_appimage_unpacker_runs_installer() {
        let dir = tempdir().unwrap();
        let installer = dir.path().join("DaVinci_Resolve_19.1_Linux.run");
        fs::write(
            &installer,
            "#!/bin/sh\n[ \"$1\" = \"--appimage-extract\" ] || exit 2\nmkdir -p squashfs-root/bin\necho resolve > squashfs-root/bin/resolve\n",
        )
        .unwrap();
        make_executable(&installer).unwrap();

        let scratch = dir.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let root = AppImageUnpacker.unpack(&installer, &scratch).unwrap();
        assert!(root.join("bin/resolve").is_file());
    }

    #[test]
    fn test_appimage_unpacker_reports_failure() {
        let dir = tempdir().unwrap();
        let installer = dir.path().join("DaVinci_Resolve_19.1_Linux.run");
        fs::write(&installer, "#!/bin/sh\necho corrupt payload >&2\nexit 1\n").unwrap();
        make_executable(&installer).unwrap();

        let err = AppImageUnpacker.unpack(&installer, dir.path()).unwrap_err();
        assert!(err.to_string().contains("corrupt payload"));
    }
}
