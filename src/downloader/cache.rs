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

//! Artifact cache keyed by download id.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::vendor::ArtifactDigest;

/// Why a file failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Empty,
    Size { expected: u64, actual: u64 },
    Checksum { expected: String, actual: String },
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::Empty => write!(f, "artifact is empty"),
            Mismatch::Size { expected, actual } => {
                write!(f, "size mismatch: expected {} bytes, got {}", expected, actual)
            }
            Mismatch::Checksum { expected, actual } => {
                write!(f, "checksum mismatch: expected {}, got {}", expected, actual)
            }
        }
    }
}

/// Deterministic on-disk locations for downloaded artifacts
pub struct ArtifactCache {
    cache_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Final location of the artifact for `download_id`
    pub fn path_for(&self, download_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.zip", sanitize(download_id)))
    }

    /// In-flight location; only complete, validated files are renamed out of it
    pub fn partial_path_for(&self, download_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.zip.part", sanitize(download_id)))
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.cache_dir)
    }
}

/// Keep cache file names inside the cache directory
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Streaming SHA-256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check a file on disk against the expected digest.
///
/// Returns the file size on success.
pub fn validate(path: &Path, expected: &ArtifactDigest) -> io::Result<Result<u64, Mismatch>> {
    let actual = fs::metadata(path)?.len();
    if actual == 0 {
        return Ok(Err(Mismatch::Empty));
    }
    if let Some(size) = expected.size {
        if size != actual {
            return Ok(Err(Mismatch::Size {
                expected: size,
                actual,
            }));
        }
    }
    if let Some(sha) = &expected.sha256 {
        let digest = sha256_file(path)?;
        if !digest.eq_ignore_ascii_case(sha) {
            return Ok(Err(Mismatch::Checksum {
                expected: sha.clone(),
                actual: digest,
            }));
        }
    }
    Ok(Ok(actual))
}
