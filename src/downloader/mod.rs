/*
 * resolve-builder - Build orchestration for the DaVinci Resolve Flatpak.
 * Copyright (C) 2025  resolve-builder contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 */

//! Installer download with a deterministic, re-usable cache.

pub mod cache;

use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::{BuilderError, BuilderResult};
use crate::vendor::{ArtifactDigest, Transport};
use cache::{validate, ArtifactCache};

/// Where an artifact came from, which decides who may delete it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    Downloaded,
    UserSupplied,
}

/// An installer archive on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub origin: ArtifactOrigin,
}

impl DownloadedArtifact {
    /// Wrap an installer archive provided by the user, skipping the network
    pub fn user_supplied(path: &Path) -> BuilderResult<Self> {
        let size_bytes = fs::metadata(path)
            .map_err(|e| BuilderError::download_with("local", format!("cannot read '{}'", path.display()), e))?
            .len();
        if size_bytes == 0 {
            return Err(BuilderError::download("local", format!("'{}' is empty", path.display())));
        }
        Ok(Self {
            local_path: path.to_path_buf(),
            size_bytes,
            origin: ArtifactOrigin::UserSupplied,
        })
    }
}

/// Registration details the vendor asks for before handing out a link
fn registration_body() -> serde_json::Value {
    json!({
        "firstname": "Flatpak",
        "lastname": "Builder",
        "email": "someone@flathub.org",
        "phone": "202-555-0194",
        "country": "us",
        "state": "New York",
        "city": "FPK",
        "street": "Bowery 146",
        "product": "DaVinci Resolve",
    })
}

/// Fetches installer artifacts through a [`Transport`]
pub struct Downloader<T: Transport> {
    transport: Arc<T>,
    api: ApiConfig,
    cache: ArtifactCache,
}

impl<T: Transport> Downloader<T> {
    pub fn new(transport: Arc<T>, api: ApiConfig, cache_dir: PathBuf) -> Self {
        Self {
            transport,
            api,
            cache: ArtifactCache::new(cache_dir),
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    fn register_url(&self, download_id: &str) -> String {
        format!(
            "{}/register/us/download/{}",
            self.api.api_root(),
            urlencoding::encode(download_id)
        )
    }

    /// Download the artifact for `download_id`, reusing a valid cached copy
    pub async fn download(
        &self,
        download_id: &str,
        expected: &ArtifactDigest,
    ) -> BuilderResult<DownloadedArtifact> {
        let target = self.cache.path_for(download_id);

        if let Some(artifact) = self.cached(download_id, &target, expected)? {
            info!(path = %artifact.local_path.display(), "using cached installer");
            return Ok(artifact);
        }

        self.cache.ensure_dir().map_err(|e| {
            BuilderError::download_with(
                download_id,
                format!("cannot create cache directory '{}'", self.cache.cache_dir().display()),
                e,
            )
        })?;

        if expected.is_empty() {
            debug!(download_id, "no published size or checksum, checking completeness only");
        }
        let url = self.request_link(download_id).await?;
        let partial = self.cache.partial_path_for(download_id);

        match self.fetch(download_id, &url, &partial, expected).await {
            Ok(size_bytes) => {
                fs::rename(&partial, &target).map_err(|e| {
                    let _ = fs::remove_file(&partial);
                    BuilderError::download_with(download_id, "cannot move artifact into the cache", e)
                })?;
                info!(path = %target.display(), size_bytes, "installer downloaded");
                Ok(DownloadedArtifact {
                    local_path: target,
                    size_bytes,
                    origin: ArtifactOrigin::Downloaded,
                })
            }
            Err(e) => {
                if partial.exists() {
                    if let Err(rm) = fs::remove_file(&partial) {
                        warn!("could not remove partial download {}: {}", partial.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    /// A valid cached artifact, removing an invalid one
    fn cached(
        &self,
        download_id: &str,
        target: &Path,
        expected: &ArtifactDigest,
    ) -> BuilderResult<Option<DownloadedArtifact>> {
        if !target.is_file() {
            return Ok(None);
        }
        let verdict = validate(target, expected).map_err(|e| {
            BuilderError::download_with(download_id, "cannot read cached artifact", e)
        })?;
        match verdict {
            Ok(size_bytes) => Ok(Some(DownloadedArtifact {
                local_path: target.to_path_buf(),
                size_bytes,
                origin: ArtifactOrigin::Downloaded,
            })),
            Err(mismatch) => {
                warn!(path = %target.display(), "discarding cached artifact: {}", mismatch);
                fs::remove_file(target).map_err(|e| {
                    BuilderError::download_with(download_id, "cannot remove stale cached artifact", e)
                })?;
                Ok(None)
            }
        }
    }

    /// Ask the vendor for the time-limited artifact URL
    async fn request_link(&self, download_id: &str) -> BuilderResult<url::Url> {
        let register = self.register_url(download_id);
        debug!(url = %register, "requesting download link");
        let text = self
            .transport
            .post_json(&register, &registration_body())
            .await
            .map_err(|e| BuilderError::download_with(download_id, "registration request failed", e))?;

        let link = text.trim().trim_matches('"');
        url::Url::parse(link)
            .ok()
            .filter(|u| u.scheme() == "https" || u.scheme() == "http")
            .ok_or_else(|| {
                BuilderError::download(download_id, format!("vendor returned an invalid download link '{}'", link))
            })
    }

    async fn fetch(
        &self,
        download_id: &str,
        url: &url::Url,
        partial: &Path,
        expected: &ArtifactDigest,
    ) -> BuilderResult<u64> {
        let outcome = self
            .transport
            .fetch_to_file(url.as_str(), partial)
            .await
            .map_err(|e| BuilderError::download_with(download_id, "transfer failed", e))?;

        if let Some(announced) = outcome.content_length {
            if announced != outcome.bytes_written {
                return Err(BuilderError::download(
                    download_id,
                    format!(
                        "truncated transfer: server announced {} bytes, received {}",
                        announced, outcome.bytes_written
                    ),
                ));
            }
        }

        let verdict = validate(partial, expected).map_err(|e| {
            BuilderError::download_with(download_id, "cannot read downloaded artifact", e)
        })?;
        verdict.map_err(|mismatch| BuilderError::download(download_id, mismatch.to_string()))
    }
}
