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

//! Version resolution against the vendor release endpoints.
//!
//! A beta build asks for the newest release of any kind. When the vendor
//! has no beta out, that answer is a stable release, and the resolver hands
//! back the stable listing instead, flagged as a fallback.

use std::sync::Arc;
use tracing::{info, warn};

use crate::channel::ReleaseChannel;
use crate::config::ApiConfig;
use crate::error::{BuilderError, BuilderResult};
use crate::vendor::release::parse_release_history;
use crate::vendor::{ReleaseNote, Transport, VersionInfo};

/// Result of resolving a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub requested: ReleaseChannel,
    pub info: VersionInfo,
    /// True when Beta was requested and the stable release was returned
    pub fell_back: bool,
}

/// Resolves the release to build from the vendor API
pub struct VersionResolver<T: Transport> {
    transport: Arc<T>,
    api: ApiConfig,
}

impl<T: Transport> VersionResolver<T> {
    pub fn new(transport: Arc<T>, api: ApiConfig) -> Self {
        Self { transport, api }
    }

    fn endpoint(&self, kind: &str) -> String {
        format!(
            "{}/support/{}/{}/linux",
            self.api.api_root(),
            kind,
            urlencoding::encode(&self.api.app_tag)
        )
    }

    pub fn stable_endpoint(&self) -> String {
        self.endpoint("latest-stable-version")
    }

    pub fn latest_endpoint(&self) -> String {
        self.endpoint("latest-version")
    }

    pub fn downloads_endpoint(&self) -> String {
        format!("{}/support/en/downloads.json", self.api.api_root())
    }

    /// Resolve the release for `channel`
    pub async fn resolve(&self, channel: ReleaseChannel) -> BuilderResult<Resolution> {
        match channel {
            ReleaseChannel::Stable => {
                let info = self.resolve_stable().await?;
                info!(version = %info.version, release_id = %info.release_id, "resolved stable release");
                Ok(Resolution {
                    requested: channel,
                    info,
                    fell_back: false,
                })
            }
            ReleaseChannel::Beta => {
                if let Some(info) = self.resolve_beta().await? {
                    info!(version = %info.version, release_id = %info.release_id, "resolved beta release");
                    return Ok(Resolution {
                        requested: channel,
                        info,
                        fell_back: false,
                    });
                }

                let info = self.resolve_stable().await?;
                warn!(
                    version = %info.version,
                    "no beta release available, falling back to the stable release"
                );
                Ok(Resolution {
                    requested: channel,
                    info,
                    fell_back: true,
                })
            }
        }
    }

    async fn resolve_stable(&self) -> BuilderResult<VersionInfo> {
        let url = self.stable_endpoint();
        let body = self.transport.get_json(&url).await.map_err(|e| {
            BuilderError::resolution_with(format!("cannot query {}", url), e)
        })?;

        VersionInfo::from_listing(&body)?.ok_or_else(|| {
            BuilderError::resolution(format!("no stable release of '{}' is published", self.api.app_tag))
        })
    }

    /// The beta listing, or `None` when the vendor has no beta out
    async fn resolve_beta(&self) -> BuilderResult<Option<VersionInfo>> {
        let url = self.latest_endpoint();
        let body = match self.transport.get_json(&url).await {
            Ok(body) => body,
            Err(e) if e.status() == Some(404) => return Ok(None),
            Err(e) => {
                return Err(BuilderError::resolution_with(format!("cannot query {}", url), e));
            }
        };

        // Only a listing the vendor marks as a beta counts; anything else is
        // a stable release and is resolved through the stable endpoint
        Ok(VersionInfo::from_listing(&body)?.filter(|info| info.version.is_beta()))
    }

    /// Public release history used for the metainfo `<releases>` block
    pub async fn release_history(&self) -> BuilderResult<Vec<ReleaseNote>> {
        let url = self.downloads_endpoint();
        let body = self.transport.get_json(&url).await.map_err(|e| {
            BuilderError::resolution_with(format!("cannot query {}", url), e)
        })?;
        let notes = parse_release_history(&body, &self.api.app_tag)?;
        if notes.is_empty() {
            warn!("no releases found for '{}' in the downloads listing", self.api.app_tag);
        }
        Ok(notes)
    }
}
