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

//! The build pipeline: resolve, download, install, describe.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Instrument};

use crate::channel::ReleaseChannel;
use crate::config::Config;
use crate::downloader::{DownloadedArtifact, Downloader};
use crate::error::BuilderResult;
use crate::installer::extract::PayloadUnpacker;
use crate::installer::layout::SandboxLayout;
use crate::installer::SandboxInstaller;
use crate::metainfo::MetainfoGenerator;
use crate::resolver::{Resolution, VersionResolver};
use crate::span_stage;
use crate::vendor::Transport;

/// What a successful build produced
#[derive(Debug)]
pub struct BuildReport {
    pub resolution: Resolution,
    pub artifact_bytes: u64,
    pub layout: SandboxLayout,
    pub metainfo_path: PathBuf,
}

/// One build, run once
pub struct Pipeline<T: Transport> {
    config: Config,
    channel: ReleaseChannel,
    transport: Arc<T>,
    unpacker: Box<dyn PayloadUnpacker>,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(
        config: Config,
        channel: ReleaseChannel,
        transport: Arc<T>,
        unpacker: Box<dyn PayloadUnpacker>,
    ) -> Self {
        Self {
            config,
            channel,
            transport,
            unpacker,
        }
    }

    /// Run every stage in order; the first failure ends the build
    pub async fn run(self) -> BuilderResult<BuildReport> {
        let Pipeline {
            config,
            channel,
            transport,
            unpacker,
        } = self;
        info!(app_id = channel.app_id(), %channel, "starting build");

        let resolver = VersionResolver::new(transport.clone(), config.api.clone());
        let resolution = resolver
            .resolve(channel)
            .instrument(span_stage!("resolve"))
            .await?;
        let info = &resolution.info;

        // Every vendor query finishes before the prefix is touched
        let history = if config.metainfo.release_history {
            resolver
                .release_history()
                .instrument(span_stage!("release-history"))
                .await?
        } else {
            Vec::new()
        };

        let artifact = match &config.paths.artifact {
            Some(path) => {
                info!(path = %path.display(), "using supplied installer artifact");
                DownloadedArtifact::user_supplied(path)?
            }
            None => {
                let downloader = Downloader::new(transport.clone(), config.api.clone(), config.paths.cache_dir.clone());
                downloader
                    .download(&info.download_id, &info.expected)
                    .instrument(span_stage!("download"))
                    .await?
            }
        };
        let artifact_bytes = artifact.size_bytes;

        let layout = {
            let _span = span_stage!("install").entered();
            SandboxInstaller::new(
                channel,
                config.paths.work_dir.clone(),
                config.paths.desktop_dir(),
                unpacker,
            )
            .install(&artifact, &config.paths.prefix)?
        };

        let metainfo_path = {
            let _span = span_stage!("metainfo").entered();
            MetainfoGenerator::new(channel, config.api.site_url.clone())
                .with_template_dir(&config.paths.metainfo_template_dir())?
                .with_history(history)
                .generate(info)
                .write_to(&layout.metainfo_dir())?
        };

        info!(version = %info.version, "build finished");
        Ok(BuildReport {
            resolution,
            artifact_bytes,
            layout,
            metainfo_path,
        })
    }
}
