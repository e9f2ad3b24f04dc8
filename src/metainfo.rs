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

//! AppStream metainfo generation.

use chrono::{NaiveDate, NaiveTime, Utc};
use quick_xml::escape::escape;
use regex::{Captures, Regex};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::channel::ReleaseChannel;
use crate::error::{BuilderError, BuilderResult};
use crate::vendor::{ReleaseNote, Version, VersionInfo};

const BUILTIN_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<component type="desktop-application">
  <id>${APP_ID}</id>
  <name>${APP_NAME}</name>
  <summary>Professional video editing, color correction, visual effects and audio post production</summary>
  <metadata_license>CC0-1.0</metadata_license>
  <project_license>LicenseRef-proprietary</project_license>
  <developer id="com.blackmagicdesign">
    <name>Blackmagic Design</name>
  </developer>
  <description>
    <p>${DESCRIPTION}</p>
  </description>
  <launchable type="desktop-id">${APP_ID}.desktop</launchable>
  <url type="homepage">https://www.blackmagicdesign.com/products/davinciresolve</url>
  <content_rating type="oars-1.1"/>
  <releases>
${RELEASES}  </releases>
</component>
"#;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Z_]+)\}").expect("static regex"))
}

/// A rendered metainfo file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetainfoDocument {
    pub file_name: String,
    pub content: String,
}

impl MetainfoDocument {
    /// Write the document into `dir`, returning the written path
    pub fn write_to(&self, dir: &Path) -> BuilderResult<PathBuf> {
        let path = dir.join(&self.file_name);
        fs::create_dir_all(dir).map_err(|e| BuilderError::write(&path, e))?;

        let temp = path.with_extension("xml.tmp");
        fs::write(&temp, &self.content).map_err(|e| BuilderError::write(&path, e))?;
        fs::rename(&temp, &path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            BuilderError::write(&path, e)
        })?;

        info!(path = %path.display(), "metainfo written");
        Ok(path)
    }
}

/// Renders AppStream metainfo for a resolved release
pub struct MetainfoGenerator {
    channel: ReleaseChannel,
    site_url: String,
    template: Option<String>,
    history: Vec<ReleaseNote>,
}

impl MetainfoGenerator {
    pub fn new(channel: ReleaseChannel, site_url: impl Into<String>) -> Self {
        Self {
            channel,
            site_url: site_url.into(),
            template: None,
            history: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Use `<dir>/<app_id>.metainfo.xml` as template when it exists
    pub fn with_template_dir(self, dir: &Path) -> BuilderResult<Self> {
        let path = dir.join(self.channel.metainfo_template());
        if !path.is_file() {
            debug!(path = %path.display(), "no metainfo template, using the built-in one");
            return Ok(self);
        }
        let template = fs::read_to_string(&path).map_err(|e| {
            BuilderError::config(format!("cannot read metainfo template '{}': {}", path.display(), e))
        })?;
        Ok(self.with_template(template))
    }

    pub fn with_history(mut self, history: Vec<ReleaseNote>) -> Self {
        self.history = history;
        self
    }

    /// Render for `info`, dated today (UTC)
    pub fn generate(&self, info: &VersionInfo) -> MetainfoDocument {
        self.generate_on(info, Utc::now().date_naive())
    }

    /// Render for `info`, dated `date`; identical inputs give identical output
    pub fn generate_on(&self, info: &VersionInfo, date: NaiveDate) -> MetainfoDocument {
        let current_note = self.history.iter().find(|n| same_release(&n.version, &info.version));
        let current_description = current_note
            .map(|n| n.description.clone())
            .unwrap_or_else(|| format!("{} {}", self.channel.app_name(), info.version));

        let description = self
            .history
            .first()
            .map(|n| n.description.clone())
            .unwrap_or_else(|| current_description.clone());

        let current_url = self.release_notes_url(&info.release_id);
        let mut entries: Vec<(&Version, NaiveDate, Option<&str>, &str)> =
            vec![(&info.version, date, Some(current_url.as_str()), current_description.as_str())];
        entries.extend(
            self.history
                .iter()
                .filter(|note| !same_release(&note.version, &info.version))
                .map(|note| (&note.version, note.date, None, note.description.as_str())),
        );
        // AppStream lists releases newest first; the sort is stable for equal versions
        entries.sort_by(|a, b| b.0.cmp(a.0));

        let releases: String = entries
            .into_iter()
            .map(|(version, date, url, description)| self.release_entry(version, date, url, description))
            .collect();

        let version = info.version.to_string();
        let date_text = date.format("%Y-%m-%d").to_string();
        let app_name = self.channel.app_name();
        let template = self.template.as_deref().unwrap_or(BUILTIN_TEMPLATE);

        let content = placeholder_pattern()
            .replace_all(template, |caps: &Captures| match &caps[1] {
                "APP_ID" => self.channel.app_id().to_string(),
                "APP_NAME" => escape(app_name.as_str()).into_owned(),
                "VERSION" => escape(version.as_str()).into_owned(),
                "DATE" => date_text.clone(),
                "DESCRIPTION" => escape(description.as_str()).into_owned(),
                "RELEASES" => releases.clone(),
                _ => caps[0].to_string(),
            })
            .into_owned();

        MetainfoDocument {
            file_name: self.channel.metainfo_template(),
            content,
        }
    }

    fn release_notes_url(&self, release_id: &str) -> String {
        format!(
            "{}/support/download/{}/Linux",
            self.site_url.trim_end_matches('/'),
            release_id
        )
    }

    fn release_entry(&self, version: &Version, date: NaiveDate, url: Option<&str>, description: &str) -> String {
        let timestamp = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        let mut entry = format!(
            "    <release version=\"{}\" date=\"{}\" timestamp=\"{}\">\n",
            escape(version.to_string().as_str()),
            date.format("%Y-%m-%d"),
            timestamp
        );
        if let Some(url) = url {
            entry.push_str(&format!("      <url type=\"details\">{}</url>\n", escape(url)));
        }
        entry.push_str(&format!(
            "      <description>\n        <p>{}</p>\n      </description>\n    </release>\n",
            escape(description)
        ));
        entry
    }
}

/// Same public release, ignoring the build number
fn same_release(a: &Version, b: &Version) -> bool {
    (a.major, a.minor, a.patch, a.beta) == (b.major, b.minor, b.patch, b.beta)
}
