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

//! Error taxonomy for the build pipeline.
//!
//! Every variant is terminal: the pipeline aborts at the first error and the
//! message names the stage that failed.

use std::fmt;
use std::path::Path;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Pipeline stage, used to tell the user where a build stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Resolution,
    Download,
    Install,
    Metainfo,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Configuration => write!(f, "configuration"),
            Stage::Resolution => write!(f, "version resolution"),
            Stage::Download => write!(f, "download"),
            Stage::Install => write!(f, "sandbox install"),
            Stage::Metainfo => write!(f, "metainfo"),
        }
    }
}

/// Main error type for the builder
#[derive(Debug, Error)]
pub enum BuilderError {
    /// No usable version could be resolved from the vendor API
    #[error("version resolution failed: {message}")]
    Resolution {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Artifact retrieval or validation failed
    #[error("download of '{download_id}' failed: {message}")]
    Download {
        download_id: String,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Extraction or filesystem placement failed
    #[error("sandbox install failed: {message}")]
    Install {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Metainfo document could not be persisted
    #[error("writing metainfo to '{path}' failed")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or unreadable configuration
    #[error("configuration error: {message}")]
    Config { message: String },
}

/// Failures of the HTTP transport, wrapped by the stage that hit them
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unreadable response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("could not write '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// HTTP status carried by this error, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl BuilderError {
    /// The pipeline stage this error aborted
    pub fn stage(&self) -> Stage {
        match self {
            BuilderError::Resolution { .. } => Stage::Resolution,
            BuilderError::Download { .. } => Stage::Download,
            BuilderError::Install { .. } => Stage::Install,
            BuilderError::Write { .. } => Stage::Metainfo,
            BuilderError::Config { .. } => Stage::Configuration,
        }
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        BuilderError::Resolution {
            message: message.into(),
            source: None,
        }
    }

    pub fn resolution_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BuilderError::Resolution {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn download(download_id: impl Into<String>, message: impl Into<String>) -> Self {
        BuilderError::Download {
            download_id: download_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn download_with<E>(
        download_id: impl Into<String>,
        message: impl Into<String>,
        source: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BuilderError::Download {
            download_id: download_id.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn install(message: impl Into<String>) -> Self {
        BuilderError::Install {
            message: message.into(),
            source: None,
        }
    }

    pub fn install_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BuilderError::Install {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Filesystem failure while placing files into the sandbox
    pub fn install_io(path: &Path, source: std::io::Error) -> Self {
        BuilderError::Install {
            message: format!("filesystem error at '{}'", path.display()),
            source: Some(Box::new(source)),
        }
    }

    pub fn write(path: &Path, source: std::io::Error) -> Self {
        BuilderError::Write {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        BuilderError::Config {
            message: message.into(),
        }
    }
}

/// Result type alias for pipeline operations
pub type BuilderResult<T> = std::result::Result<T, BuilderError>;

/// Extension trait mapping io results into install errors with a path
pub trait InstallContext<T> {
    fn at_path(self, path: &Path) -> BuilderResult<T>;
}

impl<T> InstallContext<T> for std::io::Result<T> {
    fn at_path(self, path: &Path) -> BuilderResult<T> {
        self.map_err(|e| BuilderError::install_io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display_names_stage() {
        let err = BuilderError::download("D1", "artifact is empty");
        assert_eq!(format!("{}", err), "download of 'D1' failed: artifact is empty");
        assert_eq!(err.stage(), Stage::Download);
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(BuilderError::resolution("x").stage(), Stage::Resolution);
        assert_eq!(BuilderError::install("x").stage(), Stage::Install);
        assert_eq!(BuilderError::config("x").stage(), Stage::Configuration);

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = BuilderError::write(Path::new("/app/share/metainfo/x.xml"), io);
        assert_eq!(err.stage(), Stage::Metainfo);
        assert_eq!(format!("{}", Stage::Metainfo), "metainfo");
    }

    #[test]
    fn test_install_context_keeps_source() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        ));
        let err = result.at_path(Path::new("/sandbox/libs")).unwrap_err();
        assert!(format!("{}", err).contains("/sandbox/libs"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_transport_status() {
        let err = TransportError::Status {
            url: "https://example.invalid".to_string(),
            status: 404,
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(format!("{}", err), "https://example.invalid answered with HTTP 404");
    }
}
