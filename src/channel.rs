/*
 * resolve-builder - Build orchestration for the DaVinci Resolve Flatpak.
 * Copyright (C) 2025  resolve-builder contributors
 */

//! Release channels and the application identity each one builds.

use std::fmt;

pub const APP_ID_STABLE: &str = "com.blackmagic.Resolve";
pub const APP_ID_BETA: &str = "com.blackmagic.Resolve.Beta";
pub const APP_NAME: &str = "DaVinci Resolve";

/// Which vendor feed to query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseChannel {
    #[default]
    Stable,
    Beta,
}

impl ReleaseChannel {
    pub fn from_beta_flag(beta: bool) -> Self {
        if beta {
            ReleaseChannel::Beta
        } else {
            ReleaseChannel::Stable
        }
    }

    /// Flatpak application id built for this channel
    pub fn app_id(&self) -> &'static str {
        match self {
            ReleaseChannel::Stable => APP_ID_STABLE,
            ReleaseChannel::Beta => APP_ID_BETA,
        }
    }

    /// Human readable application name
    pub fn app_name(&self) -> String {
        match self {
            ReleaseChannel::Stable => APP_NAME.to_string(),
            ReleaseChannel::Beta => format!("{} (Beta)", APP_NAME),
        }
    }

    pub fn desktop_template(&self) -> String {
        format!("{}.desktop", self.app_id())
    }

    /// Template for an auxiliary tool, e.g. `RAWPlayer`
    pub fn component_desktop_template(&self, suffix: &str) -> String {
        format!("{}.{}.desktop", self.app_id(), suffix)
    }

    pub fn metainfo_template(&self) -> String {
        format!("{}.metainfo.xml", self.app_id())
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseChannel::Stable => write!(f, "stable"),
            ReleaseChannel::Beta => write!(f, "beta"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_per_channel() {
        assert_eq!(ReleaseChannel::Stable.app_id(), "com.blackmagic.Resolve");
        assert_eq!(ReleaseChannel::Beta.app_id(), "com.blackmagic.Resolve.Beta");
        assert_eq!(ReleaseChannel::Beta.app_name(), "DaVinci Resolve (Beta)");
    }

    #[test]
    fn test_template_names() {
        let beta = ReleaseChannel::from_beta_flag(true);
        assert_eq!(beta.desktop_template(), "com.blackmagic.Resolve.Beta.desktop");
        assert_eq!(
            beta.component_desktop_template("RAWPlayer"),
            "com.blackmagic.Resolve.Beta.RAWPlayer.desktop"
        );
        assert_eq!(
            ReleaseChannel::Stable.metainfo_template(),
            "com.blackmagic.Resolve.metainfo.xml"
        );
    }
}
