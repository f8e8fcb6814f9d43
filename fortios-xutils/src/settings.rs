use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::address::{RangeExpansion, ResolveOptions};
use crate::paths::{PathOptions, DEFAULT_MAX_HOPS};

/// Tool settings, read from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub parse: ParseSettings,
    pub resolve: ResolveOptions,
    pub paths: PathOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParseSettings {
    /// Root of the parsed-output layout.
    pub outdir: PathBuf,
    /// Section names or patterns written as separate files.
    pub sections: Vec<String>,
}

impl Default for ParseSettings {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("out"),
            sections: [
                "system.*",
                "firewall service category",
                "firewall service group",
                "firewall service custom",
                "firewall addrgrp",
                "firewall address",
                "firewall policy",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parse: ParseSettings::default(),
            resolve: ResolveOptions {
                range_expansion: RangeExpansion::Cidr,
                host_limit: 1024,
            },
            paths: PathOptions {
                max_hops: DEFAULT_MAX_HOPS,
            },
        }
    }
}

/// Errors returned when loading a settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Load settings from a TOML file. Keys it leaves out keep their defaults.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_settings(&raw, path.display().to_string())
}

/// Built-in settings shipped with the binary.
pub fn default_settings() -> Settings {
    let embedded = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/defaults/settings.toml"
    ));
    match parse_settings(embedded, "embedded settings".to_string()) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::warn!("{err}; using compiled-in defaults");
            Settings::default()
        }
    }
}

fn parse_settings(raw: &str, path: String) -> Result<Settings, SettingsError> {
    toml::from_str(raw).map_err(|source| SettingsError::Parse { path, source })
}
