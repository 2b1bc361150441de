// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use media_types::{MINIMUM_DESKTOP_INSTALL_SIZE, MINIMUM_SERVER_INSTALL_SIZE, MediaOpts};
use serde::{Deserialize, Serialize};

pub const SYSTEM_CONFIG: &str = "/etc/install-media/config.toml";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Install profile, deciding how large the root partition must be.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Desktop,
    Server,
}

impl Profile {
    pub fn min_root_size(self) -> u64 {
        match self {
            Self::Desktop => MINIMUM_DESKTOP_INSTALL_SIZE,
            Self::Server => MINIMUM_SERVER_INSTALL_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: LoggingLevel,
    pub log_to_disk: bool,
    /// Seconds to wait for udev after the tables are re-read.
    pub settle_seconds: u64,
    pub profile: Profile,
    pub media: MediaOpts,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: LoggingLevel::default(),
            log_to_disk: true,
            settle_seconds: media_sys::DEFAULT_SETTLE.as_secs(),
            profile: Profile::default(),
            media: MediaOpts::default(),
        }
    }
}

impl AppConfig {
    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(data)?;
        Ok(Self {
            media: config.media.normalize(),
            ..config
        })
    }

    /// Read `path`, else the system file when present, else the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let system = PathBuf::from(SYSTEM_CONFIG);
                if !system.exists() {
                    return Ok(Self::default());
                }
                system
            }
        };

        let data = fs::read_to_string(&path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("parsing configuration {}", path.display()))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_seconds)
    }
}
