// src/checkers/mod.rs
//! Snapshot sources and the static registry that maps a config `type` to a
//! constructor.

pub mod debug;
pub mod twitch;
pub mod twitter;
pub mod types;
pub mod youtube;

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::ConfigError;
pub use types::SnapshotSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Debug,
    Twitch,
    Youtube,
    Twitter,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Debug,
        SourceKind::Twitch,
        SourceKind::Youtube,
        SourceKind::Twitter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Debug => "debug",
            SourceKind::Twitch => "twitch",
            SourceKind::Youtube => "youtube",
            SourceKind::Twitter => "twitter",
        }
    }

    /// Construct the source from its type-specific settings.
    pub fn build(self, settings: &Map<String, Value>) -> Result<Box<dyn SnapshotSource>> {
        let source: Box<dyn SnapshotSource> = match self {
            SourceKind::Debug => Box::new(debug::DebugChecker::new(parse_settings(settings)?)),
            SourceKind::Twitch => Box::new(twitch::TwitchChecker::new(parse_settings(settings)?)),
            SourceKind::Youtube => {
                Box::new(youtube::YoutubeChecker::new(parse_settings(settings)?))
            }
            SourceKind::Twitter => {
                Box::new(twitter::TwitterChecker::new(parse_settings(settings)?))
            }
        };
        Ok(source)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownType {
                what: "source",
                name: s.to_string(),
                valid: Self::ALL.map(SourceKind::as_str).join(", "),
            })
    }
}

/// Deserialize type-specific settings from the remaining config keys.
pub(crate) fn parse_settings<T: DeserializeOwned>(settings: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(settings.clone()))
        .with_context(|| format!("invalid settings for {}", std::any::type_name::<T>()))
}
