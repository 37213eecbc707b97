// src/config.rs
//! Configuration file: one mapping per source plus a `push methods` mapping of
//! destinations. YAML, TOML and JSON are accepted, chosen by extension.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::checkers::SnapshotSource;
use crate::notify::heartbeat::DEFAULT_REPORT_INTERVAL_SECS;
use crate::notify::{parse_push_contents, PushContents};
use crate::rules::PushRule;

pub const ENV_CONFIG_PATH: &str = "STREAM_NOTIFIER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown {what} type {name:?}, valid types are: {valid}")]
    UnknownType {
        what: &'static str,
        name: String,
        valid: String,
    },
    #[error("reading config {}: {err}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("parsing {format} config {}: {message}", path.display())]
    Parse {
        format: &'static str,
        path: PathBuf,
        message: String,
    },
    #[error("invalid colour {0:?}, expected RRGGBB")]
    Color(String),
    #[error("config defines no sources")]
    NoSources,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default, rename = "push methods", alias = "push_methods")]
    pub push_methods: BTreeMap<String, PushMethodConfig>,
    #[serde(flatten)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushMethodConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub rule: Value,
    #[serde(default)]
    pub contents: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    /// Destinations that receive status reports.
    #[serde(default)]
    pub report: Vec<String>,
    #[serde(default, alias = "push contents")]
    pub push_contents: Option<BTreeMap<String, String>>,
    #[serde(default, alias = "push rules")]
    pub push_rules: Option<Vec<RuleConfig>>,
    /// Seconds; overrides the source type's default.
    #[serde(default)]
    pub interval: Option<f64>,
    #[serde(default, alias = "report url")]
    pub report_url: Option<String>,
    #[serde(default = "default_report_interval", alias = "report interval")]
    pub report_interval: u64,
    #[serde(default)]
    pub color: Option<Value>,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

fn default_report_interval() -> u64 {
    DEFAULT_REPORT_INTERVAL_SECS
}

/// A rule paired with the templates it sends when it fires.
#[derive(Debug, Clone)]
pub struct RuleBinding {
    pub rule: PushRule,
    pub contents: PushContents,
}

impl SourceConfig {
    /// Interval override, if set to something usable.
    pub fn interval(&self) -> Option<Duration> {
        let secs = self.interval.filter(|s| *s > 0.0)?;
        match Duration::try_from_secs_f64(secs) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(interval = secs, error = %e, "ignoring interval override");
                None
            }
        }
    }

    /// Colour override. An unparsable value is logged and ignored.
    pub fn color(&self) -> Option<u32> {
        let raw = self.color.as_ref()?;
        match parse_color(raw) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring colour override");
                None
            }
        }
    }

    /// Resolve `push_rules` (or `push_contents` with the source's default
    /// rule). Entries with a malformed rule are dropped with a warning.
    pub fn bindings(&self, name: &str, source: &dyn SnapshotSource) -> Vec<RuleBinding> {
        let known_fields = source.template_fields();
        let bindings: Vec<RuleBinding> = match (&self.push_rules, &self.push_contents) {
            (Some(rules), _) => rules
                .iter()
                .enumerate()
                .filter_map(|(idx, rc)| match source.parse_rule(&rc.rule) {
                    Ok(rule) => Some(RuleBinding {
                        rule,
                        contents: parse_push_contents(&rc.contents),
                    }),
                    Err(e) => {
                        tracing::warn!(source = %name, index = idx, error = %format!("{e:#}"), "invalid push rule, skipping");
                        None
                    }
                })
                .collect(),
            (None, Some(contents)) => vec![RuleBinding {
                rule: source.default_rule(),
                contents: parse_push_contents(contents),
            }],
            (None, None) => {
                tracing::warn!(source = %name, "no push contents configured, source will only report");
                Vec::new()
            }
        };

        if let Some(known) = known_fields {
            for binding in &bindings {
                for (dest, template) in &binding.contents {
                    for field in template.fields() {
                        if !known.iter().any(|k| k == field) {
                            tracing::warn!(source = %name, destination = %dest, field, "template uses a field this source does not provide");
                        }
                    }
                }
            }
        }
        bindings
    }
}

/// Accepts `0xRRGGBB`, `#RRGGBB`, `RRGGBB` or an integer.
pub fn parse_color(raw: &Value) -> Result<u32, ConfigError> {
    match raw {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v <= 0xff_ffff)
            .ok_or_else(|| ConfigError::Color(n.to_string())),
        Value::String(s) => {
            let t = s.trim();
            let hex = t
                .strip_prefix("0x")
                .or_else(|| t.strip_prefix("0X"))
                .or_else(|| t.strip_prefix('#'))
                .unwrap_or(t);
            if hex.len() != 6 {
                return Err(ConfigError::Color(s.clone()));
            }
            u32::from_str_radix(hex, 16).map_err(|_| ConfigError::Color(s.clone()))
        }
        other => Err(ConfigError::Color(other.to_string())),
    }
}

/// `--path` wins, then `$STREAM_NOTIFIER_CONFIG`, then `config.yml`.
pub fn resolve_path(cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load and parse a config file. The format follows the extension; anything
/// other than `.toml` or `.json` is read as YAML.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.to_path_buf(),
        err,
    })?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_config(&content, ext.as_str()).map_err(|(format, message)| {
        ConfigError::Parse {
            format,
            path: path.to_path_buf(),
            message,
        }
    })?;
    if cfg.sources.is_empty() {
        return Err(ConfigError::NoSources);
    }
    Ok(cfg)
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig, (&'static str, String)> {
    match hint_ext {
        "toml" => toml::from_str(s).map_err(|e| ("TOML", e.to_string())),
        "json" => serde_json::from_str(s).map_err(|e| ("JSON", e.to_string())),
        _ => serde_yaml::from_str(s).map_err(|e| ("YAML", e.to_string())),
    }
}
