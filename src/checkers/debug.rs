// src/checkers/debug.rs
//! File-backed source for trying out rules and destinations locally.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::SnapshotSource;
use crate::rules::{Cancelled, Evaluation, PushRule, RecordRule, Verdict};
use crate::snapshot::{display_value, Snapshot};

#[derive(Debug, Clone, Deserialize)]
pub struct DebugCheckerConfig {
    /// YAML or JSON file holding the current state as a mapping.
    pub file: PathBuf,
}

/// Fields of the debug file the rule looks at. Everything else passes
/// through to templates untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugRecord {
    pub id: Value,
    #[serde(deserialize_with = "push_flag")]
    pub should_push: bool,
}

/// Anything but a literal `true` disables the push.
fn push_flag<'de, D: serde::Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    Ok(matches!(Value::deserialize(de)?, Value::Bool(true)))
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DebugRule {}

impl RecordRule for DebugRule {
    type Record = DebugRecord;

    fn identity_field(&self) -> Option<&'static str> {
        Some("id")
    }

    fn check(&self, previous: &DebugRecord, current: &DebugRecord) -> Evaluation {
        if current.id == previous.id {
            return Ok(Verdict::Suppress);
        }
        if !current.should_push {
            return Err(Cancelled::new("Push is disabled!"));
        }
        Ok(Verdict::Notify)
    }
}

pub struct DebugChecker {
    cfg: DebugCheckerConfig,
}

impl DebugChecker {
    pub fn new(cfg: DebugCheckerConfig) -> Self {
        tracing::info!(file = %cfg.file.display(), "debug checker target file");
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl SnapshotSource for DebugChecker {
    fn type_name(&self) -> &'static str {
        "DebugChecker"
    }

    fn check_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn color(&self) -> u32 {
        0x00ff00
    }

    async fn run_check(&self, _previous: &Snapshot) -> Result<Option<Snapshot>> {
        let text = tokio::fs::read_to_string(&self.cfg.file)
            .await
            .with_context(|| format!("reading {}", self.cfg.file.display()))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let data: Value = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", self.cfg.file.display()))?;
        match data {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            Value::Object(map) => Ok(Some(Snapshot::from_map(map))),
            other => anyhow::bail!("debug file must hold a mapping, got {other}"),
        }
    }

    fn summary(&self, snapshot: &Snapshot) -> Vec<(String, String)> {
        snapshot
            .fields()
            .map(|(k, v)| (k.to_string(), display_value(v)))
            .collect()
    }

    fn default_rule(&self) -> PushRule {
        PushRule::Debug(DebugRule::default())
    }

    fn parse_rule(&self, rule: &Value) -> Result<PushRule> {
        let rule: DebugRule = if rule.is_null() {
            DebugRule::default()
        } else {
            serde_json::from_value(rule.clone()).context("invalid debug push rule")?
        };
        Ok(PushRule::Debug(rule))
    }
}
