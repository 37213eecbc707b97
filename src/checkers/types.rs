// src/checkers/types.rs
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use crate::rules::PushRule;
use crate::snapshot::{display_value, Snapshot};

/// A polled external source (a channel, an account, a file).
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Human-readable type name used in reports.
    fn type_name(&self) -> &'static str;

    /// Interval used when the config does not override it.
    fn check_interval(&self) -> Duration;

    /// Report accent colour (0xRRGGBB).
    fn color(&self) -> u32;

    /// Fetch the current state. `Ok(None)` means there is nothing to report
    /// (e.g. the channel is offline).
    async fn run_check(&self, previous: &Snapshot) -> Result<Option<Snapshot>>;

    /// Add derived fields (links, shortened text, ...).
    fn process_result(&self, _snapshot: &mut Snapshot) {}

    /// Label/value pairs shown in reports.
    fn summary(&self, snapshot: &Snapshot) -> Vec<(String, String)>;

    /// Rule used when the config has no `push_rules`.
    fn default_rule(&self) -> PushRule;

    /// Build a rule from a `push_rules[].rule` entry.
    fn parse_rule(&self, rule: &Value) -> Result<PushRule>;

    /// Field names templates may use, when the source has a fixed shape.
    fn template_fields(&self) -> Option<Vec<String>> {
        None
    }
}

/// `(label, value-of-field)` pairs for [`SnapshotSource::summary`].
pub fn summary_of(snapshot: &Snapshot, labels: &[(&str, &str)]) -> Vec<(String, String)> {
    labels
        .iter()
        .map(|(label, field)| {
            let value = snapshot.get(field).map(display_value).unwrap_or_default();
            (label.to_string(), value)
        })
        .collect()
}

/// Top-level keys of a record type's default serialization plus `derived`.
pub fn record_fields<T: Default + serde::Serialize>(derived: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = match serde_json::to_value(T::default()) {
        Ok(Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    };
    out.extend(derived.iter().map(|s| s.to_string()));
    out
}
