// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use stream_notifier::checkers::debug::DebugRule;
use stream_notifier::notify::{Notifier, Report};
use stream_notifier::rules::PushRule;
use stream_notifier::snapshot::Snapshot;
use stream_notifier::SnapshotSource;

/// Source that replays queued poll results, then reports nothing.
pub struct ScriptedSource {
    pub type_name: &'static str,
    pub rule: PushRule,
    replies: Mutex<VecDeque<Result<Option<Snapshot>>>>,
}

impl ScriptedSource {
    pub fn debug(replies: Vec<Result<Option<Snapshot>>>) -> Self {
        Self::with_rule("Debug", PushRule::Debug(DebugRule::default()), replies)
    }

    pub fn with_rule(
        type_name: &'static str,
        rule: PushRule,
        replies: Vec<Result<Option<Snapshot>>>,
    ) -> Self {
        Self {
            type_name,
            rule,
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait::async_trait]
impl SnapshotSource for ScriptedSource {
    fn type_name(&self) -> &'static str {
        self.type_name
    }
    fn check_interval(&self) -> Duration {
        Duration::from_millis(5)
    }
    fn color(&self) -> u32 {
        0x123456
    }
    async fn run_check(&self, _previous: &Snapshot) -> Result<Option<Snapshot>> {
        self.replies.lock().pop_front().unwrap_or(Ok(None))
    }
    fn summary(&self, snapshot: &Snapshot) -> Vec<(String, String)> {
        snapshot
            .fields()
            .map(|(k, v)| (k.to_string(), stream_notifier::snapshot::display_value(v)))
            .collect()
    }
    fn default_rule(&self) -> PushRule {
        self.rule.clone()
    }
    fn parse_rule(&self, _rule: &Value) -> Result<PushRule> {
        Ok(self.rule.clone())
    }
}

/// Notifier that records everything it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
    pub reports: Mutex<Vec<Report>>,
    pub closes: Mutex<usize>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn report_titles(&self) -> Vec<String> {
        self.reports.lock().iter().map(|r| r.title.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, content: &str) -> Result<()> {
        self.sent.lock().push(content.to_string());
        if self.fail {
            anyhow::bail!("backend rejected the push");
        }
        Ok(())
    }

    async fn report(&self, report: &Report) -> Result<()> {
        self.reports.lock().push(report.clone());
        if self.fail {
            anyhow::bail!("backend rejected the report");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closes.lock() += 1;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "recording"
    }
}

pub fn snap(v: Value) -> Snapshot {
    Snapshot::from_map(v.as_object().cloned().unwrap_or_default())
}
