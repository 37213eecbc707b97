// src/change_detector.rs
//! The per-source polling loop: fetch a snapshot, compare it with the cached
//! one, report and push, then persist.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::counter;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time;

use crate::antiflutter::{AntiFlutter, DEFAULT_ERROR_THRESHOLD};
use crate::cache::CacheStore;
use crate::checkers::{SnapshotSource, SourceKind};
use crate::config::{RuleBinding, SourceConfig};
use crate::metrics::ensure_metrics_described;
use crate::notify::heartbeat::Heartbeat;
use crate::notify::{NotifierMux, Report};
use crate::rules::Verdict;
use crate::snapshot::Snapshot;
use crate::template::TemplateContext;

const HEARTBEAT_DRAIN: Duration = Duration::from_secs(5);

/// Result of one poll, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The source returned an error.
    Failed,
    /// Nothing to report this time.
    Empty,
    Evaluated {
        notified: usize,
        cancelled: usize,
        suppressed: usize,
    },
}

pub struct ChangeDetector {
    name: String,
    source: Box<dyn SnapshotSource>,
    cache: CacheStore,
    mux: Arc<NotifierMux>,
    bindings: Vec<RuleBinding>,
    report_to: Vec<String>,
    interval: Duration,
    color: u32,
    errors: AntiFlutter,
    heartbeat: Option<Heartbeat>,
}

impl ChangeDetector {
    pub fn new(
        name: impl Into<String>,
        source: Box<dyn SnapshotSource>,
        cache: CacheStore,
        mux: Arc<NotifierMux>,
    ) -> Self {
        let interval = source.check_interval();
        let color = source.color();
        Self {
            name: name.into(),
            source,
            cache,
            mux,
            bindings: Vec::new(),
            report_to: Vec::new(),
            interval,
            color,
            errors: AntiFlutter::new(DEFAULT_ERROR_THRESHOLD),
            heartbeat: None,
        }
    }

    /// Build the source named `name` from its config section.
    pub fn from_config(
        name: &str,
        cfg: &SourceConfig,
        cache: CacheStore,
        mux: Arc<NotifierMux>,
    ) -> Result<Self> {
        let kind: SourceKind = cfg.kind.parse()?;
        let source = kind
            .build(&cfg.settings)
            .with_context(|| format!("source {name}"))?;
        let bindings = cfg.bindings(name, source.as_ref());

        for dest in bindings.iter().flat_map(|b| b.contents.keys()).chain(cfg.report.iter()) {
            if !mux.contains(dest) {
                tracing::warn!(source = %name, destination = %dest, "push method is not configured");
            }
        }

        let mut detector = Self::new(name, source, cache, mux)
            .with_bindings(bindings)
            .report_to(cfg.report.clone());
        if let Some(interval) = cfg.interval() {
            detector = detector.interval(interval);
        }
        if let Some(color) = cfg.color() {
            detector = detector.color(color);
        }
        if let Some(url) = cfg.report_url.as_deref().filter(|u| !u.trim().is_empty()) {
            detector = detector.heartbeat(Heartbeat::new(url, cfg.report_interval));
        }
        Ok(detector)
    }

    pub fn with_bindings(mut self, bindings: Vec<RuleBinding>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn report_to(mut self, names: Vec<String>) -> Self {
        self.report_to = names;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    pub fn error_threshold(mut self, threshold: u32) -> Self {
        self.errors = AntiFlutter::new(threshold);
        self
    }

    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check_interval(&self) -> Duration {
        self.interval
    }

    /// Last persisted snapshot.
    pub async fn cached(&mut self) -> &Snapshot {
        self.cache.get().await
    }

    async fn report(&self, report: Report) {
        if self.report_to.is_empty() {
            tracing::debug!(source = %self.name, title = %report.title, "no report destinations");
            return;
        }
        self.mux.send_report(&self.report_to, &report).await;
    }

    /// Announce which destinations this loop will use.
    pub async fn startup(&self) {
        let push_names: BTreeSet<&str> = self
            .bindings
            .iter()
            .flat_map(|b| b.contents.keys().map(String::as_str))
            .collect();
        let report = Report::new("Stream Notifier Started")
            .color(self.color)
            .fields(vec![
                ("Push destinations".into(), self.mux.describe(push_names)),
                (
                    "Report destinations".into(),
                    self.mux.describe(self.report_to.iter().map(String::as_str)),
                ),
                ("Type".into(), self.source.type_name().into()),
                ("Check interval".into(), format!("{:?}", self.interval)),
            ]);
        tracing::info!(source = %self.name, kind = self.source.type_name(), interval = ?self.interval, "stream checker started");
        self.report(report).await;
    }

    /// One poll, from fetch to cache write.
    pub async fn run_once(&mut self) -> Result<CycleOutcome> {
        ensure_metrics_described();
        counter!("notifier_checks_total").increment(1);
        let type_name = self.source.type_name();
        let previous = self.cache.get().await.clone();

        let fetched = self.source.run_check(&previous).await;
        let found = match fetched {
            Err(e) => {
                counter!("notifier_check_errors_total").increment(1);
                let message = format!("{e:#}");
                let action = self.errors.record_failure(&message);
                if action.new_message {
                    tracing::warn!(source = %self.name, error = %message, "check failed");
                } else {
                    tracing::debug!(source = %self.name, count = self.errors.consecutive_errors(), "previous error still in effect");
                }
                if action.report_down {
                    tracing::error!(source = %self.name, count = self.errors.consecutive_errors(), "checker down");
                    self.report(
                        Report::new(format!("{type_name} checker down"))
                            .description(message)
                            .color(self.color),
                    )
                    .await;
                }
                return Ok(CycleOutcome::Failed);
            }
            Ok(found) => found,
        };

        if self.errors.record_success() {
            tracing::info!(source = %self.name, "checker recovered");
            self.report(
                Report::new(format!("{type_name} checker up"))
                    .description("Last exception cleared")
                    .color(self.color),
            )
            .await;
        }

        let Some(mut snapshot) = found else {
            tracing::debug!(source = %self.name, "nothing new");
            return Ok(CycleOutcome::Empty);
        };

        self.source.process_result(&mut snapshot);
        let summary = self.source.summary(&snapshot);
        let ctx = TemplateContext::from_snapshot(&snapshot);

        let (mut notified, mut cancelled, mut suppressed) = (0, 0, 0);
        for binding in &self.bindings {
            match binding.rule.evaluate(&previous, &snapshot) {
                Ok(Verdict::Notify) => {
                    notified += 1;
                    tracing::info!(source = %self.name, "stream found");
                    self.report(
                        Report::new(format!("Stream found for {type_name}"))
                            .color(self.color)
                            .fields(summary.clone()),
                    )
                    .await;
                    match self.mux.send_push(&binding.contents, &ctx).await {
                        Ok(out) => {
                            tracing::info!(source = %self.name, sent = out.sent, failed = out.failed, skipped = out.skipped, "push dispatched")
                        }
                        Err(e) => {
                            tracing::error!(source = %self.name, error = %e, "push failed");
                            self.report(
                                Report::new("Notification Push failed!❌")
                                    .description(format!("TemplateError: {e}"))
                                    .color(self.color),
                            )
                            .await;
                        }
                    }
                }
                Ok(Verdict::Suppress) => {
                    suppressed += 1;
                    tracing::debug!(source = %self.name, "no push needed");
                }
                Err(c) => {
                    cancelled += 1;
                    tracing::info!(source = %self.name, reason = %c.reason, "push cancelled");
                    self.report(
                        Report::new("Push notification cancelled!🚫")
                            .description(format!("Reason: {}", c.reason))
                            .color(self.color)
                            .fields(summary.clone()),
                    )
                    .await;
                }
            }
        }

        self.cache
            .set(&snapshot)
            .await
            .with_context(|| format!("saving cache for {}", self.name))?;

        Ok(CycleOutcome::Evaluated {
            notified,
            cancelled,
            suppressed,
        })
    }

    /// [`run_once`](Self::run_once) followed by a heartbeat.
    pub async fn tick(&mut self) -> Result<CycleOutcome> {
        let outcome = self.run_once().await;
        if let Some(hb) = self.heartbeat.as_mut() {
            let body = Value::Object(self.cache.get().await.to_persisted()).to_string();
            hb.beat(&self.name, body);
        }
        outcome
    }

    /// Poll until `shutdown` flips to true (or its sender goes away).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.startup().await;
        loop {
            tokio::select! {
                _ = time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            match self.tick().await {
                Ok(outcome) => tracing::trace!(source = %self.name, ?outcome, "cycle finished"),
                Err(e) => tracing::error!(source = %self.name, error = %format!("{e:#}"), "cycle failed"),
            }
        }
        if let Some(hb) = self.heartbeat.as_mut() {
            hb.drain(HEARTBEAT_DRAIN).await;
        }
        tracing::info!(source = %self.name, "stream checker stopped");
    }
}
