// src/notify/mod.rs
//! Delivery backends and the mux that routes pushes and reports to them by
//! destination name.

pub mod antiflutter;
pub mod discord;
pub mod email;
pub mod heartbeat;
pub mod slack;
pub mod telegram;
pub mod twitter;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use metrics::counter;
use serde_json::{Map, Value};

use crate::config::{ConfigError, PushMethodConfig};
use crate::metrics::ensure_metrics_described;
use crate::template::{Template, TemplateContext, TemplateError};

/// An operational status message, distinct from a user-facing push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub title: String,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub fields: Vec<(String, String)>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn fields(mut self, fields: Vec<(String, String)>) -> Self {
        self.fields = fields;
        self
    }
}

/// A delivery backend bound to one destination.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Connectivity check.
    async fn verify(&self) -> Result<()> {
        Ok(())
    }

    /// Deliver a rendered push.
    async fn send(&self, content: &str) -> Result<()>;

    /// Deliver a status report.
    async fn report(&self, report: &Report) -> Result<()>;

    /// Release sessions/connections.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Discord,
    Telegram,
    Slack,
    Email,
    Twitter,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Discord,
        BackendKind::Telegram,
        BackendKind::Slack,
        BackendKind::Email,
        BackendKind::Twitter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Discord => "discord",
            BackendKind::Telegram => "telegram",
            BackendKind::Slack => "slack",
            BackendKind::Email => "email",
            BackendKind::Twitter => "twitter",
        }
    }

    /// Construct the backend; fails on missing or empty required settings.
    pub fn build(self, settings: &Map<String, Value>) -> Result<Arc<dyn Notifier>> {
        let n: Arc<dyn Notifier> = match self {
            BackendKind::Discord => Arc::new(discord::DiscordNotifier::from_settings(settings)?),
            BackendKind::Telegram => {
                Arc::new(telegram::TelegramNotifier::from_settings(settings)?)
            }
            BackendKind::Slack => Arc::new(slack::SlackNotifier::from_settings(settings)?),
            BackendKind::Email => Arc::new(email::EmailSender::from_settings(settings)?),
            BackendKind::Twitter => Arc::new(twitter::TwitterNotifier::from_settings(settings)?),
        };
        Ok(n)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownType {
                what: "push method",
                name: s.to_string(),
                valid: Self::ALL.map(BackendKind::as_str).join(", "),
            })
    }
}

/// Destination name → template, parsed at config load.
pub type PushContents = BTreeMap<String, Template>;

/// Parse a raw `push_contents` mapping. Entries with a broken template are
/// dropped with a warning.
pub fn parse_push_contents(raw: &BTreeMap<String, String>) -> PushContents {
    raw.iter()
        .filter_map(|(dest, text)| match Template::parse(text) {
            Ok(t) => Some((dest.clone(), t)),
            Err(e) => {
                tracing::warn!(destination = %dest, error = %e, "invalid push template, skipping");
                None
            }
        })
        .collect()
}

struct Destination {
    notifier: Arc<dyn Notifier>,
    comment: String,
}

/// One push about to be delivered.
pub struct PushTask {
    pub name: String,
    pub comment: String,
    pub content: String,
    pub test_mode: bool,
    notifier: Arc<dyn Notifier>,
}

impl PushTask {
    pub async fn send(&self) -> Result<()> {
        if self.test_mode {
            return Ok(());
        }
        self.notifier.send(&self.content).await
    }
}

impl fmt::Debug for PushTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushTask")
            .field("name", &self.name)
            .field("comment", &self.comment)
            .field("content", &self.content)
            .field("test_mode", &self.test_mode)
            .finish()
    }
}

/// Counts from one [`NotifierMux::send_push`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Routes pushes and reports to named destinations.
///
/// The destination map is fixed after construction and the mux is shared by
/// every source loop.
pub struct NotifierMux {
    destinations: BTreeMap<String, Destination>,
    test_mode: bool,
    closed: AtomicBool,
}

impl NotifierMux {
    pub fn new(test_mode: bool) -> Self {
        Self {
            destinations: BTreeMap::new(),
            test_mode,
            closed: AtomicBool::new(false),
        }
    }

    /// Build every configured destination. A destination that fails to
    /// construct is logged and left out; the others are unaffected.
    pub fn from_config(methods: &BTreeMap<String, PushMethodConfig>, test_mode: bool) -> Self {
        let mut mux = Self::new(test_mode);
        for (name, cfg) in methods {
            let built = cfg
                .kind
                .parse::<BackendKind>()
                .map_err(anyhow::Error::from)
                .and_then(|kind| kind.build(&cfg.settings).map(|n| (kind, n)));
            match built {
                Ok((kind, notifier)) => {
                    let comment = cfg.comment.clone().unwrap_or_else(|| kind.to_string());
                    mux.insert(name.clone(), notifier, comment);
                }
                Err(e) => {
                    tracing::warn!(destination = %name, error = %format!("{e:#}"), "push method not configured, skipping");
                }
            }
        }
        mux
    }

    /// Register a destination (replaces an existing one with the same name).
    pub fn insert(&mut self, name: impl Into<String>, notifier: Arc<dyn Notifier>, comment: impl Into<String>) {
        self.destinations.insert(
            name.into(),
            Destination {
                notifier,
                comment: comment.into(),
            },
        );
    }

    pub fn with(mut self, name: impl Into<String>, notifier: Arc<dyn Notifier>, comment: impl Into<String>) -> Self {
        self.insert(name, notifier, comment);
        self
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn contains(&self, name: &str) -> bool {
        self.destinations.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.destinations.keys().map(String::as_str)
    }

    pub fn comment(&self, name: &str) -> Option<&str> {
        self.destinations.get(name).map(|d| d.comment.as_str())
    }

    /// `name: comment` lines for the startup report.
    pub fn describe<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> String {
        names
            .into_iter()
            .map(|n| format!("{n}: {}", self.comment(n).unwrap_or("not configured")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn verify_all(&self) {
        for (name, dest) in &self.destinations {
            match dest.notifier.verify().await {
                Ok(()) => tracing::info!(destination = %name, kind = dest.notifier.kind(), "verified"),
                Err(e) => tracing::error!(
                    destination = %name,
                    kind = dest.notifier.kind(),
                    error = %format!("{e:#}"),
                    "error during verification"
                ),
            }
        }
    }

    /// Render every destination's template. Unconfigured destinations are
    /// counted as skipped; the first render error aborts.
    pub fn build_tasks(
        &self,
        contents: &PushContents,
        ctx: &TemplateContext,
    ) -> Result<(Vec<PushTask>, usize), TemplateError> {
        let mut tasks = Vec::with_capacity(contents.len());
        let mut skipped = 0;
        for (name, template) in contents {
            let content = template.render(ctx)?;
            let Some(dest) = self.destinations.get(name) else {
                tracing::warn!(destination = %name, "push method is not configured, skipping");
                skipped += 1;
                continue;
            };
            tasks.push(PushTask {
                name: name.clone(),
                comment: dest.comment.clone(),
                content,
                test_mode: self.test_mode,
                notifier: dest.notifier.clone(),
            });
        }
        Ok((tasks, skipped))
    }

    /// Render every template first, then deliver destination by destination.
    ///
    /// Only a render failure fails the call; backend errors are logged and
    /// counted per destination.
    pub async fn send_push(
        &self,
        contents: &PushContents,
        ctx: &TemplateContext,
    ) -> Result<DispatchSummary, TemplateError> {
        ensure_metrics_described();
        tracing::info!("notifier callback started");
        if self.test_mode {
            tracing::warn!("test mode enabled, will not push to platforms");
        }

        let (tasks, skipped) = self.build_tasks(contents, ctx)?;
        let mut summary = DispatchSummary {
            skipped,
            ..Default::default()
        };

        for task in tasks {
            if task.test_mode {
                tracing::info!(destination = %task.name, comment = %task.comment, content = %task.content, "test mode, skipping push");
                summary.skipped += 1;
                continue;
            }
            tracing::info!(destination = %task.name, comment = %task.comment, "pushing");
            match task.send().await {
                Ok(()) => {
                    counter!("notifier_push_sent_total").increment(1);
                    summary.sent += 1;
                }
                Err(e) => {
                    counter!("notifier_push_failed_total").increment(1);
                    tracing::error!(destination = %task.name, error = %format!("{e:#}"), "push failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Send one literal push to a single destination (`--push-test`).
    pub async fn send_one(&self, name: &str, content: &str) -> Result<()> {
        let dest = self
            .destinations
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("push method {name} is not configured"))?;
        if self.test_mode {
            tracing::info!(destination = %name, content, "test mode, skipping push");
            return Ok(());
        }
        dest.notifier.send(content).await
    }

    pub async fn send_report<S: AsRef<str>>(&self, names: &[S], report: &Report) {
        ensure_metrics_described();
        for name in names {
            let name = name.as_ref();
            let Some(dest) = self.destinations.get(name) else {
                tracing::warn!(destination = %name, "push method is not configured, skipping");
                continue;
            };
            tracing::info!(destination = %name, kind = dest.notifier.kind(), title = %report.title, "sending report");
            counter!("notifier_reports_total").increment(1);
            if let Err(e) = dest.notifier.report(report).await {
                tracing::error!(destination = %name, error = %format!("{e:#}"), "report failed");
            }
        }
    }

    /// Close every backend. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (name, dest) in &self.destinations {
            if let Err(e) = dest.notifier.close().await {
                tracing::warn!(destination = %name, error = %format!("{e:#}"), "close failed");
            }
        }
    }
}

/// Read backend settings into a typed config.
pub(crate) fn parse_settings<T: serde::de::DeserializeOwned>(
    settings: &Map<String, Value>,
) -> Result<T> {
    crate::checkers::parse_settings(settings)
}

/// Fail when a required setting is blank.
pub(crate) fn require_non_empty(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for Recorder {
        async fn send(&self, content: &str) -> Result<()> {
            self.sent.lock().push(content.to_string());
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
        async fn report(&self, _report: &Report) -> Result<()> {
            Ok(())
        }
        fn kind(&self) -> &'static str {
            "recorder"
        }
    }

    fn contents(pairs: &[(&str, &str)]) -> PushContents {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Template::parse(v).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_mode_sends_nothing() {
        let rec = Arc::new(Recorder::default());
        let mux = NotifierMux::new(true).with("d", rec.clone(), "discord");
        let out = mux
            .send_push(&contents(&[("d", "hi")]), &TemplateContext::new())
            .await
            .unwrap();
        assert_eq!(out.skipped, 1);
        assert!(rec.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn render_failure_fails_before_any_send() {
        let rec = Arc::new(Recorder::default());
        let mux = NotifierMux::new(false).with("a", rec.clone(), "a").with("b", rec.clone(), "b");
        let err = mux
            .send_push(&contents(&[("a", "ok"), ("b", "{missing}")]), &TemplateContext::new())
            .await
            .unwrap_err();
        assert_eq!(err, TemplateError::MissingField("missing".into()));
        assert!(rec.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_destination_is_skipped() {
        let rec = Arc::new(Recorder::default());
        let mux = NotifierMux::new(false).with("a", rec.clone(), "a");
        let out = mux
            .send_push(&contents(&[("a", "x"), ("ghost", "y")]), &TemplateContext::new())
            .await
            .unwrap();
        assert_eq!(out, DispatchSummary { sent: 1, failed: 0, skipped: 1 });
    }

    #[test]
    fn bad_push_methods_are_excluded_not_fatal() {
        let raw = serde_json::json!({
            "ok": {"type": "discord", "webhook url": "https://discord.invalid/api/webhooks/1/x"},
            "empty": {"type": "discord", "webhook url": ""},
            "unknown": {"type": "pigeon"}
        });
        let methods: BTreeMap<String, PushMethodConfig> = serde_json::from_value(raw).unwrap();
        let mux = NotifierMux::from_config(&methods, false);
        assert_eq!(mux.names().collect::<Vec<_>>(), vec!["ok"]);
        assert_eq!(mux.comment("ok"), Some("discord"));
    }

    #[test]
    fn twitter_backend_builds_from_spaced_key() {
        let kind: BackendKind = "Twitter".parse().unwrap();
        let settings = serde_json::json!({"access token": "tok"});
        let n = kind.build(settings.as_object().unwrap()).unwrap();
        assert_eq!(n.kind(), "twitter");
    }

    #[test]
    fn unknown_backend_lists_valid_types() {
        let msg = "pigeon".parse::<BackendKind>().unwrap_err().to_string();
        assert!(msg.contains("discord, telegram, slack, email, twitter"));
    }
}
