use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{parse_settings, require_non_empty, Notifier, Report};

#[derive(Debug, Clone, Deserialize)]
pub struct SlackSettings {
    #[serde(alias = "webhook url")]
    pub webhook_url: String,
}

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
}

impl SlackNotifier {
    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
        }
    }

    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        let s: SlackSettings = parse_settings(settings)?;
        require_non_empty("slack webhook url", &s.webhook_url)?;
        Ok(Self::new(s.webhook_url))
    }

    async fn post_text(&self, text: String) -> Result<()> {
        let body = serde_json::json!({ "text": text });
        self.client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }
}

/// Slack mrkdwn rendering of a report.
fn report_text(report: &Report) -> String {
    let mut lines = vec![format!("*{}*", report.title)];
    if let Some(desc) = &report.description {
        lines.push(desc.clone());
    }
    for (label, value) in &report.fields {
        lines.push(format!("*{label}:* {value}"));
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn verify(&self) -> Result<()> {
        // Incoming webhooks have no read endpoint; a POST would publish.
        tracing::debug!("slack webhook has no verification endpoint, skipping");
        Ok(())
    }

    async fn send(&self, content: &str) -> Result<()> {
        self.post_text(content.to_string()).await
    }

    async fn report(&self, report: &Report) -> Result<()> {
        self.post_text(report_text(report)).await
    }

    fn kind(&self) -> &'static str {
        "slack"
    }
}
