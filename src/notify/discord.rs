use super::{parse_settings, require_non_empty, Notifier, Report};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordSettings {
    #[serde(alias = "webhook url")]
    pub webhook_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub max_retries: u8,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retries() -> u8 {
    3
}

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        let s: DiscordSettings = parse_settings(settings)?;
        require_non_empty("discord webhook url", &s.webhook_url)?;
        Ok(Self::new(s.webhook_url)
            .with_timeout(s.timeout_secs)
            .with_retries(s.max_retries))
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn post(&self, payload: &DiscordWebhookPayload) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("Discord webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Discord webhook request failed: {e}"));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn verify(&self) -> Result<()> {
        tracing::info!("verification of discord webhook url started");
        self.client
            .get(&self.webhook)
            .timeout(self.timeout)
            .send()
            .await
            .context("discord webhook verify request")?
            .error_for_status()
            .context("discord webhook verification failed")?;
        tracing::info!("verification of discord webhook url complete");
        Ok(())
    }

    async fn send(&self, content: &str) -> Result<()> {
        self.post(&DiscordWebhookPayload::content(content)).await?;
        tracing::info!("notified to discord webhook");
        Ok(())
    }

    async fn report(&self, report: &Report) -> Result<()> {
        self.post(&DiscordWebhookPayload::embed(report)).await
    }

    fn kind(&self) -> &'static str {
        "discord"
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct DiscordField {
    name: String,
    value: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct DiscordEmbed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
    timestamp: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<DiscordField>,
}

#[derive(Debug, Serialize, PartialEq)]
struct DiscordWebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn content(text: &str) -> Self {
        Self {
            content: Some(text.to_string()),
            embeds: Vec::new(),
        }
    }

    fn embed(report: &Report) -> Self {
        // Discord rejects embed fields with an empty value.
        let fields = report
            .fields
            .iter()
            .map(|(name, value)| DiscordField {
                name: name.clone(),
                value: if value.is_empty() { "-".to_string() } else { value.clone() },
            })
            .collect();
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: report.title.clone(),
                description: report.description.clone(),
                color: report.color,
                timestamp: chrono::Utc::now().to_rfc3339(),
                fields,
            }],
        }
    }
}
