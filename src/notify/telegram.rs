use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use html_escape::encode_text;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{parse_settings, require_non_empty, Notifier, Report};

const API_BASE: &str = "https://api.telegram.org";

/// A numeric chat id or a public `@channelusername`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Handle(String),
}

impl ChatId {
    /// Numeric form, when there is one to compare against `getUpdates`.
    fn numeric(&self) -> Option<i64> {
        match self {
            ChatId::Id(id) => Some(*id),
            ChatId::Handle(h) => h.trim().parse().ok(),
        }
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatId::Id(id) => write!(f, "{id}"),
            ChatId::Handle(h) => f.write_str(h),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ChatIds {
    One(ChatId),
    Many(Vec<ChatId>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSettings {
    token: String,
    #[serde(alias = "chat id")]
    chat_id: ChatIds,
    #[serde(default)]
    pin: bool,
    #[serde(default, alias = "skip verify")]
    skip_verify: bool,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a ChatId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    message: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

pub struct TelegramNotifier {
    token: String,
    chat_ids: Vec<ChatId>,
    pin: bool,
    skip_verify: bool,
    client: Client,
}

impl TelegramNotifier {
    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        let s: TelegramSettings = parse_settings(settings)?;
        require_non_empty("telegram token", &s.token)?;
        let chat_ids = match s.chat_id {
            ChatIds::One(id) => vec![id],
            ChatIds::Many(ids) => ids,
        };
        if chat_ids.is_empty() {
            anyhow::bail!("telegram chat id list is empty");
        }
        if chat_ids
            .iter()
            .any(|c| matches!(c, ChatId::Handle(h) if h.trim().is_empty()))
        {
            anyhow::bail!("telegram chat id must not be blank");
        }
        Ok(Self {
            token: s.token,
            chat_ids,
            pin: s.pin,
            skip_verify: s.skip_verify,
            client: Client::new(),
        })
    }

    async fn call<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T> {
        let resp: ApiResponse<T> = self
            .client
            .post(format!("{API_BASE}/bot{}/{method}", self.token))
            .timeout(Duration::from_secs(10))
            .json(body)
            .send()
            .await
            .with_context(|| format!("telegram {method} request"))?
            .json()
            .await
            .with_context(|| format!("telegram {method} body"))?;
        if !resp.ok {
            return Err(anyhow!(
                "telegram {method} failed: {}",
                resp.description.unwrap_or_default()
            ));
        }
        resp.result
            .ok_or_else(|| anyhow!("telegram {method} returned no result"))
    }

    async fn send_to(&self, chat_id: &ChatId, text: &str, html: bool) -> Result<SentMessage> {
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: html.then_some("HTML"),
        };
        self.call("sendMessage", &body).await
    }

    /// Send to every chat, logging per-chat failures. Fails only when no chat
    /// received the message.
    async fn broadcast(&self, text: &str, html: bool, pin: bool) -> Result<()> {
        let mut delivered = 0usize;
        for chat_id in &self.chat_ids {
            match self.send_to(chat_id, text, html).await {
                Ok(msg) => {
                    delivered += 1;
                    tracing::info!(%chat_id, "notified to telegram chat");
                    if pin {
                        let body = serde_json::json!({"chat_id": chat_id, "message_id": msg.message_id});
                        if let Err(e) = self.call::<_, bool>("pinChatMessage", &body).await {
                            tracing::error!(%chat_id, error = %format!("{e:#}"), "failed to pin message");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(%chat_id, error = %format!("{e:#}"), "failed to send telegram message");
                }
            }
        }
        if delivered == 0 {
            anyhow::bail!("telegram message reached none of {} chats", self.chat_ids.len());
        }
        Ok(())
    }
}

/// HTML body for a report: bold title, description, bold labels.
fn report_html(report: &Report) -> String {
    let mut lines = Vec::new();
    if !report.title.is_empty() {
        lines.push(format!("<b>{}</b>", encode_text(&report.title)));
        lines.push(String::new());
    }
    if let Some(desc) = report.description.as_deref().filter(|d| !d.is_empty()) {
        lines.push(encode_text(desc).to_string());
        lines.push(String::new());
    }
    for (label, value) in &report.fields {
        if !label.is_empty() {
            lines.push(format!("<b>{}</b>", encode_text(label)));
        }
        if !value.is_empty() {
            lines.push(encode_text(value).to_string());
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn verify(&self) -> Result<()> {
        if self.skip_verify {
            tracing::info!("skip telegram token verification");
            return Ok(());
        }
        let updates: Vec<Update> = self
            .call("getUpdates", &serde_json::json!({}))
            .await
            .context("telegram token verification")?;
        let visible: HashSet<i64> = updates
            .into_iter()
            .filter_map(|u| u.message.map(|m| m.chat.id))
            .collect();
        let missing = self
            .chat_ids
            .iter()
            .filter(|c| c.numeric().is_some_and(|id| !visible.contains(&id)));
        for chat_id in missing {
            tracing::warn!(%chat_id, "cannot find chat id, is the bot added to the group?");
        }
        tracing::info!(
            visible = visible.len(),
            configured = self.chat_ids.len(),
            "verification of telegram token completed"
        );
        Ok(())
    }

    async fn send(&self, content: &str) -> Result<()> {
        self.broadcast(content, false, self.pin).await
    }

    async fn report(&self, report: &Report) -> Result<()> {
        self.broadcast(&report_html(report), true, false).await
    }

    fn kind(&self) -> &'static str {
        "telegram"
    }
}
