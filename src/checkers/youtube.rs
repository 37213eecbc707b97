// src/checkers/youtube.rs
//! Active broadcasts of the authorised YouTube channel (Data API v3).

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use super::types::{record_fields, summary_of, SnapshotSource};
use crate::rules::{Cancelled, Evaluation, PushRule, RecordRule, Verdict};
use crate::snapshot::Snapshot;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const BROADCASTS_URL: &str = "https://www.googleapis.com/youtube/v3/liveBroadcasts";

#[derive(Debug, Clone, Deserialize)]
pub struct YoutubeCheckerConfig {
    #[serde(alias = "client id")]
    pub client_id: String,
    #[serde(alias = "client secret")]
    pub client_secret: String,
    #[serde(alias = "refresh token")]
    pub refresh_token: String,
}

/// A live broadcast flattened from its `snippet` and `status` parts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct YoutubeBroadcast {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub scheduled_start_time: Option<String>,
    pub actual_start_time: Option<String>,
    pub privacy_status: String,
    pub life_cycle_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct YoutubeRule {}

impl RecordRule for YoutubeRule {
    type Record = YoutubeBroadcast;

    fn identity_field(&self) -> Option<&'static str> {
        Some("id")
    }

    fn check(&self, previous: &YoutubeBroadcast, current: &YoutubeBroadcast) -> Evaluation {
        if current.id == previous.id {
            return Ok(Verdict::Suppress);
        }
        if current.title == previous.title {
            return Err(Cancelled::new("YouTube stream title did not change!"));
        }
        if current.privacy_status == "private" {
            return Err(Cancelled::new("YouTube Stream is private!"));
        }
        Ok(Verdict::Notify)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct BroadcastList {
    #[serde(default)]
    items: Vec<BroadcastItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastItem {
    id: String,
    #[serde(default)]
    snippet: BroadcastSnippet,
    #[serde(default)]
    status: BroadcastStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BroadcastSnippet {
    channel_id: String,
    title: String,
    description: String,
    scheduled_start_time: Option<String>,
    actual_start_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BroadcastStatus {
    privacy_status: String,
    life_cycle_status: String,
}

impl From<BroadcastItem> for YoutubeBroadcast {
    fn from(item: BroadcastItem) -> Self {
        Self {
            id: item.id,
            channel_id: item.snippet.channel_id,
            title: item.snippet.title,
            description: item.snippet.description,
            scheduled_start_time: item.snippet.scheduled_start_time,
            actual_start_time: item.snippet.actual_start_time,
            privacy_status: item.status.privacy_status,
            life_cycle_status: item.status.life_cycle_status,
        }
    }
}

pub struct YoutubeChecker {
    cfg: YoutubeCheckerConfig,
    http: Client,
    token: Mutex<Option<(String, Instant)>>,
}

impl YoutubeChecker {
    pub fn new(cfg: YoutubeCheckerConfig) -> Self {
        tracing::info!("youtube checker configured for the authorised channel");
        Self {
            cfg,
            http: Client::new(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some((token, expires_at)) = guard.as_ref() {
            if *expires_at > Instant::now() {
                return Ok(token.clone());
            }
        }
        let resp: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .timeout(Duration::from_secs(10))
            .form(&[
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
                ("refresh_token", self.cfg.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("youtube token request")?
            .error_for_status()
            .context("youtube token non-2xx")?
            .json()
            .await
            .context("youtube token body")?;

        let expires_at = Instant::now() + Duration::from_secs(resp.expires_in.saturating_sub(60));
        *guard = Some((resp.access_token.clone(), expires_at));
        Ok(resp.access_token)
    }
}

#[async_trait::async_trait]
impl SnapshotSource for YoutubeChecker {
    fn type_name(&self) -> &'static str {
        "YoutubeChecker"
    }

    fn check_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn color(&self) -> u32 {
        0xff0000
    }

    async fn run_check(&self, _previous: &Snapshot) -> Result<Option<Snapshot>> {
        let token = self.access_token().await?;
        let list: BroadcastList = self
            .http
            .get(BROADCASTS_URL)
            .timeout(Duration::from_secs(10))
            .query(&[
                ("part", "id,snippet,status"),
                ("broadcastStatus", "active"),
                ("broadcastType", "all"),
                ("maxResults", "1"),
            ])
            .bearer_auth(token)
            .send()
            .await
            .context("youtube liveBroadcasts request")?
            .error_for_status()
            .context("youtube liveBroadcasts non-2xx")?
            .json()
            .await
            .context("youtube liveBroadcasts body")?;

        match list.items.into_iter().next() {
            Some(item) => {
                let broadcast = YoutubeBroadcast::from(item);
                tracing::debug!(id = %broadcast.id, title = %broadcast.title, "active broadcast");
                Ok(Some(Snapshot::from_record(&broadcast)?))
            }
            None => Ok(None),
        }
    }

    fn process_result(&self, snapshot: &mut Snapshot) {
        if let Some(id) = snapshot.get_str("id").map(str::to_string) {
            snapshot.derive("link", Value::String(format!("https://youtu.be/{id}")));
        }
        let first_line = snapshot
            .get_str("description")
            .map(|d| d.trim().lines().next().unwrap_or_default().to_string());
        if let Some(line) = first_line {
            snapshot.derive("description_first_line", Value::String(line));
        }
    }

    fn summary(&self, snapshot: &Snapshot) -> Vec<(String, String)> {
        summary_of(
            snapshot,
            &[
                ("Started", "actual_start_time"),
                ("Title", "title"),
                ("Privacy", "privacy_status"),
                ("Link", "link"),
                ("Live", "life_cycle_status"),
            ],
        )
    }

    fn default_rule(&self) -> PushRule {
        PushRule::Youtube(YoutubeRule::default())
    }

    fn parse_rule(&self, rule: &Value) -> Result<PushRule> {
        let rule: YoutubeRule = if rule.is_null() {
            YoutubeRule::default()
        } else {
            serde_json::from_value(rule.clone()).context("invalid youtube push rule")?
        };
        Ok(PushRule::Youtube(rule))
    }

    fn template_fields(&self) -> Option<Vec<String>> {
        Some(record_fields::<YoutubeBroadcast>(&[
            "link",
            "description_first_line",
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast(id: &str, title: &str, privacy: &str) -> YoutubeBroadcast {
        YoutubeBroadcast {
            id: id.into(),
            title: title.into(),
            privacy_status: privacy.into(),
            ..Default::default()
        }
    }

    #[test]
    fn same_broadcast_is_suppressed() {
        let r = YoutubeRule::default();
        let b = broadcast("v1", "Hi", "public");
        assert_eq!(r.check(&b, &b), Ok(Verdict::Suppress));
    }

    #[test]
    fn same_title_or_private_is_cancelled() {
        let r = YoutubeRule::default();
        let prev = broadcast("v1", "Hi", "public");
        assert_eq!(
            r.check(&prev, &broadcast("v2", "Hi", "public")),
            Err(Cancelled::new("YouTube stream title did not change!"))
        );
        assert_eq!(
            r.check(&prev, &broadcast("v2", "New", "private")),
            Err(Cancelled::new("YouTube Stream is private!"))
        );
        assert_eq!(
            r.check(&prev, &broadcast("v2", "New", "unlisted")),
            Ok(Verdict::Notify)
        );
    }

    #[test]
    fn api_item_is_flattened() {
        let item: BroadcastItem = serde_json::from_value(serde_json::json!({
            "id": "v9",
            "snippet": {"title": "T", "description": "line one\nline two", "actualStartTime": "2024-05-01T10:00:00Z"},
            "status": {"privacyStatus": "public", "lifeCycleStatus": "live"}
        }))
        .unwrap();
        let b = YoutubeBroadcast::from(item);
        assert_eq!(b.actual_start_time.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(b.life_cycle_status, "live");

        let checker = YoutubeChecker::new(YoutubeCheckerConfig {
            client_id: "c".into(),
            client_secret: "s".into(),
            refresh_token: "r".into(),
        });
        let mut snap = Snapshot::from_record(&b).unwrap();
        checker.process_result(&mut snap);
        assert_eq!(snap.get_str("link"), Some("https://youtu.be/v9"));
        assert_eq!(snap.get_str("description_first_line"), Some("line one"));
    }
}
