// src/checkers/twitch.rs
//! Twitch live status via the Helix API (app access token).

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

use super::types::{record_fields, summary_of, SnapshotSource};
use crate::rules::{Cancelled, Evaluation, PushRule, RecordRule, Verdict};
use crate::snapshot::Snapshot;

const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const HELIX_URL: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Clone, Deserialize)]
pub struct PollingApi {
    #[serde(alias = "twitch app id")]
    pub twitch_app_id: String,
    #[serde(alias = "twitch app secret")]
    pub twitch_app_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchCheckerConfig {
    #[serde(alias = "channel name")]
    pub channel_name: String,
    #[serde(alias = "polling api")]
    pub polling_api: PollingApi,
}

/// One entry of `GET /helix/streams`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TwitchStream {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub game_id: String,
    pub game_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub viewer_count: u64,
    pub started_at: String,
    pub language: String,
    pub thumbnail_url: String,
    pub tags: Vec<String>,
    pub is_mature: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TwitchRule {}

impl RecordRule for TwitchRule {
    type Record = TwitchStream;

    fn identity_field(&self) -> Option<&'static str> {
        Some("started_at")
    }

    fn check(&self, previous: &TwitchStream, current: &TwitchStream) -> Evaluation {
        if current.kind != "live" {
            return Ok(Verdict::Suppress);
        }
        // A stream is identified by its start time, not its id.
        if current.started_at == previous.started_at {
            return Ok(Verdict::Suppress);
        }
        if current.title == previous.title {
            return Err(Cancelled::new("Twitch stream title did not change!"));
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
struct HelixList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
}

struct AppToken {
    value: String,
    expires_at: Instant,
}

pub struct TwitchChecker {
    cfg: TwitchCheckerConfig,
    http: Client,
    token: Mutex<Option<AppToken>>,
    user_id: OnceCell<String>,
}

impl TwitchChecker {
    pub fn new(cfg: TwitchCheckerConfig) -> Self {
        tracing::info!(channel = %cfg.channel_name, "twitch checker target channel");
        Self {
            cfg,
            http: Client::new(),
            token: Mutex::new(None),
            user_id: OnceCell::new(),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(t) = guard.as_ref() {
            if t.expires_at > Instant::now() {
                return Ok(t.value.clone());
            }
        }

        let resp: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .timeout(Duration::from_secs(10))
            .form(&[
                ("client_id", self.cfg.polling_api.twitch_app_id.as_str()),
                ("client_secret", self.cfg.polling_api.twitch_app_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .context("twitch token request")?
            .error_for_status()
            .context("twitch token non-2xx")?
            .json()
            .await
            .context("twitch token body")?;

        // Refresh a minute early.
        let ttl = Duration::from_secs(resp.expires_in.saturating_sub(60));
        let value = resp.access_token.clone();
        *guard = Some(AppToken {
            value: resp.access_token,
            expires_at: Instant::now() + ttl,
        });
        Ok(value)
    }

    async fn helix_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<HelixList<T>> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(format!("{HELIX_URL}/{path}"))
            .timeout(Duration::from_secs(10))
            .query(query)
            .header("Client-Id", &self.cfg.polling_api.twitch_app_id)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("helix {path} request"))?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            *self.token.lock().await = None;
            return Err(anyhow!("helix {path}: token rejected"));
        }
        resp.error_for_status()
            .with_context(|| format!("helix {path} non-2xx"))?
            .json()
            .await
            .with_context(|| format!("helix {path} body"))
    }

    async fn user_id(&self) -> Result<&str> {
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let users: HelixList<HelixUser> = self
                    .helix_get("users", &[("login", self.cfg.channel_name.as_str())])
                    .await?;
                users
                    .data
                    .into_iter()
                    .next()
                    .map(|u| u.id)
                    .ok_or_else(|| anyhow!("twitch user {} not found", self.cfg.channel_name))
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait::async_trait]
impl SnapshotSource for TwitchChecker {
    fn type_name(&self) -> &'static str {
        "TwitchChecker"
    }

    fn check_interval(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn color(&self) -> u32 {
        0xa364fe
    }

    async fn run_check(&self, _previous: &Snapshot) -> Result<Option<Snapshot>> {
        let user_id = self.user_id().await?.to_string();
        let streams: HelixList<TwitchStream> =
            self.helix_get("streams", &[("user_id", user_id.as_str())]).await?;
        match streams.data.first() {
            Some(stream) => Ok(Some(Snapshot::from_record(stream)?)),
            None => Ok(None),
        }
    }

    fn process_result(&self, snapshot: &mut Snapshot) {
        let login = snapshot
            .get_str("user_login")
            .filter(|s| !s.is_empty())
            .unwrap_or(self.cfg.channel_name.as_str())
            .to_string();
        snapshot.derive("link", Value::String(format!("https://www.twitch.tv/{login}")));
    }

    fn summary(&self, snapshot: &Snapshot) -> Vec<(String, String)> {
        summary_of(
            snapshot,
            &[
                ("Started", "started_at"),
                ("Title", "title"),
                ("Type", "type"),
                ("Content", "game_name"),
                ("Viewers", "viewer_count"),
                ("Link", "link"),
            ],
        )
    }

    fn default_rule(&self) -> PushRule {
        PushRule::Twitch(TwitchRule::default())
    }

    fn parse_rule(&self, rule: &Value) -> Result<PushRule> {
        let rule: TwitchRule = if rule.is_null() {
            TwitchRule::default()
        } else {
            serde_json::from_value(rule.clone()).context("invalid twitch push rule")?
        };
        Ok(PushRule::Twitch(rule))
    }

    fn template_fields(&self) -> Option<Vec<String>> {
        Some(record_fields::<TwitchStream>(&["link"]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(kind: &str, started_at: &str, title: &str) -> TwitchStream {
        TwitchStream {
            id: "A".into(),
            kind: kind.into(),
            started_at: started_at.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    #[test]
    fn new_start_with_new_title_notifies() {
        let r = TwitchRule::default();
        let out = r.check(&stream("live", "T1", "X"), &stream("live", "T2", "Y"));
        assert_eq!(out, Ok(Verdict::Notify));
    }

    #[test]
    fn title_change_without_new_start_is_suppressed() {
        let r = TwitchRule::default();
        let out = r.check(&stream("live", "T1", "X"), &stream("live", "T1", "Y"));
        assert_eq!(out, Ok(Verdict::Suppress));
    }

    #[test]
    fn new_start_with_same_title_is_cancelled() {
        let r = TwitchRule::default();
        let out = r.check(&stream("live", "T1", "X"), &stream("live", "T2", "X"));
        assert_eq!(out, Err(Cancelled::new("Twitch stream title did not change!")));
    }

    #[test]
    fn non_live_is_suppressed() {
        let r = TwitchRule::default();
        let out = r.check(&TwitchStream::default(), &stream("", "T2", "Y"));
        assert_eq!(out, Ok(Verdict::Suppress));
    }

    #[test]
    fn config_accepts_spaced_keys() {
        let cfg: TwitchCheckerConfig = serde_json::from_value(serde_json::json!({
            "channel name": "kat",
            "polling api": {"twitch app id": "id", "twitch app secret": "secret"}
        }))
        .unwrap();
        assert_eq!(cfg.channel_name, "kat");
        assert_eq!(cfg.polling_api.twitch_app_secret, "secret");
    }

    #[test]
    fn link_is_derived_from_login() {
        let checker = TwitchChecker::new(TwitchCheckerConfig {
            channel_name: "fallback".into(),
            polling_api: PollingApi {
                twitch_app_id: "id".into(),
                twitch_app_secret: "s".into(),
            },
        });
        let mut snap = Snapshot::from_record(&TwitchStream {
            user_login: "kat".into(),
            ..Default::default()
        })
        .unwrap();
        checker.process_result(&mut snap);
        assert_eq!(snap.get_str("link"), Some("https://www.twitch.tv/kat"));
    }
}
