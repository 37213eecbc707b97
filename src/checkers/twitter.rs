// src/checkers/twitter.rs
//! New posts from a set of accounts via the X/Twitter API v2 recent search.

use std::cmp::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{record_fields, summary_of, SnapshotSource};
use crate::rules::{Cancelled, Evaluation, PushRule, RecordRule, Verdict};
use crate::snapshot::Snapshot;

const SEARCH_URL: &str = "https://api.twitter.com/2/tweets/search/recent";

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Usernames {
    One(String),
    Many(Vec<String>),
}

impl Usernames {
    fn normalized(self) -> Vec<String> {
        let names = match self {
            Usernames::One(n) => vec![n],
            Usernames::Many(v) => v,
        };
        names
            .into_iter()
            .map(|n| n.trim().trim_start_matches('@').to_lowercase())
            .filter(|n| !n.is_empty())
            .collect()
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitterCheckerConfig {
    #[serde(alias = "bearer token")]
    pub bearer_token: String,
    #[serde(alias = "usernames")]
    username: Usernames,
    #[serde(default = "default_true", alias = "include retweets")]
    pub include_retweets: bool,
    #[serde(default = "default_true", alias = "include quoted")]
    pub include_quoted: bool,
    #[serde(default = "default_true", alias = "include replies")]
    pub include_replies: bool,
    #[serde(default, alias = "skip tags")]
    pub skip_tags: Vec<String>,
}

/// A post with the fields the rule and templates need.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    pub author_id: String,
    pub user_screen_name: String,
    pub created_at: String,
    pub retweeted: bool,
    pub quoted: bool,
    pub in_reply_to_user_id: Option<String>,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TwitterRule {
    pub usernames: Vec<String>,
    pub include_retweets: bool,
    pub include_quoted: bool,
    pub include_replies: bool,
    pub skip_tags: Vec<String>,
}

/// `push_rules[].rule` entry; unset fields inherit the source's settings.
#[derive(Debug, Default, Deserialize)]
struct TwitterRulePatch {
    #[serde(alias = "usernames")]
    username: Option<Usernames>,
    #[serde(alias = "include retweets")]
    include_retweets: Option<bool>,
    #[serde(alias = "include quoted")]
    include_quoted: Option<bool>,
    #[serde(alias = "include replies")]
    include_replies: Option<bool>,
    #[serde(alias = "skip tags")]
    skip_tags: Option<Vec<String>>,
}

impl TwitterRule {
    fn patched(&self, patch: TwitterRulePatch) -> Self {
        Self {
            usernames: patch
                .username
                .map(Usernames::normalized)
                .unwrap_or_else(|| self.usernames.clone()),
            include_retweets: patch.include_retweets.unwrap_or(self.include_retweets),
            include_quoted: patch.include_quoted.unwrap_or(self.include_quoted),
            include_replies: patch.include_replies.unwrap_or(self.include_replies),
            skip_tags: patch.skip_tags.unwrap_or_else(|| self.skip_tags.clone()),
        }
    }

    fn matches_user(&self, screen_name: &str) -> bool {
        let name = screen_name.to_lowercase();
        self.usernames.iter().any(|u| *u == name)
    }
}

/// Post ids are decimal strings of growing value.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

impl RecordRule for TwitterRule {
    type Record = Tweet;

    fn identity_field(&self) -> Option<&'static str> {
        Some("id")
    }

    fn check(&self, previous: &Tweet, current: &Tweet) -> Evaluation {
        if previous.id.is_empty() {
            return Err(Cancelled::new("Last notified ID does not exist!"));
        }
        if current.id == previous.id {
            return Ok(Verdict::Suppress);
        }
        if !self.matches_user(&current.user_screen_name) {
            return Ok(Verdict::Suppress);
        }
        if current.retweeted && !self.include_retweets {
            return Ok(Verdict::Suppress);
        }
        if current.quoted && !self.include_quoted {
            return Ok(Verdict::Suppress);
        }
        if current.in_reply_to_user_id.is_some() && !self.include_replies {
            return Ok(Verdict::Suppress);
        }
        if let Some(tag) = current.hashtags.iter().find(|t| self.skip_tags.contains(t)) {
            return Err(Cancelled::new(format!("Hashtag is skipped! #{tag}")));
        }
        if compare_ids(&current.id, &previous.id) == Ordering::Greater {
            Ok(Verdict::Notify)
        } else {
            Ok(Verdict::Suppress)
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<ApiTweet>,
    #[serde(default)]
    includes: Includes,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ApiTweet {
    id: String,
    text: String,
    #[serde(default)]
    author_id: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    in_reply_to_user_id: Option<String>,
    #[serde(default)]
    referenced_tweets: Vec<ReferencedTweet>,
    #[serde(default)]
    entities: Option<Entities>,
}

#[derive(Debug, Deserialize)]
struct ReferencedTweet {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct Entities {
    #[serde(default)]
    hashtags: Vec<Hashtag>,
}

#[derive(Debug, Deserialize)]
struct Hashtag {
    tag: String,
}

impl ApiTweet {
    fn into_tweet(self, users: &[ApiUser]) -> Tweet {
        let screen_name = users
            .iter()
            .find(|u| u.id == self.author_id)
            .map(|u| u.username.clone())
            .unwrap_or_default();
        let has_ref = |kind: &str| self.referenced_tweets.iter().any(|r| r.kind == kind);
        Tweet {
            retweeted: has_ref("retweeted"),
            quoted: has_ref("quoted"),
            hashtags: self
                .entities
                .map(|e| e.hashtags.into_iter().map(|h| h.tag).collect())
                .unwrap_or_default(),
            id: self.id,
            text: self.text,
            author_id: self.author_id,
            user_screen_name: screen_name,
            created_at: self.created_at,
            in_reply_to_user_id: self.in_reply_to_user_id,
        }
    }
}

pub struct TwitterChecker {
    cfg: TwitterCheckerConfig,
    rule: TwitterRule,
    http: Client,
}

impl TwitterChecker {
    pub fn new(cfg: TwitterCheckerConfig) -> Self {
        let rule = TwitterRule {
            usernames: cfg.username.clone().normalized(),
            include_retweets: cfg.include_retweets,
            include_quoted: cfg.include_quoted,
            include_replies: cfg.include_replies,
            skip_tags: cfg.skip_tags.clone(),
        };
        tracing::info!(targets = %rule.usernames.join(", "), "twitter check targets");
        Self {
            cfg,
            rule,
            http: Client::new(),
        }
    }

    fn query(&self) -> String {
        let from: Vec<String> = self
            .rule
            .usernames
            .iter()
            .map(|u| format!("from:{u}"))
            .collect();
        format!("({})", from.join(" OR "))
    }
}

/// Pick the oldest post newer than `last_id`, or the newest one when there is
/// no previous id. `tweets` is newest first, as the API returns it.
fn next_tweet(tweets: Vec<Tweet>, last_id: Option<&str>) -> Option<Tweet> {
    match last_id {
        None => tweets.into_iter().next(),
        Some(last) => tweets
            .into_iter()
            .rev()
            .find(|t| compare_ids(&t.id, last) == Ordering::Greater),
    }
}

#[async_trait::async_trait]
impl SnapshotSource for TwitterChecker {
    fn type_name(&self) -> &'static str {
        "TwitterChecker"
    }

    fn check_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn color(&self) -> u32 {
        0x00acee
    }

    async fn run_check(&self, previous: &Snapshot) -> Result<Option<Snapshot>> {
        let last_id = previous.get_str("id").filter(|s| !s.is_empty());
        let query = self.query();
        let mut params = vec![
            ("query", query.as_str()),
            (
                "tweet.fields",
                "created_at,entities,referenced_tweets,in_reply_to_user_id,author_id",
            ),
            ("expansions", "author_id"),
            ("user.fields", "username"),
            ("max_results", "10"),
        ];
        if let Some(id) = last_id {
            params.push(("since_id", id));
        }

        let resp: SearchResponse = self
            .http
            .get(SEARCH_URL)
            .timeout(Duration::from_secs(5))
            .query(&params)
            .bearer_auth(&self.cfg.bearer_token)
            .send()
            .await
            .context("twitter search request")?
            .error_for_status()
            .context("twitter search non-2xx")?
            .json()
            .await
            .context("twitter search body")?;

        let users = resp.includes.users;
        let tweets: Vec<Tweet> = resp
            .data
            .into_iter()
            .map(|t| t.into_tweet(&users))
            .collect();
        match next_tweet(tweets, last_id) {
            Some(t) => Ok(Some(Snapshot::from_record(&t)?)),
            None => Ok(None),
        }
    }

    fn process_result(&self, snapshot: &mut Snapshot) {
        let user = snapshot.get_str("user_screen_name").unwrap_or_default().to_string();
        let id = snapshot.get_str("id").unwrap_or_default().to_string();
        // vxtwitter renders proper embeds on Discord and Telegram.
        snapshot.derive(
            "url",
            Value::String(format!("https://vxtwitter.com/{user}/status/{id}")),
        );
        // Zero-width joiner keeps Telegram from linking @mentions.
        let text = snapshot.get_str("text").unwrap_or_default().replace('@', "@\u{200c}");
        snapshot.derive("text_no_mention", Value::String(text));
    }

    fn summary(&self, snapshot: &Snapshot) -> Vec<(String, String)> {
        summary_of(snapshot, &[("User", "user_screen_name"), ("URL", "url")])
    }

    fn default_rule(&self) -> PushRule {
        PushRule::Twitter(self.rule.clone())
    }

    fn parse_rule(&self, rule: &Value) -> Result<PushRule> {
        let patch: TwitterRulePatch = if rule.is_null() {
            TwitterRulePatch::default()
        } else {
            serde_json::from_value(rule.clone()).context("invalid twitter push rule")?
        };
        Ok(PushRule::Twitter(self.rule.patched(patch)))
    }

    fn template_fields(&self) -> Option<Vec<String>> {
        Some(record_fields::<Tweet>(&["url", "text_no_mention"]))
    }
}
