//! Liveness posts: after each cycle a source may POST its cached JSON to an
//! external URL. Posts run in the background and are rate limited.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use tokio::task::JoinSet;

use super::antiflutter::Cooldown;

pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 20;
const POST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Heartbeat {
    url: String,
    client: Client,
    cooldown: Cooldown,
    tasks: JoinSet<()>,
}

impl Heartbeat {
    pub fn new(url: impl Into<String>, interval_secs: u64) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            cooldown: Cooldown::new(i64::try_from(interval_secs).unwrap_or(i64::MAX)),
            tasks: JoinSet::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Schedule a post of `body` unless one went out within the interval.
    /// Returns whether a post was scheduled.
    pub fn beat(&mut self, source: &str, body: String) -> bool {
        self.reap();
        let now = Utc::now();
        if !self.cooldown.should_fire(now) {
            return false;
        }
        self.cooldown.record(now);

        let client = self.client.clone();
        let url = self.url.clone();
        let source = source.to_string();
        self.tasks.spawn(async move {
            match post(&client, &url, body).await {
                Ok(()) => tracing::debug!(source = %source, "heartbeat sent"),
                Err(e) => tracing::warn!(source = %source, error = %format!("{e:#}"), "heartbeat failed"),
            }
        });
        true
    }

    /// Drop handles of posts that already finished.
    pub fn reap(&mut self) {
        while let Some(res) = self.tasks.try_join_next() {
            if let Err(e) = res {
                tracing::warn!(error = %e, "heartbeat task panicked");
            }
        }
    }

    /// Wait for outstanding posts, aborting whatever is left after `timeout`.
    pub async fn drain(&mut self, timeout: Duration) {
        let wait = async { while self.tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(timeout, wait).await.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "heartbeat drain timed out, aborting");
            self.tasks.abort_all();
        }
    }
}

async fn post(client: &Client, url: &str, body: String) -> Result<()> {
    client
        .post(url)
        .timeout(POST_TIMEOUT)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .context("heartbeat post")?
        .error_for_status()
        .context("heartbeat non-2xx")?;
    Ok(())
}
