use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{parse_settings, require_non_empty, Notifier, Report};

const API_BASE: &str = "https://api.twitter.com/2";

/// Posting needs a user-context OAuth 2.0 token with the `tweet.write` scope.
#[derive(Debug, Clone, Deserialize)]
pub struct TwitterPushSettings {
    #[serde(alias = "access token")]
    pub access_token: String,
}

#[derive(Debug, Serialize)]
struct CreateTweet<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct Created {
    data: CreatedTweet,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    id: String,
}

/// Posts pushes as tweets. Reports are not posted.
pub struct TwitterNotifier {
    access_token: String,
    client: Client,
}

impl TwitterNotifier {
    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        let s: TwitterPushSettings = parse_settings(settings)?;
        require_non_empty("twitter access token", &s.access_token)?;
        Ok(Self {
            access_token: s.access_token,
            client: Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for TwitterNotifier {
    async fn verify(&self) -> Result<()> {
        self.client
            .get(format!("{API_BASE}/users/me"))
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("twitter users/me request")?
            .error_for_status()
            .context("twitter token verification")?;
        tracing::info!("verification of twitter token completed");
        Ok(())
    }

    async fn send(&self, content: &str) -> Result<()> {
        let created: Created = self
            .client
            .post(format!("{API_BASE}/tweets"))
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_secs(10))
            .json(&CreateTweet { text: content })
            .send()
            .await
            .context("twitter post")?
            .error_for_status()
            .context("twitter non-2xx")?
            .json()
            .await
            .context("twitter post body")?;
        tracing::info!(tweet_id = %created.data.id, "posted to twitter");
        Ok(())
    }

    async fn report(&self, report: &Report) -> Result<()> {
        tracing::debug!(title = %report.title, "twitter does not take reports, skipping");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "twitter"
    }
}
