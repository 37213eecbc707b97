use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{parse_settings, require_non_empty, Notifier, Report};

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    #[serde(alias = "smtp host")]
    pub smtp_host: String,
    #[serde(alias = "smtp user")]
    pub smtp_user: String,
    #[serde(alias = "smtp pass")]
    pub smtp_pass: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_subject() -> String {
    "Stream notification".to_string()
}

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    subject: String,
}

impl EmailSender {
    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        let s: EmailSettings = parse_settings(settings)?;
        require_non_empty("smtp host", &s.smtp_host)?;
        require_non_empty("smtp user", &s.smtp_user)?;

        let creds = Credentials::new(s.smtp_user, s.smtp_pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&s.smtp_host)
            .context("invalid smtp host")?
            .credentials(creds)
            .build();

        let from: Mailbox = s.from.parse().context("invalid email from address")?;
        let to: Mailbox = s.to.parse().context("invalid email to address")?;

        Ok(Self {
            mailer,
            from,
            to,
            subject: s.subject,
        })
    }

    async fn deliver(&self, subject: String, body: String) -> Result<()> {
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}

fn report_body(report: &Report) -> String {
    let mut body = String::new();
    if let Some(desc) = &report.description {
        body.push_str(desc);
        body.push_str("\n\n");
    }
    for (label, value) in &report.fields {
        body.push_str(&format!("{label}: {value}\n"));
    }
    body
}

#[async_trait::async_trait]
impl Notifier for EmailSender {
    async fn verify(&self) -> Result<()> {
        let ok = self
            .mailer
            .test_connection()
            .await
            .context("smtp connection test")?;
        if !ok {
            anyhow::bail!("smtp server refused the connection test");
        }
        Ok(())
    }

    async fn send(&self, content: &str) -> Result<()> {
        self.deliver(self.subject.clone(), content.to_string()).await
    }

    async fn report(&self, report: &Report) -> Result<()> {
        self.deliver(report.title.clone(), report_body(report)).await
    }

    fn kind(&self) -> &'static str {
        "email"
    }
}
