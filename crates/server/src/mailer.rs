use std::time::Duration;

use async_trait::async_trait;

pub const OTP_EMAIL_SUBJECT: &str = "Your Meetly.AI Verification Code";

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail request timed out")]
    Timeout,
    #[error("mail HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("mail provider returned status {0}")]
    BadStatus(reqwest::StatusCode),
}

impl From<reqwest::Error> for MailError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            MailError::Timeout
        } else {
            MailError::Http(value)
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError>;
}

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub base_url: String,
    pub api_key: String,
    pub from_email: String,
    pub from_name: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct SendGridMailer {
    http: reqwest::Client,
    send_url: String,
    api_key: String,
    from_email: String,
    from_name: String,
}

impl SendGridMailer {
    pub fn new(config: SendGridConfig) -> Result<Self, MailError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MailError::Http)?;

        Ok(Self {
            http,
            send_url: format!("{}/v3/mail/send", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
            from_email: config.from_email,
            from_name: config.from_name,
        })
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        let resp = self
            .http
            .post(&self.send_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "personalizations": [{ "to": [{ "email": to }] }],
                "from": { "email": self.from_email, "name": self.from_name },
                "subject": subject,
                "content": [{ "type": "text/html", "value": html_body }],
            }))
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::ACCEPTED {
            return Err(MailError::BadStatus(status));
        }

        Ok(())
    }
}

/// Development mailer: records that a message would have gone out, never its body.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), MailError> {
        tracing::info!(recipient = %to, subject = %subject, "mail delivery skipped (log mailer)");
        Ok(())
    }
}

pub fn otp_email_body(code: &str, ttl: Duration) -> String {
    let minutes = ttl.as_secs().div_ceil(60).max(1);
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    format!(
        "<h2 style='color:#4F46E5;'>Meetly.AI Dashboard</h2>\n\
         <p>Your One-Time Password (OTP) is:</p>\n\
         <h3 style='color:#4F46E5;letter-spacing:3px;'>{code}</h3>\n\
         <p>This code will expire in <b>{minutes} {unit}</b>.</p>\n\
         <p>Thank you,<br><b>Meetly.AI Team</b></p>"
    )
}
