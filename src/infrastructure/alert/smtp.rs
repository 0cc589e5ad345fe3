use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::AlertChannel;
use crate::common::error::AlertError;
use crate::config::settings::SmtpConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Email alerts over an authenticated STARTTLS relay.
#[derive(Clone)]
pub struct SmtpAlertChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpAlertChannel {
    pub fn new(config: &SmtpConfig) -> Result<Self, AlertError> {
        let from = parse_mailbox(&config.from)?;
        let to = parse_mailbox(&config.to)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| AlertError::Delivery(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        info!("📧 Alert channel configured via {}:{}", config.host, config.port);
        Ok(Self { transport, from, to })
    }
}

#[async_trait]
impl AlertChannel for SmtpAlertChannel {
    async fn send(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        let message = build_message(&self.from, &self.to, subject, body)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| AlertError::Delivery(e.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, AlertError> {
    raw.trim()
        .parse::<Mailbox>()
        .map_err(|e| AlertError::Address(format!("{raw}: {e}")))
}

fn build_message(
    from: &Mailbox,
    to: &Mailbox,
    subject: &str,
    body: &str,
) -> Result<Message, AlertError> {
    Message::builder()
        .from(from.clone())
        .to(to.clone())
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| AlertError::Message(e.to_string()))
}
