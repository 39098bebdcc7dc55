//! SMTP delivery.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use chronix_config::{ReminderConfig, SmtpConfig};

use crate::email::{Email, LogMailer, Mailer};
use crate::error::MailError;

#[cfg(test)]
#[path = "smtp_tests.rs"]
mod tests;

/// Mailer that relays through an SMTP server.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Transport(format!("SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port);
        if let Some(username) = &config.username {
            let password = config.password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self {
            transport: builder.build(),
            host: config.host.clone(),
        })
    }
}

/// Turn an [`Email`] into a plain-text MIME message.
pub(crate) fn build_message(email: &Email) -> Result<Message, MailError> {
    let from: Mailbox = email
        .from
        .parse()
        .map_err(|e| MailError::InvalidSender(format!("{}: {}", email.from, e)))?;
    let to: Mailbox = email
        .to
        .parse()
        .map_err(|_| MailError::InvalidRecipient(email.to.clone()))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())
        .map_err(|e| MailError::Transport(format!("Build email: {}", e)))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let message = build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(format!("SMTP send: {}", e)))?;

        info!("Email sent to {} via {}", email.to, self.host);
        Ok(())
    }
}

/// Mailer for the configured reminder transport.
///
/// Uses SMTP when `[reminder.smtp]` is present and falls back to the log.
pub fn mailer_from_config(config: &ReminderConfig) -> Result<Arc<dyn Mailer>, MailError> {
    match &config.smtp {
        Some(smtp) => {
            info!("Reminder emails relay through {}:{}", smtp.host, smtp.port);
            Ok(Arc::new(SmtpMailer::new(smtp)?))
        }
        None => {
            info!("No SMTP relay configured; reminder emails will be logged");
            Ok(Arc::new(LogMailer::new()))
        }
    }
}
