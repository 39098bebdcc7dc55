//! Reminder emails.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lettre::Address;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use chronix_config::ReminderConfig;
use chronix_core::{HandlerError, TaskHandler};

use crate::error::MailError;

#[cfg(test)]
#[path = "email_tests.rs"]
mod tests;

/// Payload of an `email:reminder` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailReminderPayload {
    pub owner_id: String,
    pub email: String,
    pub message: String,
}

impl EmailReminderPayload {
    pub fn new(
        owner_id: impl Into<String>,
        email: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            email: email.into(),
            message: message.into(),
        }
    }

    /// Parse and check a stored payload.
    pub fn parse(payload: &[u8]) -> Result<Self, HandlerError> {
        let parsed: Self = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::InvalidPayload(format!("failed to parse payload: {}", e)))?;

        if !is_valid_email(&parsed.email) {
            return Err(HandlerError::InvalidPayload(format!(
                "'{}' is not an email address",
                parsed.email
            )));
        }
        if parsed.message.trim().is_empty() {
            return Err(HandlerError::InvalidPayload(
                "message must not be empty".to_string(),
            ));
        }
        Ok(parsed)
    }
}

/// RFC 5322 address with a dotted domain.
pub fn is_valid_email(address: &str) -> bool {
    address.parse::<Address>().is_ok_and(|addr| {
        addr.domain()
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
    })
}

/// A plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Mailer that writes each message to the log instead of sending it.
#[derive(Debug, Default)]
pub struct LogMailer {
    sent: AtomicU64,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages logged so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        if !is_valid_email(&email.to) {
            return Err(MailError::InvalidRecipient(email.to.clone()));
        }
        info!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            "[EMAIL] {}",
            email.body
        );
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Handler for `email:reminder` tasks.
pub struct EmailReminderHandler {
    mailer: Arc<dyn Mailer>,
    sender: String,
    subject: String,
}

impl EmailReminderHandler {
    pub fn new(mailer: Arc<dyn Mailer>, config: &ReminderConfig) -> Self {
        Self {
            mailer,
            sender: config.sender.clone(),
            subject: config.subject.clone(),
        }
    }

    fn compose(&self, payload: EmailReminderPayload) -> Email {
        Email {
            from: self.sender.clone(),
            to: payload.email,
            subject: self.subject.clone(),
            body: payload.message,
        }
    }
}

#[async_trait]
impl TaskHandler for EmailReminderHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let payload = EmailReminderPayload::parse(payload)?;
        info!(
            "Sending reminder to owner {}: {}",
            payload.owner_id, payload.message
        );

        let email = self.compose(payload);
        self.mailer.send(&email).await.map_err(|e| {
            warn!("Failed to send reminder to {}: {}", email.to, e);
            HandlerError::Failed(e.to_string())
        })
    }
}
