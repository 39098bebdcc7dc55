//! # Chronix Reminder
//!
//! Action delegates for the Chronix scheduler.
//!
//! ## Task types
//!
//! - `email:reminder`: send a reminder email through a [`Mailer`], either
//!   an SMTP relay or the log
//! - `notify:webhook`: POST a JSON body to a URL

pub mod email;
pub mod error;
pub mod smtp;
pub mod webhook;

use std::sync::Arc;

use chronix_config::ReminderConfig;
use chronix_core::{HandlerRegistry, SchedulerResult};

pub use email::{
    Email, EmailReminderHandler, EmailReminderPayload, LogMailer, Mailer, is_valid_email,
};
pub use error::MailError;
pub use smtp::{mailer_from_config, SmtpMailer};
pub use webhook::{WebhookHandler, WebhookPayload};

/// Task type for reminder emails.
pub const EMAIL_REMINDER: &str = "email:reminder";

/// Task type for webhook notifications.
pub const NOTIFY_WEBHOOK: &str = "notify:webhook";

/// Register every delegate in this crate.
pub fn register_all(
    registry: &mut HandlerRegistry,
    config: &ReminderConfig,
    mailer: Arc<dyn Mailer>,
) -> SchedulerResult<()> {
    registry.register(
        EMAIL_REMINDER,
        Arc::new(EmailReminderHandler::new(mailer, config)),
    )?;
    registry.register(NOTIFY_WEBHOOK, Arc::new(WebhookHandler::new()))?;
    Ok(())
}
