//! Delegate errors.

use thiserror::Error;

/// Mail transport errors.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Invalid sender: {0}")]
    InvalidSender(String),

    #[error("Transport error: {0}")]
    Transport(String),
}
