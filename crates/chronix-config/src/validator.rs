//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Fail on the first error, otherwise hand back the warnings.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_database(config, &mut result);
        Self::validate_dispatcher(config, &mut result);
        Self::validate_workers(config, &mut result);
        Self::validate_reminder(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.port == 0 {
            result.add_error(ValidationError::new("server.port", "Port cannot be 0"));
        }

        if config.server.host.is_empty() {
            result.add_error(ValidationError::new("server.host", "Host cannot be empty"));
        }
    }

    fn validate_database(config: &Config, result: &mut ValidationResult) {
        if config.database.in_memory {
            result.add_warning(ValidationWarning::new(
                "database.in_memory",
                "Tasks are kept in memory and will be lost on restart",
            ));
        } else if config.database.path.trim().is_empty() {
            result.add_error(ValidationError::new(
                "database.path",
                "path cannot be empty unless in_memory is set",
            ));
        }
    }

    fn validate_dispatcher(config: &Config, result: &mut ValidationResult) {
        let dispatcher = &config.dispatcher;

        if dispatcher.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "dispatcher.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }

        if dispatcher.lease_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "dispatcher.lease_timeout_secs",
                "lease_timeout_secs must be greater than 0",
            ));
        }

        if dispatcher.batch_size == 0 {
            result.add_error(ValidationError::new(
                "dispatcher.batch_size",
                "batch_size must be greater than 0",
            ));
        }

        if dispatcher.lease_timeout_secs > 0
            && dispatcher.lease_timeout_secs <= config.workers.handler_timeout_secs
        {
            result.add_warning(ValidationWarning::new(
                "dispatcher.lease_timeout_secs",
                format!(
                    "lease_timeout_secs ({}) does not exceed workers.handler_timeout_secs ({}); \
                     slow handlers may see their tasks redispatched",
                    dispatcher.lease_timeout_secs, config.workers.handler_timeout_secs
                ),
            ));
        }
    }

    fn validate_workers(config: &Config, result: &mut ValidationResult) {
        let workers = &config.workers;

        if workers.concurrency == 0 {
            result.add_error(ValidationError::new(
                "workers.concurrency",
                "concurrency must be greater than 0",
            ));
        }

        if workers.queue_capacity == 0 {
            result.add_error(ValidationError::new(
                "workers.queue_capacity",
                "queue_capacity must be greater than 0",
            ));
        }

        if workers.handler_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "workers.handler_timeout_secs",
                "handler_timeout_secs must be greater than 0",
            ));
        }

        if workers.queue_capacity < config.dispatcher.batch_size {
            result.add_warning(ValidationWarning::new(
                "workers.queue_capacity",
                "queue_capacity is smaller than dispatcher.batch_size; full batches will be released and retried",
            ));
        }
    }

    fn validate_reminder(config: &Config, result: &mut ValidationResult) {
        if !config.reminder.sender.contains('@') {
            result.add_error(ValidationError::new(
                "reminder.sender",
                format!("'{}' is not an email address", config.reminder.sender),
            ));
        }

        if config.reminder.subject.trim().is_empty() {
            result.add_warning(ValidationWarning::new(
                "reminder.subject",
                "Reminder emails will have an empty subject",
            ));
        }

        let Some(smtp) = &config.reminder.smtp else {
            return;
        };
        if smtp.host.trim().is_empty() {
            result.add_error(ValidationError::new(
                "reminder.smtp.host",
                "SMTP host must not be empty",
            ));
        }
        if smtp.port == 0 {
            result.add_error(ValidationError::new(
                "reminder.smtp.port",
                "SMTP port must be greater than 0",
            ));
        }
        match (&smtp.username, &smtp.password) {
            (None, Some(_)) => result.add_error(ValidationError::new(
                "reminder.smtp.password",
                "password is set but username is missing",
            )),
            (Some(_), None) => result.add_warning(ValidationWarning::new(
                "reminder.smtp.password",
                "username is set without a password; authenticating with an empty password",
            )),
            _ => {}
        }
        if !smtp.starttls {
            result.add_warning(ValidationWarning::new(
                "reminder.smtp.starttls",
                "SMTP traffic, including credentials, will be sent unencrypted",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) && !level.contains('=') {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', valid values: {:?}",
                    config.logging.level, LOG_LEVELS
                ),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
