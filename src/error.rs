//! Error types for Consult Report.

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox fetch errors. The only two variants that fail a job.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailboxError {
    #[error("Authentication failed for {mailbox}: {reason}")]
    Authentication { mailbox: String, reason: String },

    #[error("Transport failure talking to {host}: {reason}")]
    Transport { host: String, reason: String },
}

/// Job lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },
}

/// Report serialization errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Notification delivery errors. Logged, never fatal to a job.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to build notification message: {0}")]
    Build(String),

    #[error("Delivery failed via {transport}: {reason}")]
    Delivery { transport: String, reason: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
