//! Configuration types, built from environment variables.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Service-level settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Port for the HTTP/WebSocket API.
    pub http_port: u16,
    /// Maximum number of jobs processing concurrently; submissions beyond
    /// this stay pending until a worker slot frees up.
    pub max_parallel_jobs: usize,
    /// Directory where report artifacts are written.
    pub report_dir: std::path::PathBuf,
    /// Per-job event broadcast buffer (slow listeners lag past this).
    pub event_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            max_parallel_jobs: 4,
            report_dir: std::path::PathBuf::from("./reports"),
            event_buffer: 256,
        }
    }
}

impl ServiceConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let http_port = std::env::var("CONSULT_HTTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.http_port);

        let max_parallel_jobs = std::env::var("CONSULT_MAX_PARALLEL_JOBS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_parallel_jobs);

        let report_dir = std::env::var("CONSULT_REPORT_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or(defaults.report_dir);

        Self {
            http_port,
            max_parallel_jobs,
            report_dir,
            event_buffer: defaults.event_buffer,
        }
    }
}

/// Mailbox (IMAP) connection settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Address whose replies count as consultation responses.
    /// Defaults to `username`.
    pub owner_address: String,
}

impl MailboxConfig {
    /// Build config from environment variables.
    ///
    /// `CONSULT_IMAP_HOST` and `CONSULT_IMAP_USERNAME` / `CONSULT_IMAP_PASSWORD`
    /// are required; everything else has defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = std::env::var("CONSULT_IMAP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("CONSULT_IMAP_HOST".into()))?;

        let imap_port: u16 = std::env::var("CONSULT_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("CONSULT_IMAP_USERNAME")
            .map_err(|_| ConfigError::MissingEnvVar("CONSULT_IMAP_USERNAME".into()))?;

        let password = std::env::var("CONSULT_IMAP_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("CONSULT_IMAP_PASSWORD".into()))?;

        let owner_address =
            std::env::var("CONSULT_OWNER_ADDRESS").unwrap_or_else(|_| username.clone());

        Ok(Self {
            imap_host,
            imap_port,
            username,
            password: SecretString::from(password),
            owner_address,
        })
    }
}

/// Outbound notification (SMTP) settings.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Recipient of start/completion notices.
    pub to_address: String,
}

impl NotifyConfig {
    /// Build config from environment variables.
    /// Returns `None` if `CONSULT_SMTP_HOST` is not set (notifications disabled).
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("CONSULT_SMTP_HOST").ok()?;

        let smtp_port: u16 = std::env::var("CONSULT_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("CONSULT_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("CONSULT_SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("CONSULT_NOTIFY_FROM").unwrap_or_else(|_| username.clone());
        let to_address = std::env::var("CONSULT_NOTIFY_TO").unwrap_or_else(|_| from_address.clone());

        Some(Self {
            smtp_host,
            smtp_port,
            username,
            password: SecretString::from(password),
            from_address,
            to_address,
        })
    }
}
