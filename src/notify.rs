//! Outbound notifications — job start/completion notices over SMTP.
//!
//! Delivery failures are logged by the caller and never fail the job.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;
use uuid::Uuid;

use crate::config::NotifyConfig;
use crate::error::NotifyError;

/// Which lifecycle point a notice describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Start,
    Completion,
}

/// Job metadata carried in a notice.
#[derive(Debug, Clone)]
pub struct JobNotice {
    pub job_id: Uuid,
    pub date_range: String,
    /// Final row count; only set on completion.
    pub row_count: Option<usize>,
}

/// Sends job notifications. Pure I/O, no job logic.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: NotificationKind, notice: &JobNotice) -> Result<(), NotifyError>;
}

/// SMTP notifier using lettre.
pub struct SmtpNotifier {
    config: NotifyConfig,
}

impl SmtpNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }

    fn compose(kind: NotificationKind, notice: &JobNotice) -> (String, String) {
        match kind {
            NotificationKind::Start => (
                format!("[상담 보고서] 작업 시작 ({})", notice.date_range),
                format!(
                    "상담 보고서 작업 {}이(가) 시작되었습니다.\n기간: {}\n",
                    notice.job_id, notice.date_range
                ),
            ),
            NotificationKind::Completion => (
                format!("[상담 보고서] 작업 완료 ({})", notice.date_range),
                format!(
                    "상담 보고서 작업 {}이(가) 완료되었습니다.\n기간: {}\n기록 수: {}\n",
                    notice.job_id,
                    notice.date_range,
                    notice.row_count.unwrap_or(0)
                ),
            ),
        }
    }

    /// Send an email via SMTP (blocking — run in spawn_blocking).
    fn send_email(config: &NotifyConfig, subject: &str, body: &str) -> Result<(), NotifyError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| NotifyError::Delivery {
                transport: "smtp".into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| NotifyError::Build(format!("invalid from address: {e}")))?,
            )
            .to(config
                .to_address
                .parse()
                .map_err(|e| NotifyError::Build(format!("invalid to address: {e}")))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| NotifyError::Build(format!("failed to build email: {e}")))?;

        transport.send(&email).map_err(|e| NotifyError::Delivery {
            transport: "smtp".into(),
            reason: format!("SMTP send failed: {e}"),
        })?;

        info!(to = %config.to_address, "Notification sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, kind: NotificationKind, notice: &JobNotice) -> Result<(), NotifyError> {
        let (subject, body) = Self::compose(kind, notice);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || Self::send_email(&config, &subject, &body))
            .await
            .map_err(|e| NotifyError::Delivery {
                transport: "smtp".into(),
                reason: format!("send task panicked: {e}"),
            })?
    }
}
