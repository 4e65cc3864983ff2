//! Raw message types and the fetcher contract.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

/// A single fetched mailbox message. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Message-ID header value (unique within one fetch).
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Primary recipient address.
    pub recipient: String,
    /// Decoded subject line.
    pub subject: String,
    /// Send timestamp from the Date header.
    pub timestamp: DateTime<Utc>,
    /// Decoded plain-text body.
    pub body: String,
    /// The In-Reply-To header value, if present.
    pub in_reply_to: Option<String>,
    /// Message-IDs from the References header.
    pub references: Vec<String>,
}

impl RawMessage {
    /// The identifier of the message this one replies to, if any.
    ///
    /// In-Reply-To is authoritative; the first References token is a
    /// fallback for clients that only set the latter.
    pub fn reply_reference(&self) -> Option<&str> {
        self.in_reply_to
            .as_deref()
            .or_else(|| self.references.first().map(String::as_str))
    }

    /// Whether this message is a reply at all.
    pub fn is_reply(&self) -> bool {
        self.reply_reference().is_some()
    }
}

/// Inclusive date range for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Whether a timestamp falls within the range (end date inclusive,
    /// through 23:59:59).
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let date = ts.date_naive();
        date >= self.start && date <= self.end
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Fetches the raw messages for a job. Pure I/O, no filtering logic.
#[async_trait]
pub trait MailFetcher: Send + Sync {
    /// Fetch all messages in the date range, in mailbox order.
    async fn fetch(&self, range: DateRange) -> Result<Vec<RawMessage>, MailboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(in_reply_to: Option<&str>, references: &[&str]) -> RawMessage {
        RawMessage {
            id: "<m1@test>".into(),
            sender: "student@univ.edu".into(),
            recipient: "prof@univ.edu".into(),
            subject: "상담 요청".into(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap(),
            body: "본문".into(),
            in_reply_to: in_reply_to.map(String::from),
            references: references.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn reply_reference_prefers_in_reply_to() {
        let msg = message(Some("<a@test>"), &["<b@test>", "<c@test>"]);
        assert_eq!(msg.reply_reference(), Some("<a@test>"));
    }

    #[test]
    fn reply_reference_falls_back_to_references() {
        let msg = message(None, &["<b@test>", "<c@test>"]);
        assert_eq!(msg.reply_reference(), Some("<b@test>"));
    }

    #[test]
    fn no_reply_reference_for_original() {
        let msg = message(None, &[]);
        assert_eq!(msg.reply_reference(), None);
        assert!(!msg.is_reply());
    }

    #[test]
    fn date_range_contains_end_of_day() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        );
        assert!(range.contains(Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()));
    }
}
