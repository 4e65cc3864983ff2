//! Mailbox access — message types, the per-job store, and the IMAP fetcher.

pub mod imap;
pub mod store;
pub mod types;

pub use imap::ImapFetcher;
pub use store::MessageStore;
pub use types::{DateRange, MailFetcher, RawMessage};
