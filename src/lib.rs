//! Consult Report — consultation mailbox report engine.
//!
//! Fetches a mailbox's messages for a date range, reconstructs
//! request/response consultation pairs, filters them through a staged
//! content pipeline, and materializes the survivors into a tabular report —
//! all off the request path, with live progress streaming to any number of
//! listeners.

pub mod config;
pub mod error;
pub mod jobs;
pub mod mailbox;
pub mod notify;
pub mod pipeline;
pub mod report;
