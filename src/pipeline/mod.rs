//! The processing pipeline: pairing → filters → field transform.

pub mod filters;
pub mod pairing;
pub mod transform;

pub use filters::{Extracted, FilterConfig, FilterPipeline, FilterVerdict, MatchMode};
pub use pairing::{ConversationPair, PairingOutcome, pair_messages};
pub use transform::transform;
