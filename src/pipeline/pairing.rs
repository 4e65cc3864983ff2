//! Conversation pairing — matches owner replies back to their requests.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::mailbox::RawMessage;

/// A matched request/response message combination.
#[derive(Debug, Clone)]
pub struct ConversationPair {
    pub request: RawMessage,
    pub response: RawMessage,
}

/// Result of a pairing pass over one job's messages.
#[derive(Debug, Default)]
pub struct PairingOutcome {
    /// Pairs, in the order their responses appeared in the input.
    pub pairs: Vec<ConversationPair>,
    /// Owner replies whose reply reference did not resolve. Dropped, not
    /// errors — surfaced in the job snapshot for operability.
    pub unpaired_responses: usize,
}

/// Reconstruct request→response pairs from an unordered message set.
///
/// A message counts as a response when its sender matches the configured
/// mailbox owner and it carries a reply reference. The reference is resolved
/// against a Message-ID index of the full set; unresolved responses are
/// dropped and counted, never guessed.
pub fn pair_messages(messages: &[RawMessage], owner_address: &str) -> PairingOutcome {
    let mut by_id: HashMap<&str, &RawMessage> = HashMap::with_capacity(messages.len());
    for msg in messages {
        by_id.insert(msg.id.as_str(), msg);
    }
    info!(indexed = by_id.len(), "Built message-ID index");

    let mut outcome = PairingOutcome::default();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();

    for msg in messages {
        let Some(reference) = msg.reply_reference() else {
            continue;
        };
        if !msg.sender.contains(owner_address) {
            debug!(id = %msg.id, sender = %msg.sender, "Reply not from mailbox owner, skipping");
            continue;
        }

        match by_id.get(reference) {
            Some(request) if !seen.contains(&(request.id.as_str(), msg.id.as_str())) => {
                seen.insert((request.id.as_str(), msg.id.as_str()));
                debug!(
                    request = %request.id,
                    response = %msg.id,
                    "Pair created"
                );
                outcome.pairs.push(ConversationPair {
                    request: (*request).clone(),
                    response: msg.clone(),
                });
            }
            Some(_) => {
                debug!(id = %msg.id, "Duplicate (request, response) combination, skipping");
            }
            None => {
                debug!(id = %msg.id, reference = %reference, "Reply reference unresolved, dropping");
                outcome.unpaired_responses += 1;
            }
        }
    }

    info!(
        pairs = outcome.pairs.len(),
        unpaired = outcome.unpaired_responses,
        "Pairing complete"
    );
    outcome
}
