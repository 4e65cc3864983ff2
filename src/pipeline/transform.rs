//! Field transformer — derives report rows from accepted pairs.
//!
//! Pure and total: absent optional fields degrade to empty strings, never
//! to errors.

use chrono::Timelike;

use crate::report::ReportRow;

use super::filters::Extracted;
use super::pairing::ConversationPair;

/// Consultation slots start no earlier than this (minutes from midnight).
const BUSINESS_FLOOR_MIN: u32 = 9 * 60;
/// Start time forced onto requests that land before the floor.
const BUSINESS_FLOOR_START: u32 = 9 * 60 + 5;
/// Consultation slot length in minutes.
const SLOT_MINUTES: u32 = 30;
/// Maximum characters kept per sanitized text field.
const MAX_TEXT_CHARS: usize = 490;

/// Fixed consultation location recorded in every row.
const LOCATION: &str = "연구실";

/// Derive a report row from an accepted pair and its extracted metadata.
pub fn transform(pair: &ConversationPair, extracted: &Extracted) -> ReportRow {
    let response_at = pair.response.timestamp;
    let (start, end) = normalize_slot(response_at.hour(), response_at.minute());

    ReportRow {
        consultation_date: response_at.format("%Y-%m-%d").to_string(),
        start_time: format_hhmm(start),
        end_time: format_hhmm(end),
        location: LOCATION.to_string(),
        student_id: extracted.student_id.clone().unwrap_or_default(),
        student_name: extracted.student_name.clone().unwrap_or_default(),
        request_text: sanitize(&pair.request.body),
        response_text: sanitize(&pair.response.body),
    }
}

/// Normalize a response time into a (start, end) slot, both in minutes from
/// midnight. Start rounds the minute down to the nearest 5; anything before
/// 09:00 is floored to 09:05. End is start + 30, rolling past midnight.
fn normalize_slot(hour: u32, minute: u32) -> (u32, u32) {
    let rounded = hour * 60 + (minute - minute % 5);
    let start = if rounded < BUSINESS_FLOOR_MIN {
        BUSINESS_FLOOR_START
    } else {
        rounded
    };
    let end = (start + SLOT_MINUTES) % (24 * 60);
    (start, end)
}

fn format_hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Strip every `<...>` span verbatim (not HTML-semantically parsed), trim,
/// and truncate to at most 490 characters.
pub fn strip_tags(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result
}

fn sanitize(text: &str) -> String {
    strip_tags(text).trim().chars().take(MAX_TEXT_CHARS).collect()
}
