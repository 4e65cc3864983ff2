//! Progress/log multiplexing — one ordered channel, two logical streams.
//!
//! Structured side: `JobEvent` over a broadcast channel (the API boundary
//! uses tagged variants, never prefix sniffing). Legacy plain-text side:
//! progress events encode as marker-prefixed log lines, and any line
//! containing the marker is re-emitted with an annotation prefix so a text
//! consumer can pick out progress updates without parsing every line.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Marker opening an encoded progress line.
pub const PROGRESS_MARKER: &str = "##PROGRESS##";
/// Prefix of the annotated re-emission of a marker-bearing line.
pub const ANNOTATION_MARKER: &str = "##MARK##";

/// Structured job advancement update. Purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Total { count: usize },
    Current { index: usize, count: usize },
}

impl ProgressEvent {
    /// Pipe-delimited payload: `TOTAL|<count>` or `CURRENT|<index>|<count>`.
    pub fn encode(&self) -> String {
        match self {
            Self::Total { count } => format!("TOTAL|{count}"),
            Self::Current { index, count } => format!("CURRENT|{index}|{count}"),
        }
    }

    /// Parse a pipe-delimited payload.
    pub fn parse(payload: &str) -> Option<Self> {
        let mut parts = payload.trim().split('|');
        match parts.next()? {
            "TOTAL" => {
                let count = parts.next()?.parse().ok()?;
                Some(Self::Total { count })
            }
            "CURRENT" => {
                let index = parts.next()?.parse().ok()?;
                let count = parts.next()?.parse().ok()?;
                Some(Self::Current { index, count })
            }
            _ => None,
        }
    }
}

/// One event on a job's multiplexed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Log { line: String },
    Progress(ProgressEvent),
}

/// Render an event to the plain-text wire form.
///
/// A progress event becomes a marker-prefixed log line; every line that
/// contains the marker (progress lines included) is followed by its
/// annotated duplicate. Ordinary log lines pass through unchanged.
pub fn wire_lines(event: &JobEvent) -> Vec<String> {
    match event {
        JobEvent::Progress(progress) => {
            let line = format!("{PROGRESS_MARKER}{}", progress.encode());
            let annotated = format!("{ANNOTATION_MARKER}{line}");
            vec![line, annotated]
        }
        JobEvent::Log { line } if line.contains(PROGRESS_MARKER) => {
            vec![line.clone(), format!("{ANNOTATION_MARKER}{line}")]
        }
        JobEvent::Log { line } => vec![line.clone()],
    }
}

/// Classification of one wire line on the consumer side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireLine {
    /// Belongs to the log stream, forwarded unchanged.
    Log(String),
    /// Annotated progress update.
    Progress(ProgressEvent),
}

/// Demultiplex one wire line. Annotated lines carry the progress stream;
/// everything else (marker lines included) stays in the log stream.
pub fn demux_line(line: &str) -> WireLine {
    if let Some(rest) = line.strip_prefix(ANNOTATION_MARKER)
        && let Some(idx) = rest.find(PROGRESS_MARKER)
        && let Some(progress) = ProgressEvent::parse(&rest[idx + PROGRESS_MARKER.len()..])
    {
        return WireLine::Progress(progress);
    }
    WireLine::Log(line.to_string())
}

/// Single-producer broadcast of a job's event stream.
///
/// The worker is the only sender; any number of listeners subscribe. A slow
/// listener lags past the buffer instead of stalling the producer.
#[derive(Debug, Clone)]
pub struct ProgressMux {
    tx: broadcast::Sender<JobEvent>,
}

impl ProgressMux {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Attach a listener. Only events produced after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Emit a free-form log line.
    pub fn log(&self, line: impl Into<String>) {
        // Ok if nobody is listening.
        let _ = self.tx.send(JobEvent::Log { line: line.into() });
    }

    /// Emit a structured progress event.
    pub fn progress(&self, event: ProgressEvent) {
        let _ = self.tx.send(JobEvent::Progress(event));
    }
}
