//! Job state machine and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// State of a job. Single-shot: terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, waiting for a worker slot.
    Pending,
    /// Worker is fetching and processing.
    Processing,
    /// Pipeline finished; row count recorded.
    Completed,
    /// Unrecoverable fetch/auth failure; error recorded.
    Failed,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if the job is active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Status snapshot of one job. Mutated only by its worker; readers always
/// receive clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Pairs discovered for this job.
    pub total_count: usize,
    /// Pairs processed so far (1-based, equals `total_count` when done).
    pub current_index: usize,
    /// Owner replies whose reply reference did not resolve.
    pub unpaired_responses: usize,
    /// Final report row count; set on completion.
    pub result_count: Option<usize>,
    /// Failure description; set when the job fails.
    pub error: Option<String>,
    /// Reference to the serialized report artifact.
    pub artifact: Option<String>,
}

impl Job {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            total_count: 0,
            current_index: 0,
            unpaired_responses: 0,
            result_count: None,
            error: None,
            artifact: None,
        }
    }

    /// Transition to a new state, refusing anything the machine forbids.
    pub fn transition_to(&mut self, target: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(target) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                state: self.state.to_string(),
                target: target.to_string(),
            });
        }
        self.state = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record progress counters.
    pub fn touch_progress(&mut self, current_index: usize, total_count: usize) {
        self.current_index = current_index;
        self.total_count = total_count;
        self.updated_at = Utc::now();
    }
}
