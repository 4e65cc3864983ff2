//! Per-job worker execution: fetch → pair → filter → transform → serialize.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::mailbox::MessageStore;
use crate::notify::{JobNotice, NotificationKind};
use crate::pipeline::{FilterPipeline, FilterVerdict, pair_messages, transform};

use super::events::{ProgressEvent, ProgressMux};
use super::orchestrator::{JobConfig, Orchestrator};
use super::state::JobState;

/// Run one job to a terminal state. Spawned by `Orchestrator::submit`.
pub(crate) async fn run_job(
    orch: Arc<Orchestrator>,
    id: Uuid,
    config: JobConfig,
    mux: ProgressMux,
) {
    // Bounded worker pool: hold a slot before any per-message work begins.
    let _permit = match Arc::clone(orch.limiter()).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return, // semaphore closed — service shutting down
    };

    if let Err(e) = orch.transition(id, JobState::Processing) {
        warn!(job_id = %id, error = %e, "Could not start job");
        orch.close_stream(id);
        return;
    }
    info!(job_id = %id, range = %config.date_range, "Worker starting");

    send_notice(&orch, &mux, NotificationKind::Start, id, &config, None).await;

    match execute(&orch, id, &config, &mux).await {
        Ok(row_count) => {
            send_notice(
                &orch,
                &mux,
                NotificationKind::Completion,
                id,
                &config,
                Some(row_count),
            )
            .await;
            mux.log(format!("Job completed with {row_count} report rows"));
            orch.update_job(id, |job| job.result_count = Some(row_count));
            if let Err(e) = orch.transition(id, JobState::Completed) {
                error!(job_id = %id, error = %e, "Completed job in unexpected state");
            }
            info!(job_id = %id, rows = row_count, "Job completed");
        }
        Err(e) => {
            mux.log(format!("Job failed: {e}"));
            orch.update_job(id, |job| job.error = Some(e.to_string()));
            if let Err(te) = orch.transition(id, JobState::Failed) {
                error!(job_id = %id, error = %te, "Failed job in unexpected state");
            }
            error!(job_id = %id, error = %e, "Job failed");
        }
    }

    orch.close_stream(id);
}

/// The fetch→pair→filter→transform→serialize chain. Any error returned here
/// fails the job; filter rejections and unresolved replies are not errors.
async fn execute(
    orch: &Arc<Orchestrator>,
    id: Uuid,
    config: &JobConfig,
    mux: &ProgressMux,
) -> Result<usize, Error> {
    mux.log(format!("Fetching messages for {}", config.date_range));
    let messages = orch.deps().fetcher.fetch(config.date_range).await?;
    mux.log(format!("Fetched {} messages in date range", messages.len()));
    if messages.is_empty() {
        mux.log("No messages found in the specified date range");
    }

    let mut store = MessageStore::new();
    store.load(messages);

    let outcome = pair_messages(store.all(), &orch.deps().owner_address);
    orch.update_job(id, |job| job.unpaired_responses = outcome.unpaired_responses);
    mux.log(format!(
        "Found {} request/response pairs ({} replies unmatched)",
        outcome.pairs.len(),
        outcome.unpaired_responses
    ));
    if outcome.pairs.is_empty() {
        mux.log("No conversation pairs found");
    }

    // Pairs own their messages; the raw set is done.
    drop(store);

    let total = outcome.pairs.len();
    orch.update_job(id, |job| job.total_count = total);
    mux.progress(ProgressEvent::Total { count: total });

    let pipeline = FilterPipeline::new(config.filter.clone());
    let verdicts = pipeline.run(&outcome.pairs, |index, count| {
        orch.update_job(id, |job| job.touch_progress(index, count));
        mux.progress(ProgressEvent::Current { index, count });
    });

    let mut rows = Vec::new();
    for (pair, verdict) in outcome.pairs.iter().zip(&verdicts) {
        match verdict {
            FilterVerdict::Pass(extracted) => rows.push(transform(pair, extracted)),
            FilterVerdict::Reject { stage, reason } => {
                mux.log(format!(
                    "Pair ({} ← {}) rejected at {stage} stage: {reason}",
                    pair.response.id, pair.request.id
                ));
            }
        }
    }
    mux.log(format!("{} of {total} pairs accepted", rows.len()));

    let artifact = orch.deps().serializer.serialize(id, &rows).await?;
    mux.log(format!("Report written to {}", artifact.path.display()));
    orch.update_job(id, |job| {
        job.artifact = Some(artifact.path.display().to_string());
    });

    Ok(rows.len())
}

/// Fire a notification; delivery failure is logged, never fatal.
async fn send_notice(
    orch: &Arc<Orchestrator>,
    mux: &ProgressMux,
    kind: NotificationKind,
    id: Uuid,
    config: &JobConfig,
    row_count: Option<usize>,
) {
    let Some(notifier) = orch.deps().notifier.clone() else {
        return;
    };
    let notice = JobNotice {
        job_id: id,
        date_range: config.date_range.to_string(),
        row_count,
    };
    if let Err(e) = notifier.notify(kind, &notice).await {
        warn!(job_id = %id, error = %e, "Notification delivery failed");
        mux.log(format!("Notification delivery failed: {e}"));
    }
}
