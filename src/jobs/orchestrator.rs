//! Job orchestrator — owns the job table, spawns workers, exposes status.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, broadcast};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::JobError;
use crate::mailbox::{DateRange, MailFetcher};
use crate::notify::Notifier;
use crate::pipeline::FilterConfig;
use crate::report::ReportSerializer;

use super::events::{JobEvent, ProgressMux};
use super::state::{Job, JobState};
use super::worker;

/// Per-submission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub date_range: DateRange,
    #[serde(flatten)]
    pub filter: FilterConfig,
}

/// Shared collaborators for worker execution.
#[derive(Clone)]
pub struct JobDeps {
    pub fetcher: Arc<dyn MailFetcher>,
    pub serializer: Arc<dyn ReportSerializer>,
    pub notifier: Option<Arc<dyn Notifier>>,
    /// Address whose replies count as consultation responses.
    pub owner_address: String,
}

struct JobEntry {
    job: Job,
    /// Dropped when the job reaches a terminal state, closing the stream.
    mux: Option<ProgressMux>,
}

/// Owns job lifecycle: submission, the snapshot table, and event streams.
///
/// The table is guarded by a plain lock; every mutation is short and only
/// the owning worker writes to an entry, so readers always observe a
/// consistent snapshot.
pub struct Orchestrator {
    deps: JobDeps,
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    /// Bounds concurrently processing workers.
    limiter: Arc<Semaphore>,
    event_buffer: usize,
}

impl Orchestrator {
    pub fn new(deps: JobDeps, config: &ServiceConfig) -> Arc<Self> {
        Arc::new(Self {
            deps,
            jobs: RwLock::new(HashMap::new()),
            limiter: Arc::new(Semaphore::new(config.max_parallel_jobs.max(1))),
            event_buffer: config.event_buffer,
        })
    }

    /// Submit a job. Returns its id immediately; all per-message work runs
    /// on a spawned worker, gated by the worker-pool semaphore.
    pub fn submit(self: &Arc<Self>, config: JobConfig) -> Uuid {
        let id = Uuid::new_v4();
        let mux = ProgressMux::new(self.event_buffer);

        {
            let mut jobs = self.jobs.write().expect("job table poisoned");
            jobs.insert(
                id,
                JobEntry {
                    job: Job::new(id),
                    mux: Some(mux.clone()),
                },
            );
        }

        info!(job_id = %id, range = %config.date_range, "Job submitted");

        let orchestrator = Arc::clone(self);
        tokio::spawn(worker::run_job(orchestrator, id, config, mux));

        id
    }

    /// Non-blocking snapshot of one job.
    pub fn status(&self, id: Uuid) -> Result<Job, JobError> {
        let jobs = self.jobs.read().expect("job table poisoned");
        jobs.get(&id)
            .map(|entry| entry.job.clone())
            .ok_or(JobError::NotFound { id })
    }

    /// Snapshots of all jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let jobs = self.jobs.read().expect("job table poisoned");
        let mut snapshots: Vec<Job> = jobs.values().map(|entry| entry.job.clone()).collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// Attach to a job's event stream. No replay: a listener only sees
    /// events produced after this call; a terminal job yields a stream
    /// that is already closed.
    pub fn subscribe(&self, id: Uuid) -> Result<broadcast::Receiver<JobEvent>, JobError> {
        let jobs = self.jobs.read().expect("job table poisoned");
        let entry = jobs.get(&id).ok_or(JobError::NotFound { id })?;
        match &entry.mux {
            Some(mux) => Ok(mux.subscribe()),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                Ok(rx)
            }
        }
    }

    // ── Worker-side hooks ───────────────────────────────────────────

    pub(crate) fn deps(&self) -> &JobDeps {
        &self.deps
    }

    pub(crate) fn limiter(&self) -> &Arc<Semaphore> {
        &self.limiter
    }

    /// Drive the state machine for one job.
    pub(crate) fn transition(&self, id: Uuid, target: JobState) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().expect("job table poisoned");
        let entry = jobs.get_mut(&id).ok_or(JobError::NotFound { id })?;
        entry.job.transition_to(target)
    }

    /// Mutate one job's counters/result fields under the table lock.
    pub(crate) fn update_job(&self, id: Uuid, mutate: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.write().expect("job table poisoned");
        match jobs.get_mut(&id) {
            Some(entry) => mutate(&mut entry.job),
            None => warn!(job_id = %id, "Update for unknown job ignored"),
        }
    }

    /// Close the job's event stream (drops the only sender).
    pub(crate) fn close_stream(&self, id: Uuid) {
        let mut jobs = self.jobs.write().expect("job table poisoned");
        if let Some(entry) = jobs.get_mut(&id) {
            entry.mux = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailboxError;
    use crate::jobs::events::ProgressEvent;
    use crate::mailbox::RawMessage;
    use crate::notify::{JobNotice, NotificationKind, Notifier};
    use crate::report::MemoryReportSink;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const OWNER: &str = "prof@univ.edu";

    fn message(id: &str, sender: &str, in_reply_to: Option<&str>, body: &str) -> RawMessage {
        RawMessage {
            id: id.into(),
            sender: sender.into(),
            recipient: OWNER.into(),
            subject: "상담 요청".into(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 14, 23, 0).unwrap(),
            body: body.into(),
            in_reply_to: in_reply_to.map(String::from),
            references: vec![],
        }
    }

    fn sample_messages() -> Vec<RawMessage> {
        vec![
            message(
                "req1",
                "student1@univ.edu",
                None,
                "교수님 안녕하세요. 저는 20251234 학번 김철수입니다. 상담 요청드립니다.",
            ),
            message("resp1", OWNER, Some("req1"), "네, 알겠습니다. 연구실로 오세요."),
            message(
                "req2",
                "student2@univ.edu",
                None,
                "학번 20251111 문의사항 있습니다.",
            ),
            message("resp2", OWNER, Some("req2"), "답변드립니다."),
            message("resp3", OWNER, Some("missing"), "이 답장은 짝이 없습니다."),
        ]
    }

    struct StubFetcher {
        messages: Vec<RawMessage>,
    }

    #[async_trait]
    impl MailFetcher for StubFetcher {
        async fn fetch(&self, _range: DateRange) -> Result<Vec<RawMessage>, MailboxError> {
            Ok(self.messages.clone())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl MailFetcher for FailingFetcher {
        async fn fetch(&self, _range: DateRange) -> Result<Vec<RawMessage>, MailboxError> {
            Err(MailboxError::Authentication {
                mailbox: OWNER.into(),
                reason: "invalid app password".into(),
            })
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        starts: AtomicUsize,
        completions: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(
            &self,
            kind: NotificationKind,
            _notice: &JobNotice,
        ) -> Result<(), crate::error::NotifyError> {
            match kind {
                NotificationKind::Start => self.starts.fetch_add(1, Ordering::SeqCst),
                NotificationKind::Completion => self.completions.fetch_add(1, Ordering::SeqCst),
            };
            Ok(())
        }
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        )
    }

    fn orchestrator_with(
        fetcher: Arc<dyn MailFetcher>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> (Arc<Orchestrator>, Arc<MemoryReportSink>) {
        let sink = Arc::new(MemoryReportSink::new());
        let deps = JobDeps {
            fetcher,
            serializer: Arc::clone(&sink) as Arc<dyn ReportSerializer>,
            notifier,
            owner_address: OWNER.into(),
        };
        (Orchestrator::new(deps, &ServiceConfig::default()), sink)
    }

    async fn wait_terminal(orch: &Orchestrator, id: Uuid) -> Job {
        for _ in 0..200 {
            let job = orch.status(id).unwrap();
            if job.state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn submit_runs_job_to_completion() {
        let notifier = Arc::new(CountingNotifier::default());
        let (orch, sink) = orchestrator_with(
            Arc::new(StubFetcher { messages: sample_messages() }),
            Some(Arc::clone(&notifier) as Arc<dyn Notifier>),
        );

        let id = orch.submit(JobConfig {
            date_range: range(),
            filter: FilterConfig::default(),
        });

        let job = wait_terminal(&orch, id).await;
        assert_eq!(job.state, JobState::Completed);
        // Two pairs discovered; only the keyword-complete one survives.
        assert_eq!(job.total_count, 2);
        assert_eq!(job.current_index, 2);
        assert_eq!(job.unpaired_responses, 1);
        assert_eq!(job.result_count, Some(1));
        assert!(job.error.is_none());
        assert!(job.artifact.is_some());

        let rows = sink.rows.lock().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, "20251234");
        assert_eq!(rows[0].student_name, "김철수");
        assert_eq!(rows[0].start_time, "14:20");

        assert_eq!(notifier.starts.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn progress_events_are_total_then_gapless_currents() {
        let (orch, _sink) =
            orchestrator_with(Arc::new(StubFetcher { messages: sample_messages() }), None);

        let id = orch.submit(JobConfig {
            date_range: range(),
            filter: FilterConfig::default(),
        });
        // Current-thread runtime: the worker has not run yet, so this
        // subscription observes the whole stream.
        let mut rx = orch.subscribe(id).unwrap();

        let mut progress = Vec::new();
        loop {
            match rx.recv().await {
                Ok(JobEvent::Progress(p)) => progress.push(p),
                Ok(JobEvent::Log { .. }) => {}
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => panic!("listener lagged"),
            }
        }

        assert_eq!(progress[0], ProgressEvent::Total { count: 2 });
        let indices: Vec<usize> = progress[1..]
            .iter()
            .map(|p| match p {
                ProgressEvent::Current { index, count } => {
                    assert_eq!(*count, 2);
                    *index
                }
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[tokio::test]
    async fn auth_failure_fails_job_with_error() {
        let (orch, sink) = orchestrator_with(Arc::new(FailingFetcher), None);

        let id = orch.submit(JobConfig {
            date_range: range(),
            filter: FilterConfig::default(),
        });

        let job = wait_terminal(&orch, id).await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.as_deref().unwrap().contains("invalid app password"));
        assert_eq!(job.result_count, None);
        assert!(sink.rows.lock().await.is_empty());
    }

    #[tokio::test]
    async fn terminal_snapshot_never_mutates() {
        let (orch, _sink) =
            orchestrator_with(Arc::new(StubFetcher { messages: sample_messages() }), None);

        let id = orch.submit(JobConfig {
            date_range: range(),
            filter: FilterConfig::default(),
        });

        let first = wait_terminal(&orch, id).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = orch.status(id).unwrap();
        assert_eq!(first.state, second.state);
        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(first.result_count, second.result_count);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let (orch, _sink) =
            orchestrator_with(Arc::new(StubFetcher { messages: vec![] }), None);

        let first = orch.submit(JobConfig {
            date_range: range(),
            filter: FilterConfig::default(),
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = orch.submit(JobConfig {
            date_range: range(),
            filter: FilterConfig::default(),
        });

        let listed = orch.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].id, first);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (orch, _sink) =
            orchestrator_with(Arc::new(StubFetcher { messages: vec![] }), None);
        let missing = Uuid::new_v4();
        assert!(matches!(
            orch.status(missing),
            Err(JobError::NotFound { .. })
        ));
        assert!(matches!(
            orch.subscribe(missing),
            Err(JobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn subscribe_after_terminal_yields_closed_stream() {
        let (orch, _sink) =
            orchestrator_with(Arc::new(StubFetcher { messages: sample_messages() }), None);

        let id = orch.submit(JobConfig {
            date_range: range(),
            filter: FilterConfig::default(),
        });
        wait_terminal(&orch, id).await;

        let mut rx = orch.subscribe(id).unwrap();
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn empty_mailbox_completes_with_zero_rows() {
        let (orch, sink) =
            orchestrator_with(Arc::new(StubFetcher { messages: vec![] }), None);

        let id = orch.submit(JobConfig {
            date_range: range(),
            filter: FilterConfig::default(),
        });

        let job = wait_terminal(&orch, id).await;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.total_count, 0);
        assert_eq!(job.result_count, Some(0));
        assert!(sink.rows.lock().await.is_empty());
    }
}
