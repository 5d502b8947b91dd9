//! Minimal daily scheduler: one timer task per job sleeping until the next
//! HH:MM occurrence (UTC). No cron expressions — the contract is isolation
//! between jobs, no self-overlap, manual triggering and a graceful stop.

use {
    chrono::{DateTime, Utc},
    futures::{future::BoxFuture, FutureExt},
    std::{
        collections::{HashSet, VecDeque},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    },
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display, strum::EnumString)]
pub enum JobId {
    #[strum(serialize = "price-crawl")]
    PriceCrawl,
    #[strum(serialize = "reddit-collection")]
    RedditCollection,
}

/// The work a job performs. Errors are recorded in the history; they never
/// take the scheduler down.
pub type JobFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

pub struct JobSpec {
    pub id: JobId,
    pub hour: u32,
    pub minute: u32,
    pub run: JobFn,
}

#[derive(Clone, Debug)]
pub struct JobResult {
    pub job: JobId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: Vec<JobSpec>,
    in_flight: Mutex<HashSet<JobId>>,
    history: Mutex<VecDeque<JobResult>>,
    history_limit: usize,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(jobs: Vec<JobSpec>, history_limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs,
                in_flight: Mutex::new(HashSet::new()),
                history: Mutex::new(VecDeque::new()),
                history_limit: history_limit.max(1),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawns the per-job timers. Idempotent: a second call is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("scheduler already started");
            return;
        }
        for index in 0..self.inner.jobs.len() {
            let inner = self.inner.clone();
            let handle = tokio::spawn(async move {
                let job = &inner.jobs[index];
                loop {
                    let now = Utc::now();
                    let next = next_occurrence(job.hour, job.minute, now);
                    let wait = (next - now)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    tracing::debug!(job = %job.id, %next, "sleeping until next firing");
                    tokio::select! {
                        _ = inner.cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                    Inner::fire(&inner, index);
                }
            });
            self.inner.tasks.lock().unwrap().push(handle);
        }
        tracing::info!(jobs = self.inner.jobs.len(), "scheduler started");
    }

    /// Fires a job out-of-band. Returns false when the job was dropped
    /// because it is already running.
    pub fn trigger(&self, id: JobId) -> bool {
        match self.inner.jobs.iter().position(|job| job.id == id) {
            Some(index) => Inner::fire(&self.inner, index),
            None => {
                tracing::warn!(job = %id, "unknown job");
                false
            }
        }
    }

    /// Signals cancellation, waits up to `grace` for in-flight jobs to
    /// settle, then abandons whatever is still running. Idempotent.
    pub async fn stop(&self, grace: Duration) {
        self.inner.cancel.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock().unwrap());
        let deadline = tokio::time::Instant::now() + grace;
        for mut task in tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut task).await.is_err() {
                tracing::warn!("grace period expired, aborting task");
                task.abort();
            }
        }
        tracing::info!("scheduler stopped");
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Last results, newest first, bounded by the history limit.
    pub fn history(&self) -> Vec<JobResult> {
        self.inner.history.lock().unwrap().iter().cloned().collect()
    }

    pub fn in_flight(&self) -> Vec<JobId> {
        self.inner.in_flight.lock().unwrap().iter().copied().collect()
    }

    pub fn next_firings(&self, now: DateTime<Utc>) -> Vec<(JobId, DateTime<Utc>)> {
        self.inner
            .jobs
            .iter()
            .map(|job| (job.id, next_occurrence(job.hour, job.minute, now)))
            .collect()
    }

    /// Completes once no job is marked in-flight. Test helper for
    /// deterministic assertions around firings.
    #[cfg(test)]
    pub async fn settled(&self) {
        loop {
            if self.inner.in_flight.lock().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Inner {
    /// Starts the job unless it is already running. The job itself runs in
    /// its own task so a slow job never blocks its timer, and a panicking job
    /// is recorded as a failure instead of poisoning the scheduler.
    fn fire(inner: &Arc<Inner>, index: usize) -> bool {
        let job = &inner.jobs[index];
        let id = job.id;
        if !inner.in_flight.lock().unwrap().insert(id) {
            tracing::warn!(job = %id, "job still running, dropping this firing");
            return false;
        }
        let run = job.run.clone();
        let task_inner = inner.clone();
        let cancel = task_inner.cancel.child_token();
        let handle = tokio::spawn(async move {
            let started_at = Utc::now();
            tracing::info!(job = %id, "job starting");
            let result = std::panic::AssertUnwindSafe(run(cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err("job panicked".to_string()));
            let finished_at = Utc::now();
            match &result {
                Ok(()) => tracing::info!(job = %id, "job finished"),
                Err(error) => tracing::error!(job = %id, %error, "job failed"),
            }
            task_inner.record(JobResult {
                job: id,
                started_at,
                finished_at,
                success: result.is_ok(),
                error: result.err(),
            });
            task_inner.in_flight.lock().unwrap().remove(&id);
        });
        inner.tasks.lock().unwrap().push(handle);
        true
    }

    fn record(&self, result: JobResult) {
        let mut history = self.history.lock().unwrap();
        history.push_front(result);
        history.truncate(self.history_limit);
    }
}

/// The next time the wall clock (UTC) reads `hour:minute`, strictly after
/// `now`.
pub fn next_occurrence(hour: u32, minute: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .expect("schedule times are validated at startup")
        .and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + chrono::Duration::days(1)
    }
}
