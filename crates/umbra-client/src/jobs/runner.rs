//! The durable job runner.
//!
//! A single scheduler task polls the store for due jobs every tick (or
//! immediately on submit) and spawns one execution per job. Jobs sharing a
//! uniqueness key coalesce at submit time and run strictly one at a time.
//! Retry delay is `min(max_backoff, base * 2^failure_count)`; a transient
//! failure past `max_failure_count` becomes permanent. Permanent failures
//! run the executor's cleanup hook, delete the row, and emit a failed event.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use umbra_store::Job;

use crate::context::ClientContext;
use crate::error::Result;
use crate::jobs::{JobEvent, JobExecutor, JobOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// A job as handed to [`JobRunner::submit`].
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub variant: &'static str,
    pub thread_id: Option<String>,
    pub details: Vec<u8>,
    pub max_failure_count: u32,
    pub uniqueness_key: Option<String>,
}

/// Retry delay after `failure_count` failures.
pub fn retry_backoff(failure_count: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(failure_count).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

#[derive(Default)]
struct Running {
    ids: HashSet<Uuid>,
    keys: HashSet<String>,
}

pub struct JobRunner {
    ctx: Arc<ClientContext>,
    executors: std::sync::Mutex<HashMap<&'static str, Arc<dyn JobExecutor>>>,
    running: std::sync::Mutex<Running>,
    wakeup: Notify,
    generation: AtomicU64,
    events: broadcast::Sender<JobEvent>,
    /// Handle to ourselves for spawning executions from `&self` methods.
    me: Weak<JobRunner>,
}

impl JobRunner {
    pub fn new(ctx: Arc<ClientContext>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|me| Self {
            ctx,
            executors: std::sync::Mutex::new(HashMap::new()),
            running: std::sync::Mutex::new(Running::default()),
            wakeup: Notify::new(),
            generation: AtomicU64::new(0),
            events,
            me: me.clone(),
        })
    }

    /// Register the executor for one variant. Later registrations replace
    /// earlier ones.
    pub fn register(&self, executor: Arc<dyn JobExecutor>) {
        self.executors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(executor.variant(), executor);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Persist a job and wake the scheduler. Jobs with a uniqueness key
    /// coalesce: submitting while an identical one is pending returns the
    /// existing id.
    pub fn submit(&self, spec: JobSpec) -> Result<Uuid> {
        if let Some(key) = &spec.uniqueness_key {
            if let Some(existing) = self.ctx.db().find_job_by_uniqueness(key)? {
                debug!(
                    variant = spec.variant,
                    uniqueness_key = %key,
                    existing_id = %existing.id,
                    "Coalesced duplicate job submission"
                );
                return Ok(existing.id);
            }
        }

        let job = Job {
            id: Uuid::new_v4(),
            variant: spec.variant.to_string(),
            thread_id: spec.thread_id,
            details: spec.details,
            failure_count: 0,
            max_failure_count: spec.max_failure_count,
            uniqueness_key: spec.uniqueness_key,
            next_attempt_at: None,
            created_at: Utc::now(),
        };
        self.ctx.db().insert_job(&job)?;
        debug!(variant = %job.variant, id = %job.id, "Submitted job");
        self.wakeup.notify_one();
        Ok(job.id)
    }

    /// Start the scheduler. Pending rows from a previous run become due
    /// immediately. Idempotent only via `stop` first.
    pub fn start(&self) {
        let Some(runner) = self.me.upgrade() else {
            return;
        };
        let generation = self.generation.load(Ordering::SeqCst);
        let pending = self.ctx.db().list_jobs().map(|j| j.len()).unwrap_or(0);
        info!(pending, "Job runner started");

        tokio::spawn(async move {
            loop {
                if runner.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                runner.dispatch_due();

                let tick = runner.ctx.config().job_tick;
                tokio::select! {
                    _ = runner.wakeup.notified() => {}
                    _ = tokio::time::sleep(tick) => {}
                }
            }
            debug!("Job scheduler exited");
        });
    }

    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    fn dispatch_due(&self) {
        let due = match self.ctx.db().list_due_jobs(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to load due jobs");
                return;
            }
        };

        for job in due {
            if !self.try_reserve(&job) {
                continue;
            }
            let Some(runner) = self.me.upgrade() else {
                self.release(&job);
                return;
            };
            tokio::spawn(async move {
                runner.run_one(&job).await;
                runner.release(&job);
            });
        }
    }

    /// Claim a job for execution. Enforces one run per id and strict
    /// single-flight per uniqueness key.
    fn try_reserve(&self, job: &Job) -> bool {
        let mut running = self.lock_running();
        if running.ids.contains(&job.id) {
            return false;
        }
        if let Some(key) = &job.uniqueness_key {
            if running.keys.contains(key) {
                return false;
            }
            running.keys.insert(key.clone());
        }
        running.ids.insert(job.id);
        true
    }

    fn release(&self, job: &Job) {
        let mut running = self.lock_running();
        running.ids.remove(&job.id);
        if let Some(key) = &job.uniqueness_key {
            running.keys.remove(key);
        }
    }

    /// Execute one claimed job and settle the row.
    pub async fn run_one(&self, job: &Job) {
        let executor = {
            let executors = self
                .executors
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            executors.get(job.variant.as_str()).cloned()
        };
        let Some(executor) = executor else {
            warn!(variant = %job.variant, id = %job.id, "No executor for job variant, dropping");
            let _ = self.ctx.db().delete_job(job.id);
            return;
        };

        match executor.run(job).await {
            Ok(JobOutcome::Success) => {
                if let Err(e) = self.ctx.db().delete_job(job.id) {
                    error!(id = %job.id, error = %e, "Failed to delete finished job");
                }
                debug!(variant = %job.variant, id = %job.id, "Job succeeded");
                let _ = self.events.send(JobEvent::Succeeded {
                    id: job.id,
                    variant: job.variant.clone(),
                });
            }
            Ok(JobOutcome::Deferred) => {
                let next = Utc::now()
                    + chrono::Duration::from_std(self.ctx.config().job_retry_base)
                        .unwrap_or_else(|_| chrono::Duration::seconds(2));
                if let Err(e) = self.ctx.db().set_job_retry(job.id, job.failure_count, Some(next))
                {
                    error!(id = %job.id, error = %e, "Failed to defer job");
                }
                debug!(variant = %job.variant, id = %job.id, "Job deferred");
                let _ = self.events.send(JobEvent::Deferred {
                    id: job.id,
                    variant: job.variant.clone(),
                });
            }
            Err(e) => {
                let attempts = job.failure_count + 1;
                let permanent = e.is_terminal() || attempts > job.max_failure_count;
                warn!(
                    variant = %job.variant,
                    id = %job.id,
                    attempts,
                    permanent,
                    error = %e,
                    "Job attempt failed"
                );

                if permanent {
                    if let Err(e) = executor.on_permanent_failure(job).await {
                        error!(id = %job.id, error = %e, "Permanent-failure cleanup failed");
                    }
                    if let Err(e) = self.ctx.db().delete_job(job.id) {
                        error!(id = %job.id, error = %e, "Failed to delete failed job");
                    }
                } else {
                    let delay = retry_backoff(
                        job.failure_count,
                        self.ctx.config().job_retry_base,
                        self.ctx.config().job_max_backoff,
                    );
                    let next = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(2));
                    if let Err(e) = self.ctx.db().set_job_retry(job.id, attempts, Some(next)) {
                        error!(id = %job.id, error = %e, "Failed to schedule job retry");
                    }
                }

                let _ = self.events.send(JobEvent::Failed {
                    id: job.id,
                    variant: job.variant.clone(),
                    permanent,
                });
            }
        }
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Running> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use umbra_net::NetError;

    use super::*;
    use crate::context::testing::context;
    use crate::error::ClientError;

    struct ScriptedExecutor {
        variant: &'static str,
        results: Mutex<Vec<Result<JobOutcome>>>,
        runs: AtomicU32,
        cleanups: AtomicU32,
    }

    impl ScriptedExecutor {
        fn new(variant: &'static str, results: Vec<Result<JobOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                variant,
                results: Mutex::new(results),
                runs: AtomicU32::new(0),
                cleanups: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl JobExecutor for ScriptedExecutor {
        fn variant(&self) -> &'static str {
            self.variant
        }

        async fn run(&self, _job: &Job) -> Result<JobOutcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(JobOutcome::Success)
            } else {
                results.remove(0)
            }
        }

        async fn on_permanent_failure(&self, _job: &Job) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn transient() -> ClientError {
        ClientError::Net(NetError::Status {
            status: 500,
            body: String::new(),
        })
    }

    fn spec(variant: &'static str, uniqueness_key: Option<&str>) -> JobSpec {
        JobSpec {
            variant,
            thread_id: None,
            details: Vec::new(),
            max_failure_count: 3,
            uniqueness_key: uniqueness_key.map(String::from),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(600);
        assert_eq!(retry_backoff(0, base, max), Duration::from_secs(2));
        assert_eq!(retry_backoff(1, base, max), Duration::from_secs(4));
        assert_eq!(retry_backoff(4, base, max), Duration::from_secs(32));
        assert_eq!(retry_backoff(16, base, max), max);
        assert_eq!(retry_backoff(200, base, max), max);
    }

    #[tokio::test]
    async fn success_deletes_the_row() {
        let (ctx, _) = context();
        let runner = JobRunner::new(ctx.clone());
        let executor = ScriptedExecutor::new("t", vec![Ok(JobOutcome::Success)]);
        runner.register(executor.clone());

        let id = runner.submit(spec("t", None)).unwrap();
        let job = ctx.db().get_job(id).unwrap();
        runner.run_one(&job).await;

        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
        assert!(ctx.db().get_job(id).is_err());
    }

    #[tokio::test]
    async fn transient_failure_schedules_a_retry() {
        let (ctx, _) = context();
        let runner = JobRunner::new(ctx.clone());
        runner.register(ScriptedExecutor::new("t", vec![Err(transient())]));

        let id = runner.submit(spec("t", None)).unwrap();
        let job = ctx.db().get_job(id).unwrap();
        runner.run_one(&job).await;

        let job = ctx.db().get_job(id).unwrap();
        assert_eq!(job.failure_count, 1);
        assert!(job.next_attempt_at.is_some());
    }

    #[tokio::test]
    async fn terminal_error_fails_permanently_at_once() {
        let (ctx, _) = context();
        let runner = JobRunner::new(ctx.clone());
        let executor = ScriptedExecutor::new(
            "t",
            vec![Err(ClientError::Serialization("bad payload".into()))],
        );
        runner.register(executor.clone());
        let mut events = runner.subscribe();

        let id = runner.submit(spec("t", None)).unwrap();
        let job = ctx.db().get_job(id).unwrap();
        runner.run_one(&job).await;

        assert!(ctx.db().get_job(id).is_err());
        assert_eq!(executor.cleanups.load(Ordering::SeqCst), 1);
        match events.recv().await.unwrap() {
            JobEvent::Failed { permanent, .. } => assert!(permanent),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn max_failure_count_one_allows_exactly_two_attempts() {
        let (ctx, _) = context();
        let runner = JobRunner::new(ctx.clone());
        let executor = ScriptedExecutor::new("t", vec![Err(transient()), Err(transient())]);
        runner.register(executor.clone());

        let mut spec = spec("t", None);
        spec.max_failure_count = 1;
        let id = runner.submit(spec).unwrap();

        // First attempt: failure_count 0 -> 1, retried.
        let job = ctx.db().get_job(id).unwrap();
        runner.run_one(&job).await;
        assert_eq!(ctx.db().get_job(id).unwrap().failure_count, 1);

        // Second attempt: exceeds the budget, permanent.
        let job = ctx.db().get_job(id).unwrap();
        runner.run_one(&job).await;
        assert!(ctx.db().get_job(id).is_err());
        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
        assert_eq!(executor.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deferred_reschedules_without_counting_a_failure() {
        let (ctx, _) = context();
        let runner = JobRunner::new(ctx.clone());
        runner.register(ScriptedExecutor::new("t", vec![Ok(JobOutcome::Deferred)]));

        let id = runner.submit(spec("t", None)).unwrap();
        let job = ctx.db().get_job(id).unwrap();
        runner.run_one(&job).await;

        let job = ctx.db().get_job(id).unwrap();
        assert_eq!(job.failure_count, 0);
        assert!(job.next_attempt_at.is_some());
    }

    #[tokio::test]
    async fn uniqueness_key_coalesces_submissions() {
        let (ctx, _) = context();
        let runner = JobRunner::new(ctx.clone());

        let first = runner.submit(spec("t", Some("k"))).unwrap();
        let second = runner.submit(spec("t", Some("k"))).unwrap();
        assert_eq!(first, second);
        assert_eq!(ctx.db().list_jobs().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reserve_is_single_flight_per_key() {
        let (ctx, _) = context();
        let runner = JobRunner::new(ctx.clone());

        let id = runner.submit(spec("t", Some("k"))).unwrap();
        let job = ctx.db().get_job(id).unwrap();

        assert!(runner.try_reserve(&job));
        assert!(!runner.try_reserve(&job));

        // A different job with the same key is also blocked.
        let mut other = job.clone();
        other.id = Uuid::new_v4();
        assert!(!runner.try_reserve(&other));

        runner.release(&job);
        assert!(runner.try_reserve(&job));
    }
}
