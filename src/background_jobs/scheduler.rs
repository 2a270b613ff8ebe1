use super::context::JobContext;
use super::job::{BackgroundJob, JobError};
use crate::server_store::{JobRunStatus, JobScheduleState};
use anyhow::Result;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Schedules and executes registered background jobs.
///
/// Jobs run at their configured interval, with an optional run at scheduler
/// startup. Schedule state is persisted in the server store so restarts do
/// not reset interval timers. A job that is still running when its next slot
/// arrives is skipped for that slot.
pub struct JobScheduler {
    jobs: HashMap<&'static str, Arc<dyn BackgroundJob>>,
    context: JobContext,
    shutdown_token: CancellationToken,
    running_jobs: Arc<RwLock<HashSet<&'static str>>>,
    running_handles: Vec<JoinHandle<()>>,
    check_interval: Duration,
}

impl JobScheduler {
    pub fn new(context: JobContext, shutdown_token: CancellationToken) -> Self {
        Self {
            jobs: HashMap::new(),
            context,
            shutdown_token,
            running_jobs: Arc::new(RwLock::new(HashSet::new())),
            running_handles: Vec::new(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        debug!("Registering job '{}' ({})", job.id(), job.description());
        self.jobs.insert(job.id(), job);
    }

    /// Run the scheduler until the shutdown token fires.
    pub async fn run(mut self) -> Result<()> {
        info!("Starting job scheduler with {} registered jobs", self.jobs.len());

        // Runs left over from a previous process can never finish.
        let marked = self.context.server_store.mark_stale_jobs_failed()?;
        if marked > 0 {
            warn!("Marked {marked} stale job runs from a previous run as failed");
        }

        self.init_schedule_state()?;
        self.fire_startup_jobs().await;

        loop {
            self.reap_finished_handles();
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    info!("Job scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.check_interval) => {
                    if let Err(err) = self.run_due_jobs().await {
                        error!("Failed to dispatch due jobs: {err:#}");
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Seed persisted schedule state for jobs that have never run.
    fn init_schedule_state(&self) -> Result<()> {
        let now = Utc::now();
        for job in self.jobs.values() {
            if self.context.server_store.get_schedule_state(job.id())?.is_none() {
                let interval = chrono::Duration::from_std(job.schedule().interval())?;
                self.context.server_store.update_schedule_state(&JobScheduleState {
                    job_id: job.id().to_string(),
                    next_run_at: now + interval,
                    last_run_at: None,
                })?;
            }
        }
        Ok(())
    }

    async fn fire_startup_jobs(&mut self) {
        let startup: Vec<_> = self
            .jobs
            .values()
            .filter(|job| job.schedule().runs_on_startup())
            .cloned()
            .collect();
        for job in startup {
            info!("Triggering startup run of job '{}'", job.id());
            self.spawn_job(job, "startup").await;
        }
    }

    async fn run_due_jobs(&mut self) -> Result<()> {
        let now = Utc::now();
        let mut due = Vec::new();
        for job in self.jobs.values() {
            let state = self.context.server_store.get_schedule_state(job.id())?;
            let is_due = state.map(|s| s.next_run_at <= now).unwrap_or(true);
            if is_due {
                due.push(job.clone());
            }
        }
        for job in due {
            self.spawn_job(job, "schedule").await;
        }
        Ok(())
    }

    async fn spawn_job(&mut self, job: Arc<dyn BackgroundJob>, triggered_by: &str) {
        let job_id = job.id();
        {
            let mut running = self.running_jobs.write().await;
            if !running.insert(job_id) {
                warn!("Job '{job_id}' is still running, skipping this slot");
                return;
            }
        }

        let now = Utc::now();
        let run_id = match self.context.server_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(err) => {
                error!("Failed to record start of job '{job_id}': {err:#}");
                self.running_jobs.write().await.remove(job_id);
                return;
            }
        };

        // Advance the schedule up front so a long run does not pile up
        // immediate re-runs behind it.
        let interval = match chrono::Duration::from_std(job.schedule().interval()) {
            Ok(d) => d,
            Err(err) => {
                error!("Job '{job_id}' has an invalid interval: {err:#}");
                self.running_jobs.write().await.remove(job_id);
                return;
            }
        };
        let next_state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at: now + interval,
            last_run_at: Some(now),
        };
        if let Err(err) = self.context.server_store.update_schedule_state(&next_state) {
            error!("Failed to update schedule for job '{job_id}': {err:#}");
        }

        let ctx = JobContext {
            cancellation_token: self.shutdown_token.child_token(),
            ..self.context.clone()
        };
        let server_store = self.context.server_store.clone();
        let running_jobs = self.running_jobs.clone();

        info!("Starting job '{job_id}' (run {run_id}, triggered by {triggered_by})");
        let handle = tokio::spawn(async move {
            let job_for_exec = job.clone();
            let exec_result =
                tokio::task::spawn_blocking(move || job_for_exec.execute(&ctx)).await;

            let (status, error_message) = match exec_result {
                Ok(Ok(())) => (JobRunStatus::Completed, None),
                Ok(Err(JobError::Cancelled)) => {
                    (JobRunStatus::Failed, Some("Job was cancelled".to_string()))
                }
                Ok(Err(err)) => (JobRunStatus::Failed, Some(err.to_string())),
                Err(join_err) => (
                    JobRunStatus::Failed,
                    Some(format!("Job panicked: {join_err}")),
                ),
            };

            match &status {
                JobRunStatus::Completed => info!("Job '{}' completed (run {run_id})", job.id()),
                _ => warn!(
                    "Job '{}' failed (run {run_id}): {}",
                    job.id(),
                    error_message.as_deref().unwrap_or("unknown")
                ),
            }

            if let Err(err) = server_store.record_job_finish(run_id, status, error_message) {
                error!("Failed to record finish of job '{}': {err:#}", job.id());
            }
            running_jobs.write().await.remove(job.id());
        });
        self.running_handles.push(handle);
    }

    fn reap_finished_handles(&mut self) {
        self.running_handles.retain(|handle| !handle.is_finished());
    }

    async fn shutdown(&mut self) {
        let running = self.running_jobs.read().await.len();
        if running > 0 {
            info!("Waiting for {running} running jobs to finish");
        }
        let wait_all = async {
            for handle in self.running_handles.drain(..) {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_WAIT_TIMEOUT, wait_all).await.is_err() {
            warn!("Timed out waiting for running jobs to finish");
        }
        info!("Job scheduler shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::context::JobSettings;
    use crate::background_jobs::job::JobSchedule;
    use crate::event_store::SqliteEventStore;
    use crate::ingestion::{EventDetail, EventSource, RawEvent};
    use crate::server_store::{ServerStore, SqliteServerStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct NullSource;

    impl EventSource for NullSource {
        fn fetch_page(&self, _page: u32, _latitude: f64, _longitude: f64) -> Result<Vec<RawEvent>> {
            Ok(Vec::new())
        }

        fn fetch_detail(&self, _event_url: &str) -> Result<Option<EventDetail>> {
            Ok(None)
        }
    }

    struct CountingJob {
        id: &'static str,
        schedule: JobSchedule,
        runs: Arc<AtomicUsize>,
        concurrent: Arc<AtomicUsize>,
        max_concurrent: Arc<AtomicUsize>,
        work_duration: Duration,
    }

    impl CountingJob {
        fn new(id: &'static str, schedule: JobSchedule, work_duration: Duration) -> Self {
            Self {
                id,
                schedule,
                runs: Arc::new(AtomicUsize::new(0)),
                concurrent: Arc::new(AtomicUsize::new(0)),
                max_concurrent: Arc::new(AtomicUsize::new(0)),
                work_duration,
            }
        }
    }

    impl BackgroundJob for CountingJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Counting Job"
        }

        fn description(&self) -> &'static str {
            "Counts its own runs"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.work_duration);
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_context(dir: &TempDir) -> (JobContext, Arc<dyn ServerStore>) {
        let event_store = Arc::new(
            SqliteEventStore::new(dir.path().join("events.sqlite")).unwrap(),
        );
        let server_store: Arc<dyn ServerStore> = Arc::new(
            SqliteServerStore::new(dir.path().join("server.sqlite")).unwrap(),
        );
        let ctx = JobContext::new(
            CancellationToken::new(),
            event_store,
            server_store.clone(),
            Arc::new(NullSource),
            JobSettings::default(),
        );
        (ctx, server_store)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_startup_job_runs_and_is_recorded() {
        let dir = TempDir::new().unwrap();
        let (ctx, server_store) = test_context(&dir);
        let shutdown = CancellationToken::new();
        let mut scheduler = JobScheduler::new(ctx, shutdown.clone());

        let job = Arc::new(CountingJob::new(
            "startup_job",
            JobSchedule::StartupAndInterval(Duration::from_secs(3600)),
            Duration::from_millis(10),
        ));
        let runs = job.runs.clone();
        scheduler.register_job(job);

        let scheduler_task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        scheduler_task.await.unwrap().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let history = server_store.get_job_history("startup_job", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobRunStatus::Completed);
        assert_eq!(history[0].triggered_by, "startup");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interval_job_does_not_run_before_its_slot() {
        let dir = TempDir::new().unwrap();
        let (ctx, _server_store) = test_context(&dir);
        let shutdown = CancellationToken::new();
        let mut scheduler = JobScheduler::new(ctx, shutdown.clone())
            .with_check_interval(Duration::from_millis(20));

        let job = Arc::new(CountingJob::new(
            "slow_interval_job",
            JobSchedule::Interval(Duration::from_secs(3600)),
            Duration::from_millis(1),
        ));
        let runs = job.runs.clone();
        scheduler.register_job(job);

        let scheduler_task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        scheduler_task.await.unwrap().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_due_job_runs_without_overlap() {
        let dir = TempDir::new().unwrap();
        let (ctx, server_store) = test_context(&dir);
        let shutdown = CancellationToken::new();
        let mut scheduler = JobScheduler::new(ctx, shutdown.clone())
            .with_check_interval(Duration::from_millis(20));

        // Interval far shorter than the work itself, so every check finds
        // the job due again while the previous run is still going.
        let job = Arc::new(CountingJob::new(
            "overlap_job",
            JobSchedule::Interval(Duration::from_millis(10)),
            Duration::from_millis(150),
        ));
        let max_concurrent = job.max_concurrent.clone();
        let runs = job.runs.clone();
        scheduler.register_job(job);

        let scheduler_task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown.cancel();
        scheduler_task.await.unwrap().unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 1);
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);

        let history = server_store.get_job_history("overlap_job", 50).unwrap();
        assert!(history
            .iter()
            .all(|run| run.status != JobRunStatus::Running));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stale_runs_marked_failed_on_startup() {
        let dir = TempDir::new().unwrap();
        let (ctx, server_store) = test_context(&dir);
        server_store
            .record_job_start("interrupted_job", "schedule")
            .unwrap();

        let shutdown = CancellationToken::new();
        let scheduler = JobScheduler::new(ctx, shutdown.clone());
        let scheduler_task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        scheduler_task.await.unwrap().unwrap();

        let history = server_store
            .get_job_history("interrupted_job", 10)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobRunStatus::Failed);
    }
}
