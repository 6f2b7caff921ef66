use super::context::JobContext;
use super::job::{BackgroundJob, JobError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Longest the scheduler sleeps before looking at its jobs again.
const MAX_IDLE: Duration = Duration::from_secs(60);

const RUNNING_POLL: Duration = Duration::from_secs(1);

/// How long shutdown waits for a running job.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

struct RunningJob {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Runs registered jobs at their interval until shutdown.
pub struct JobScheduler {
    jobs: HashMap<String, Arc<dyn BackgroundJob>>,

    /// When each job is due next. Jobs are due right after registration.
    next_runs: HashMap<String, Instant>,

    running: HashMap<String, RunningJob>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(shutdown_token: CancellationToken, job_context: JobContext) -> Self {
        Self {
            jobs: HashMap::new(),
            next_runs: HashMap::new(),
            running: HashMap::new(),
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!(
            "Registering job: {} - {} (every {:?})",
            job_id,
            job.description(),
            job.schedule().interval()
        );
        self.next_runs.insert(job_id.clone(), Instant::now());
        self.jobs.insert(job_id, job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        info!("Starting job scheduler with {} registered jobs", self.job_count());

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_job();
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs();
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Run a job now, outside its schedule.
    pub fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        if !self.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if self.is_running(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        self.spawn_job(job_id, "manual");
        Ok(())
    }

    fn is_running(&self, job_id: &str) -> bool {
        self.running
            .get(job_id)
            .is_some_and(|running| !running.handle.is_finished())
    }

    fn time_until_next_job(&self) -> Duration {
        let now = Instant::now();
        self.next_runs
            .iter()
            .map(|(job_id, next_run)| {
                let wait = next_run.saturating_duration_since(now);
                // Overdue but still running: check back shortly.
                if wait.is_zero() && self.is_running(job_id) {
                    RUNNING_POLL
                } else {
                    wait
                }
            })
            .min()
            .unwrap_or(MAX_IDLE)
            .min(MAX_IDLE)
    }

    fn run_due_jobs(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .next_runs
            .iter()
            .filter(|(_, next_run)| **next_run <= now)
            .map(|(job_id, _)| job_id.clone())
            .filter(|job_id| !self.is_running(job_id))
            .collect();

        for job_id in due {
            self.spawn_job(&job_id, "schedule");
        }
    }

    fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let Some(job) = self.jobs.get(job_id).cloned() else {
            error!("Attempted to spawn unknown job: {}", job_id);
            return;
        };

        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);
        self.next_runs
            .insert(job_id.to_string(), Instant::now() + job.schedule().interval());

        let cancel_token = self.shutdown_token.child_token();
        let ctx = self.job_context.with_token(cancel_token.clone());
        let job_id_owned = job_id.to_string();

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = job.execute(&ctx).await;
            let elapsed = start_time.elapsed();

            match result {
                Ok(()) => info!("Job {} completed successfully in {:?}", job_id_owned, elapsed),
                Err(JobError::Cancelled) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed)
                }
                Err(e) => error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e),
            }
        });

        self.running.insert(
            job_id.to_string(),
            RunningJob {
                handle,
                cancel_token,
            },
        );
    }

    async fn cleanup_completed_jobs(&mut self) {
        let finished: Vec<String> = self
            .running
            .iter()
            .filter(|(_, running)| running.handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in finished {
            if let Some(running) = self.running.remove(&job_id) {
                if let Err(e) = running.handle.await {
                    error!("Job {} panicked: {}", job_id, e);
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        for (job_id, running) in &self.running {
            debug!("Cancelling job: {}", job_id);
            running.cancel_token.cancel();
        }

        for (job_id, running) in self.running.drain() {
            if tokio::time::timeout(SHUTDOWN_GRACE, running.handle)
                .await
                .is_err()
            {
                error!("Job {} did not stop within {:?}", job_id, SHUTDOWN_GRACE);
            }
        }
        info!("Scheduler shutdown complete");
    }
}
