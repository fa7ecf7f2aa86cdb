//! Protected (single-flight) scheduling.
//!
//! The scheduled job reads and rewrites the singleton frontier and failure
//! set, so two runs must never overlap. A trigger that arrives while a run
//! is in progress is dropped, not queued.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::error::Result;

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The job ran to completion.
    Ran,
    /// The job ran and returned an error, which was logged.
    Failed(String),
    /// A previous run was still in progress.
    Skipped,
}

/// A job that never runs concurrently with itself.
#[derive(Clone)]
pub struct ProtectedTask {
    name: Arc<str>,
    running: Arc<Mutex<()>>,
    job: JobFn,
}

impl ProtectedTask {
    pub fn new<F>(name: impl Into<Arc<str>>, job: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            running: Arc::new(Mutex::new(())),
            job: Arc::new(job),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run the job unless a run is already in progress.
    ///
    /// Errors from the job are logged and reported, never propagated, so
    /// the next tick proceeds normally.
    pub async fn trigger(&self) -> TriggerOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            warn!(task = %self.name, "previous run still in progress, skipping trigger");
            return TriggerOutcome::Skipped;
        };
        match (self.job)().await {
            Ok(()) => TriggerOutcome::Ran,
            Err(e) => {
                let message = format!("{e:#}");
                error!(task = %self.name, error = %message, "scheduled run failed");
                TriggerOutcome::Failed(message)
            }
        }
    }
}

/// Cron-driven runner for [`ProtectedTask`]s.
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            inner: JobScheduler::new().await?,
        })
    }

    /// Trigger `task` on every tick of the six-field cron `schedule`.
    pub async fn add(&self, schedule: &str, task: ProtectedTask) -> Result<()> {
        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let task = task.clone();
            Box::pin(async move {
                task.trigger().await;
            })
        })?;
        self.inner.add(job).await?;
        info!(schedule, "scheduled job added");
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.inner.start().await?;
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn slow_task(runs: Arc<AtomicUsize>, concurrent: Arc<AtomicUsize>) -> ProtectedTask {
        ProtectedTask::new("update", move || {
            let runs = runs.clone();
            let concurrent = concurrent.clone();
            Box::pin(async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                assert_eq!(now, 1, "two runs overlapped");
                tokio::time::sleep(Duration::from_secs(10)).await;
                runs.fetch_add(1, Ordering::SeqCst);
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_trigger_is_skipped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = slow_task(runs.clone(), Arc::new(AtomicUsize::new(0)));

        let first = tokio::spawn({
            let task = task.clone();
            async move { task.trigger().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(task.is_running());

        assert_eq!(task.trigger().await, TriggerOutcome::Skipped);
        assert_eq!(first.await.unwrap(), TriggerOutcome::Ran);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Once finished, the next trigger runs.
        assert_eq!(task.trigger().await, TriggerOutcome::Ran);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_job_error_is_reported_not_propagated() {
        let task = ProtectedTask::new("update", || {
            Box::pin(async { Err::<(), _>(anyhow::anyhow!("store unavailable")) })
        });
        assert_eq!(
            task.trigger().await,
            TriggerOutcome::Failed("store unavailable".into())
        );
        assert!(!task.is_running());
    }
}
