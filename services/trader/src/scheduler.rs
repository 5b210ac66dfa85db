//! Daily job scheduler.
//!
//! Jobs fire once per day at a fixed local time. The trader uses this for
//! day-rollover work: strategy replay and risk-counter resets. Job state is
//! exposed through `get_jobs` on the IPC surface.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use qtrader_common::types::JobView;

type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Job {
    name: String,
    at: NaiveTime,
    enabled: bool,
    last_run: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
    run: JobFn,
}

fn next_run_after(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Daily task scheduler for one trader process
#[derive(Clone, Default)]
pub struct TaskScheduler {
    jobs: Arc<Mutex<Vec<Job>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TaskScheduler {
    /// Create an empty scheduler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job firing daily at `at`
    pub fn add_daily<F, Fut>(&self, name: impl Into<String>, at: NaiveTime, run: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!(job = %name, time = %at, "daily job added");
        self.jobs.lock().push(Job {
            name,
            at,
            enabled: true,
            last_run: None,
            next_run: next_run_after(Utc::now(), at),
            run: Arc::new(move || Box::pin(run())),
        });
    }

    /// Start the polling loop
    pub fn start(&self) {
        let jobs = Arc::clone(&self.jobs);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let due: Vec<(String, JobFn)> = {
                    let mut jobs = jobs.lock();
                    jobs.iter_mut()
                        .filter(|job| job.enabled && job.next_run <= now)
                        .map(|job| {
                            job.last_run = Some(now);
                            job.next_run = next_run_after(now, job.at);
                            (job.name.clone(), Arc::clone(&job.run))
                        })
                        .collect()
                };
                for (name, run) in due {
                    info!(job = %name, "job firing");
                    // Each job runs in its own task so a panic stays contained.
                    if let Err(e) = tokio::spawn(run()).await {
                        error!(job = %name, error = %e, "job failed");
                    }
                }
            }
        });
        *self.task.lock() = Some(handle);
    }

    /// Stop the polling loop
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// Job snapshots for the IPC surface
    #[must_use]
    pub fn jobs(&self) -> Vec<JobView> {
        self.jobs
            .lock()
            .iter()
            .map(|job| JobView {
                name: job.name.clone(),
                enabled: job.enabled,
                next_run: Some(job.next_run),
                last_run: job.last_run,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_next_run_today_or_tomorrow() {
        let now = Utc::now();
        let later = (now + Duration::hours(1)).time();
        let earlier = (now - Duration::hours(1)).time();
        assert!(next_run_after(now, later) > now);
        assert!(next_run_after(now, later) - now <= Duration::hours(2));
        let tomorrow = next_run_after(now, earlier);
        assert!(tomorrow > now);
        assert!(tomorrow - now >= Duration::hours(22));
        assert_eq!(tomorrow.time().hour(), earlier.hour());
    }

    #[tokio::test]
    async fn test_job_snapshot() {
        let scheduler = TaskScheduler::new();
        scheduler.add_daily("rollover", NaiveTime::from_hms_opt(20, 30, 0).unwrap(), || async {});
        let jobs = scheduler.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "rollover");
        assert!(jobs[0].enabled);
        assert!(jobs[0].next_run.is_some());
        assert!(jobs[0].last_run.is_none());
    }
}
