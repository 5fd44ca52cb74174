// =============================================================================
// Scheduler — job state and cooperative max_instances=1/coalesce=true timers
// =============================================================================
//
// Grounded on `WorkerScheduler` (`app/workers/scheduler.py`), an APScheduler
// wrapper registering four jobs: Monitor (interval minutes), Notifier
// (interval seconds), cleanup (cron 03:00 local), expire-positions (cron
// 01:00 local). APScheduler's `max_instances=1` and `coalesce=true` are
// reproduced here without a scheduler library: each job owns a `JobState`
// guarded by its own lock — a tick that finds the job already `Running`
// skips itself (max_instances=1); because the lock is only ever held for
// the duration of one run, a burst of missed ticks collapses into the next
// successful acquisition (coalesce=true). The interval-loop shape (an owned
// `tokio::time::interval`, spawned once per job) is grounded on `main.rs`'s
// per-symbol polling loops.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: &'static str,
    pub state: JobRunState,
    pub paused: bool,
    pub last_run: Option<DateTime<Utc>>,
}

struct JobState {
    name: &'static str,
    state: JobRunState,
    paused: bool,
    last_run: Option<DateTime<Utc>>,
}

impl JobState {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            state: JobRunState::Idle,
            paused: false,
            last_run: None,
        }
    }

    fn status(&self) -> JobStatus {
        JobStatus {
            name: self.name,
            state: self.state,
            paused: self.paused,
            last_run: self.last_run,
        }
    }
}

/// One lock-guarded slot per named job. Shared (via `Arc`) between the
/// spawned interval loops and the administrative HTTP surface (§4.17) that
/// exposes pause/resume/status/trigger.
pub struct Job {
    state: Mutex<JobState>,
    trigger: tokio::sync::Notify,
}

impl Job {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(JobState::new(name)),
            trigger: tokio::sync::Notify::new(),
        })
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status()
    }

    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
    }

    /// Requests an out-of-band run on the job's own loop. A no-op if the job
    /// is currently running; the loop will pick it up on its next iteration.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Runs `body` if the job isn't paused and isn't already running;
    /// otherwise skips this tick. This is `max_instances=1` plus
    /// `coalesce=true`: a burst of skipped ticks never queues extra runs,
    /// and the next tick that finds the lock free just runs once.
    async fn run_if_idle<F, Fut>(&self, body: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        {
            let mut guard = self.state.lock();
            if guard.paused {
                return;
            }
            if guard.state == JobRunState::Running {
                warn!(job = guard.name, "scheduler: tick skipped, job still running");
                return;
            }
            guard.state = JobRunState::Running;
        }

        body().await;

        let mut guard = self.state.lock();
        guard.state = JobRunState::Idle;
        guard.last_run = Some(Utc::now());
    }
}

/// The four named jobs, held by `AppState` and shared with the interval
/// loops spawned in `main.rs`.
pub struct Scheduler {
    pub monitor: Arc<Job>,
    pub notifier: Arc<Job>,
    pub cleanup: Arc<Job>,
    pub expire_positions: Arc<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            monitor: Job::new("monitor_positions"),
            notifier: Job::new("process_alerts"),
            cleanup: Job::new("cleanup_data"),
            expire_positions: Job::new("expire_positions"),
        }
    }

    pub fn all_status(&self) -> Vec<JobStatus> {
        vec![
            self.monitor.status(),
            self.notifier.status(),
            self.cleanup.status(),
            self.expire_positions.status(),
        ]
    }

    pub fn job(&self, name: &str) -> Option<&Arc<Job>> {
        match name {
            "monitor_positions" => Some(&self.monitor),
            "process_alerts" => Some(&self.notifier),
            "cleanup_data" => Some(&self.cleanup),
            "expire_positions" => Some(&self.expire_positions),
            _ => None,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives `job` on a fixed interval, running `tick` through `run_if_idle` on
/// every fire and immediately whenever `Job::trigger` is called.
pub async fn run_interval_loop<F, Fut>(job: Arc<Job>, period: std::time::Duration, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = job.trigger.notified() => {
                info!(job = job.state.lock().name, "scheduler: manual trigger");
            }
        }
        job.run_if_idle(&mut tick).await;
    }
}

/// Drives `job` at the next occurrence of `hour:minute` local-to-UTC each
/// day, per the cron jobs' fixed-time semantics (§4.12). Unlike the interval
/// jobs, cleanup/expire-positions ignore the session gate.
pub async fn run_daily_loop<F, Fut>(job: Arc<Job>, hour: u32, minute: u32, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        let now = Utc::now();
        let today_fire = now
            .date_naive()
            .and_hms_opt(hour, minute, 0)
            .expect("valid hour/minute");
        let next_fire = if now.naive_utc() < today_fire {
            today_fire
        } else {
            today_fire + chrono::Duration::days(1)
        };
        let wait = (next_fire - now.naive_utc())
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = job.trigger.notified() => {
                info!(job = job.state.lock().name, "scheduler: manual trigger");
            }
        }
        job.run_if_idle(&mut tick).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn run_if_idle_skips_reentrant_calls() {
        let job = Job::new("test");
        let counter = Arc::new(AtomicUsize::new(0));

        let slow_job = job.clone();
        let slow_counter = counter.clone();
        let slow = tokio::spawn(async move {
            slow_job
                .run_if_idle(|| async move {
                    slow_counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                })
                .await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        job.run_if_idle(|| async { counter.fetch_add(1, Ordering::SeqCst); })
            .await;

        slow.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(job.status().state, JobRunState::Idle);
    }

    #[tokio::test]
    async fn paused_job_never_runs() {
        let job = Job::new("test");
        job.pause();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        job.run_if_idle(|| async move { c.fetch_add(1, Ordering::SeqCst); }).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        job.resume();
        let c = counter.clone();
        job.run_if_idle(|| async move { c.fetch_add(1, Ordering::SeqCst); }).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scheduler_looks_up_jobs_by_name() {
        let scheduler = Scheduler::new();
        assert!(scheduler.job("monitor_positions").is_some());
        assert!(scheduler.job("unknown_job").is_none());
        assert_eq!(scheduler.all_status().len(), 4);
    }
}
