//! Periodic job summarizing recent events.
//!
//! Nothing in the default cell list requires `Arc<Jobs>`, so it is never
//! constructed; it shows up in `hive-example hive` as a declared cell only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hive::{FlagSet, Flagger, HookInterface, Lifecycle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::EventSource;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    pub job_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            job_interval_ms: 5000,
        }
    }
}

impl Flagger for JobsConfig {
    fn flags(&self, flags: &mut FlagSet) {
        flags.add("job-interval-ms", self.job_interval_ms, "Interval between job runs");
    }
}

pub struct Jobs {
    config: Arc<JobsConfig>,
    events: Arc<EventSource>,
    runs: AtomicU64,
}

impl Jobs {
    fn run_once(&self) {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let recent = self.events.recent();
        tracing::info!(
            run,
            recent = recent.len(),
            last_seq = recent.last().map(|e| e.seq),
            "Job summary"
        );
    }
}

struct JobRunner {
    jobs: Arc<Jobs>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

#[async_trait]
impl HookInterface for JobRunner {
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let jobs = self.jobs.clone();
        let period = Duration::from_millis(jobs.config.job_interval_ms.max(1));
        let cancel = cancel.child_token();
        let stop = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => jobs.run_once(),
                }
            }
        });
        *self.task.lock() = Some((stop, handle));
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        let task = self.task.lock().take();
        if let Some((stop, handle)) = task {
            stop.cancel();
            handle.await?;
        }
        Ok(())
    }
}

pub fn new_jobs(config: Arc<JobsConfig>, events: Arc<EventSource>, lc: Lifecycle) -> anyhow::Result<Arc<Jobs>> {
    let jobs = Arc::new(Jobs {
        config,
        events,
        runs: AtomicU64::new(0),
    });
    lc.append(JobRunner {
        jobs: jobs.clone(),
        task: Mutex::new(None),
    });
    Ok(jobs)
}
