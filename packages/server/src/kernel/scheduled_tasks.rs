//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Each [`ScheduledJob`] pairs a six-field cron expression
//! (`sec min hour day month weekday`) with a zero-argument async handler.
//!
//! # Behaviour
//!
//! - Every firing runs through [`ScheduledJob::run_guarded`]: an error or a
//!   panic is logged and the next firing happens as usual. Job panics are
//!   exempt from the process-wide hook in [`super::panics`].
//! - There is no overlap protection. A handler that outlives its interval
//!   runs concurrently with the next firing.
//! - Jobs are process-local; several instances each run every job.
//!
//! ```text
//! Scheduler
//!     ├─► purge_soft_deleted   (daily 03:00)
//!     ├─► publish_statistics   (hourly)  ─► "statistics" room
//!     └─► audit_aggregates     (hourly, :30)
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::resources::jobs;
use crate::kernel::{panics, ServerDeps};

pub const PURGE_SCHEDULE: &str = "0 0 3 * * *";
pub const STATISTICS_SCHEDULE: &str = "0 0 * * * *";
pub const AUDIT_SCHEDULE: &str = "0 30 * * * *";

type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type JobHandler = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// A named handler plus the cron expression that fires it.
#[derive(Clone)]
pub struct ScheduledJob {
    pub name: String,
    pub cron_expression: String,
    handler: JobHandler,
}

impl ScheduledJob {
    pub fn new<F, Fut>(name: impl Into<String>, cron_expression: impl Into<String>, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            cron_expression: cron_expression.into(),
            handler: Arc::new(move || Box::pin(handler()) as JobFuture),
        }
    }

    /// Run the handler once. Returns `false` if it failed or panicked.
    pub async fn run_guarded(&self) -> bool {
        let started = Instant::now();
        tracing::debug!(job = %self.name, "Scheduled job started");

        match panics::contain(AssertUnwindSafe((self.handler)()).catch_unwind()).await {
            Ok(Ok(())) => {
                tracing::info!(
                    job = %self.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scheduled job finished"
                );
                true
            }
            Ok(Err(e)) => {
                tracing::error!(job = %self.name, error = %format!("{:#}", e), "Scheduled job failed");
                false
            }
            Err(_) => {
                tracing::error!(job = %self.name, "Scheduled job panicked");
                false
            }
        }
    }
}

impl std::fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("name", &self.name)
            .field("cron_expression", &self.cron_expression)
            .finish_non_exhaustive()
    }
}

/// Register and start every job. An invalid cron expression fails here,
/// before anything is scheduled.
pub async fn start_scheduler(jobs: Vec<ScheduledJob>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let mut names = Vec::with_capacity(jobs.len());
    for job in jobs {
        let cron = job.cron_expression.clone();
        let name = job.name.clone();
        let entry = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let job = job.clone();
            Box::pin(async move {
                job.run_guarded().await;
            })
        })
        .with_context(|| format!("invalid cron expression '{}' for job {}", cron, name))?;

        scheduler.add(entry).await?;
        names.push(name);
    }

    scheduler.start().await?;
    tracing::info!(jobs = ?names, "Scheduled tasks started");
    Ok(scheduler)
}

/// The platform's own maintenance jobs.
pub fn builtin_jobs(deps: &ServerDeps, retention: chrono::Duration) -> Vec<ScheduledJob> {
    let purge_store = deps.store.clone();
    let purge = ScheduledJob::new("purge_soft_deleted", PURGE_SCHEDULE, move || {
        let store = purge_store.clone();
        async move {
            jobs::purge_soft_deleted(store.as_ref(), retention).await?;
            Ok::<(), anyhow::Error>(())
        }
    });

    let stats_deps = deps.clone();
    let statistics = ScheduledJob::new("publish_statistics", STATISTICS_SCHEDULE, move || {
        let deps = stats_deps.clone();
        async move {
            jobs::publish_statistics(deps.store.as_ref(), &deps.catalog, &deps.rooms).await?;
            Ok::<(), anyhow::Error>(())
        }
    });

    let audit_deps = deps.clone();
    let audit = ScheduledJob::new("audit_aggregates", AUDIT_SCHEDULE, move || {
        let deps = audit_deps.clone();
        async move {
            let drift = jobs::audit_aggregates(deps.store.as_ref(), &deps.catalog).await?;
            if !drift.is_empty() {
                tracing::warn!(targets = drift.len(), "Aggregate audit found drifted targets");
            }
            Ok::<(), anyhow::Error>(())
        }
    });

    vec![purge, statistics, audit]
}
