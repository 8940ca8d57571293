// Background jobs

pub mod rollover;

use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::config::Config;
use crate::services::live::LiveFeed;

/// Registers the daily rollover and starts the scheduler.
pub async fn start_scheduler(
    pool: PgPool,
    feed: LiveFeed,
    config: Config,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    let schedule = config.rollover_cron.clone();
    let offset = config.facility_offset();

    // Cron fields are read in facility local time
    let job = Job::new_async_tz(schedule.as_str(), offset, move |_id, _scheduler| {
        let pool = pool.clone();
        let feed = feed.clone();
        let config = config.clone();

        Box::pin(async move {
            if let Err(e) = rollover::run(&pool, &feed, &config, chrono::Utc::now()).await {
                tracing::error!(error = %e, "Daily rollover failed");
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(schedule = %schedule, offset = %offset, "Rollover job scheduled");
    Ok(scheduler)
}
