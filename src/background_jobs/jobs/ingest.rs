//! Background job that pulls upcoming events from the listing source into
//! the event store, location by location.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::ingestion::IngestPipeline;
use chrono::Utc;
use std::time::Duration;
use tracing::info;

pub struct IngestEventsJob {
    interval_hours: u64,
}

impl IngestEventsJob {
    pub fn new(interval_hours: u64) -> Self {
        Self { interval_hours }
    }
}

impl Default for IngestEventsJob {
    fn default() -> Self {
        Self::new(24)
    }
}

impl BackgroundJob for IngestEventsJob {
    fn id(&self) -> &'static str {
        "ingest_events"
    }

    fn name(&self) -> &'static str {
        "Event Ingestion"
    }

    fn description(&self) -> &'static str {
        "Fetches upcoming events for all enabled locations and stores them in daily buckets"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::StartupAndInterval(Duration::from_secs(self.interval_hours * 60 * 60))
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let pipeline = IngestPipeline::new(
            ctx.event_store.clone(),
            ctx.event_source.clone(),
            ctx.settings.future_days_max,
            ctx.cancellation_token.clone(),
        );

        let now = Utc::now();
        let stats = pipeline.run_all(now.date_naive())?;
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        info!(
            "Ingestion finished: {} events admitted over {} pages ({} locations, {} failed)",
            stats.events_admitted,
            stats.pages_fetched,
            stats.locations_processed,
            stats.locations_failed
        );
        ctx.server_store
            .set_state("last_ingest_completed_at", &now.to_rfc3339())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_metadata() {
        let job = IngestEventsJob::default();
        assert_eq!(job.id(), "ingest_events");
        assert!(job.schedule().runs_on_startup());
        assert_eq!(job.schedule().interval(), Duration::from_secs(24 * 60 * 60));
    }
}
