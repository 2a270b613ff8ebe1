//! Background job that recomputes normalized popularity for the near-term
//! event buckets and the global category tree.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::event_store::EventStore;
use crate::popularity::{normalize_event_buckets, normalize_global_categories};
use chrono::Utc;
use std::time::Duration;
use tracing::info;

pub struct NormalizePopularityJob {
    interval_hours: u64,
}

impl NormalizePopularityJob {
    pub fn new(interval_hours: u64) -> Self {
        Self { interval_hours }
    }
}

impl Default for NormalizePopularityJob {
    fn default() -> Self {
        Self::new(12)
    }
}

impl BackgroundJob for NormalizePopularityJob {
    fn id(&self) -> &'static str {
        "normalize_popularity"
    }

    fn name(&self) -> &'static str {
        "Popularity Normalization"
    }

    fn description(&self) -> &'static str {
        "Rescales raw popularity counters to [0, 1] for upcoming event buckets and global categories"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::StartupAndInterval(Duration::from_secs(self.interval_hours * 60 * 60))
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let store = ctx.event_store.as_ref();
        // Buckets are keyed by location id, not display name.
        let locations: Vec<String> = store
            .list_locations()?
            .into_iter()
            .filter(|l| l.enabled)
            .map(|l| l.id)
            .collect();

        normalize_event_buckets(
            store,
            Utc::now().date_naive(),
            ctx.settings.normalize_window_days,
            &locations,
        )?;
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        normalize_global_categories(store)?;

        info!(
            "Normalized popularity for {} locations over a {} day window",
            locations.len(),
            ctx.settings.normalize_window_days
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_metadata() {
        let job = NormalizePopularityJob::default();
        assert_eq!(job.id(), "normalize_popularity");
        assert!(job.schedule().runs_on_startup());
        assert_eq!(job.schedule().interval(), Duration::from_secs(12 * 60 * 60));
    }
}
