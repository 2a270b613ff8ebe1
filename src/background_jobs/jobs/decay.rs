//! Background job that ages out raw category popularity so stale interest
//! loses weight over time.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::popularity::decay_global_categories;
use std::time::Duration;
use tracing::info;

pub struct DecayPopularityJob {
    interval_hours: u64,
}

impl DecayPopularityJob {
    pub fn new(interval_hours: u64) -> Self {
        Self { interval_hours }
    }
}

impl Default for DecayPopularityJob {
    fn default() -> Self {
        Self::new(24)
    }
}

impl BackgroundJob for DecayPopularityJob {
    fn id(&self) -> &'static str {
        "decay_popularity"
    }

    fn name(&self) -> &'static str {
        "Popularity Decay"
    }

    fn description(&self) -> &'static str {
        "Multiplies raw global category counters by the decay factor, flooring to whole counts"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(Duration::from_secs(self.interval_hours * 60 * 60))
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        decay_global_categories(ctx.event_store.as_ref(), ctx.settings.decay_factor)?;
        info!(
            "Decayed global category popularity by factor {}",
            ctx.settings.decay_factor
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_metadata() {
        let job = DecayPopularityJob::default();
        assert_eq!(job.id(), "decay_popularity");
        assert!(!job.schedule().runs_on_startup());
        assert_eq!(job.schedule().interval(), Duration::from_secs(24 * 60 * 60));
    }
}
