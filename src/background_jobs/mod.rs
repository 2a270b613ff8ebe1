//! Background job scheduling and execution system.
//!
//! This module provides infrastructure for running the periodic maintenance
//! tasks the server needs: event ingestion, popularity normalization, decay.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::{JobContext, JobSettings};
pub use job::{BackgroundJob, JobError, JobSchedule};
pub use scheduler::JobScheduler;
