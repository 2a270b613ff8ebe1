//! Scrape-based event ingestion.
//!
//! The pipeline pages through the remote upcoming-events feed per
//! location, buckets events by UTC calendar day behind a forward-only
//! cursor, enforces each location's daily quota and upserts one batch per
//! page. Detail-page enrichment (genre tags) is best effort.

mod pipeline;
mod source;

pub use pipeline::{
    derive_source_id, IngestError, IngestPipeline, IngestStats, DEFAULT_FUTURE_DAYS_MAX,
};
pub use source::{BandsintownClient, EventDetail, EventSource, RawEvent};
