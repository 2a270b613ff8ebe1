//! Scrape-to-store ingestion pipeline.
//!
//! Walks the paginated upcoming-events feed of each enabled location and
//! files events into per-day buckets, advancing a forward-only date cursor
//! and enforcing the location's daily quota along the way.

use super::source::{EventSource, RawEvent};
use crate::event_store::{Category, Event, EventStore, Location};
use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

lazy_static! {
    static ref FIRST_DIGIT_RUN_RE: Regex = Regex::new(r"\d+").unwrap();
}

/// Events further out than this many days from the run date are not
/// ingested.
pub const DEFAULT_FUTURE_DAYS_MAX: i64 = 14;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to fetch page {page} for {location}: {source}")]
    PageFetch {
        location: String,
        page: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to read bucket {date} for {location}: {source}")]
    BucketRead {
        location: String,
        date: NaiveDate,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to commit events for {date} in {location}: {source}")]
    BatchCommit {
        location: String,
        date: NaiveDate,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub locations_processed: usize,
    pub locations_failed: usize,
    pub pages_fetched: usize,
    pub events_admitted: usize,
    pub quota_day_advances: usize,
    pub events_skipped_past: usize,
    pub events_skipped_missing_fields: usize,
    pub events_filtered_venue: usize,
    pub enrichment_failures: usize,
}

impl IngestStats {
    fn absorb(&mut self, other: &IngestStats) {
        self.pages_fetched += other.pages_fetched;
        self.events_admitted += other.events_admitted;
        self.quota_day_advances += other.quota_day_advances;
        self.events_skipped_past += other.events_skipped_past;
        self.events_skipped_missing_fields += other.events_skipped_missing_fields;
        self.events_filtered_venue += other.events_filtered_venue;
        self.enrichment_failures += other.enrichment_failures;
    }
}

pub struct IngestPipeline {
    store: Arc<dyn EventStore>,
    source: Arc<dyn EventSource>,
    future_days_max: i64,
    cancellation: CancellationToken,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn EventStore>,
        source: Arc<dyn EventSource>,
        future_days_max: i64,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            store,
            source,
            future_days_max,
            cancellation,
        }
    }

    /// Run the pipeline over every enabled location. A failing location is
    /// logged and does not stop the remaining ones.
    pub fn run_all(&self, today: NaiveDate) -> Result<IngestStats> {
        let locations = self.store.list_locations()?;
        let mut stats = IngestStats::default();

        for location in locations.into_iter().filter(|l| l.enabled) {
            if self.cancellation.is_cancelled() {
                info!("Ingestion cancelled, stopping before {}", location.name);
                break;
            }
            info!("Ingesting events for {}", location.name);
            match self.run_location(&location, today) {
                Ok(location_stats) => {
                    stats.locations_processed += 1;
                    stats.absorb(&location_stats);
                }
                Err(err) => {
                    stats.locations_failed += 1;
                    warn!("Ingestion failed for {}: {err:#}", location.name);
                }
            }
        }
        Ok(stats)
    }

    /// Page through one location's feed until the source runs dry, the
    /// future-day horizon is exceeded or the run is cancelled.
    pub fn run_location(
        &self,
        location: &Location,
        today: NaiveDate,
    ) -> Result<IngestStats, IngestError> {
        let mut stats = IngestStats::default();
        let mut cursor = today;
        let mut day_counter: i64 = 0;
        // Lazily seeded per day from the events already in the bucket.
        let mut day_quota: Option<u32> = None;
        let mut past_horizon = false;

        for page in 1u32.. {
            if past_horizon || self.cancellation.is_cancelled() {
                break;
            }

            let raw_events = self
                .source
                .fetch_page(page, location.latitude, location.longitude)
                .map_err(|source| IngestError::PageFetch {
                    location: location.id.clone(),
                    page,
                    source,
                })?;
            if raw_events.is_empty() {
                break;
            }
            stats.pages_fetched += 1;

            let mut page_batches: Vec<(NaiveDate, Vec<Event>)> = Vec::new();
            for raw in raw_events {
                if !location.online_events && raw.venue_name.as_deref() == Some("Streaming LIVE") {
                    stats.events_filtered_venue += 1;
                    continue;
                }

                let (event_url, start_time) = match (&raw.event_url, &raw.local_start_time) {
                    (Some(url), Some(start)) => (url.clone(), start.clone()),
                    _ => {
                        stats.events_skipped_missing_fields += 1;
                        continue;
                    }
                };
                let (Some(utc_date_time), Some(event_id)) =
                    (parse_start_time(&start_time), derive_source_id(&event_url))
                else {
                    stats.events_skipped_missing_fields += 1;
                    continue;
                };

                if utc_date_time <= bucket_midnight(today) {
                    stats.events_skipped_past += 1;
                    continue;
                }

                // Forward-only cursor: catch up to the event's day. An
                // event starting exactly at midnight belongs to that day.
                while bucket_midnight(cursor) + Duration::days(1) <= utc_date_time {
                    cursor += Duration::days(1);
                    day_counter += 1;
                    day_quota = None;
                }

                // Roll past full days: an event arriving at a full bucket
                // lands in the next day that still has room.
                loop {
                    if day_counter > self.future_days_max {
                        debug!(
                            "Horizon exceeded for {} at {} (event on {})",
                            location.name, cursor, utc_date_time
                        );
                        past_horizon = true;
                        break;
                    }
                    if day_quota.is_none() {
                        let existing = self
                            .store
                            .count_events_in_bucket(cursor, &location.id)
                            .map_err(|source| IngestError::BucketRead {
                                location: location.id.clone(),
                                date: cursor,
                                source,
                            })?;
                        day_quota = Some(existing.min(location.daily_limit));
                    }
                    if day_quota.unwrap_or(0) >= location.daily_limit {
                        cursor += Duration::days(1);
                        day_counter += 1;
                        day_quota = None;
                        stats.quota_day_advances += 1;
                        continue;
                    }
                    break;
                }
                if past_horizon {
                    break;
                }

                let event = self.build_event(
                    raw,
                    &event_id,
                    &event_url,
                    utc_date_time,
                    cursor,
                    location,
                    &mut stats,
                );
                match page_batches.last_mut() {
                    Some((date, batch)) if *date == cursor => batch.push(event),
                    _ => page_batches.push((cursor, vec![event])),
                }
                day_quota = Some(day_quota.unwrap_or(0) + 1);
                stats.events_admitted += 1;
            }

            // One commit per page batch; a failed commit drops this page but
            // surfaces the error to the caller.
            for (date, batch) in page_batches {
                self.store
                    .upsert_events(date, &location.id, &batch)
                    .map_err(|source| IngestError::BatchCommit {
                        location: location.id.clone(),
                        date,
                        source,
                    })?;
            }
        }

        info!(
            "Ingested {} events for {} ({} pages, {} quota day advances)",
            stats.events_admitted, location.name, stats.pages_fetched, stats.quota_day_advances
        );
        Ok(stats)
    }

    fn build_event(
        &self,
        raw: RawEvent,
        event_id: &str,
        event_url: &str,
        utc_date_time: DateTime<Utc>,
        bucket_date: NaiveDate,
        location: &Location,
        stats: &mut IngestStats,
    ) -> Event {
        // Genre enrichment is best effort: a failed or empty detail fetch
        // leaves the event without a category bucket.
        let categories = match self.source.fetch_detail(event_url) {
            Ok(Some(detail)) => vec![Category {
                name: "Music".to_string(),
                sub_group: Some("Genre".to_string()),
                sub_categories: detail.genres,
            }],
            Ok(None) => Vec::new(),
            Err(err) => {
                stats.enrichment_failures += 1;
                debug!("Detail fetch failed for {event_url}: {err:#}");
                Vec::new()
            }
        };

        Event {
            event_id: event_id.to_string(),
            title: raw.title.unwrap_or_default(),
            venue_name: raw.venue_name.unwrap_or_default(),
            artist_id: raw
                .artist_url
                .as_deref()
                .and_then(derive_source_id)
                .unwrap_or_default(),
            artist_name: raw.artist_name.unwrap_or_default(),
            artist_image_src: raw.artist_image_src,
            event_url: event_url.to_string(),
            utc_date_time,
            categories,
            popularity: 0,
            popularity_normalized: 0.0,
            location: location.id.clone(),
            bucket_date,
            score: None,
        }
    }
}

/// Namespaced identifier from the first run of digits in a source URL,
/// `bit_` marking Bandsintown as the source.
pub fn derive_source_id(url: &str) -> Option<String> {
    FIRST_DIGIT_RUN_RE
        .find(url)
        .map(|digits| format!("bit_{}", digits.as_str()))
}

fn bucket_midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
}

/// The source reports UTC start times, sometimes with and sometimes
/// without an explicit offset.
fn parse_start_time(start: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(start) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(start, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
