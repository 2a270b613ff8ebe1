//! EventStore trait definition.
//!
//! Abstracts the hierarchical event/popularity document store so the
//! pipeline, maintenance jobs, scorer and sessions never touch the backing
//! database directly.

use super::models::{Event, Location, PopularityCollection, PopularityRef};
use anyhow::Result;
use chrono::NaiveDate;

/// Storage backend for events, popularity counters, locations and per-user
/// data.
///
/// Popularity writes are field-level idempotent: increments are atomic
/// upserts, normalized writes are last-write-wins. Callers on advisory paths
/// (normalization, decay) log failures instead of propagating them.
pub trait EventStore: Send + Sync {
    // =========================================================================
    // Popularity counters
    // =========================================================================

    /// Atomically add 1 to the target's raw popularity, creating the counter
    /// at 1 if the target document does not exist yet.
    fn increment_popularity(&self, popularity_ref: &PopularityRef) -> Result<()>;

    /// Overwrite the target's raw popularity (used by decay). Creates the
    /// document if missing.
    fn write_popularity(&self, popularity_ref: &PopularityRef, value: u64) -> Result<()>;

    /// Best-effort upsert of the normalized popularity field: partial update
    /// first, merge-create fallback if the target does not exist.
    fn write_normalized_popularity(&self, popularity_ref: &PopularityRef, value: f64)
        -> Result<()>;

    /// One-shot snapshot of a collection's raw popularity counters.
    fn popularity_snapshot(&self, collection: &PopularityCollection) -> Result<Vec<(String, u64)>>;

    /// Read the normalized popularity of one counter. `None` means the
    /// document does not exist (distinct from an existing counter at 0).
    fn read_normalized_popularity(&self, popularity_ref: &PopularityRef) -> Result<Option<f64>>;

    /// List the category document ids of a category-level collection, for
    /// the one-level recursion into subcategory collections.
    fn categories_in(&self, collection: &PopularityCollection) -> Result<Vec<String>>;

    // =========================================================================
    // Event buckets
    // =========================================================================

    /// Upsert a page of events into a bucket in one transaction. Existing
    /// popularity fields are preserved (merge semantics).
    fn upsert_events(&self, date: NaiveDate, location: &str, events: &[Event]) -> Result<()>;

    fn events_in_bucket(&self, date: NaiveDate, location: &str) -> Result<Vec<Event>>;

    fn count_events_in_bucket(&self, date: NaiveDate, location: &str) -> Result<u32>;

    fn get_event(&self, date: NaiveDate, location: &str, event_id: &str) -> Result<Option<Event>>;

    // =========================================================================
    // Locations
    // =========================================================================

    /// All configured locations, enabled or not.
    fn list_locations(&self) -> Result<Vec<Location>>;

    fn put_location(&self, location: &Location) -> Result<()>;

    // =========================================================================
    // Users
    // =========================================================================

    /// Whether the user has a profile document. Drives the cold-start rule:
    /// without a profile the per-user scoring term is omitted entirely.
    fn user_profile_exists(&self, user_id: &str) -> Result<bool>;

    fn create_user_profile(&self, user_id: &str) -> Result<()>;

    fn add_favorite_event(&self, user_id: &str, event: &Event) -> Result<()>;

    fn remove_favorite_event(
        &self,
        user_id: &str,
        date: NaiveDate,
        location: &str,
        event_id: &str,
    ) -> Result<()>;

    fn favorite_event_ids(
        &self,
        user_id: &str,
        date: NaiveDate,
        location: &str,
    ) -> Result<Vec<String>>;
}
