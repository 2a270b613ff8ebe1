//! Popularity maintenance: batch normalization and decay of the raw
//! popularity counters kept by the event store.
//!
//! Both passes are advisory. Individual write failures are logged and the
//! rest of the batch keeps going, since a stale normalized value only skews
//! a recommendation score until the next pass.

use crate::event_store::{EventStore, PopularityCollection, PopularityRef};
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

/// Raw popularity is multiplied by this once per decay period.
pub const DEFAULT_DECAY_FACTOR: f64 = 0.8;

/// How many days of event buckets (starting today) get re-normalized.
pub const DEFAULT_NORMALIZE_WINDOW_DAYS: i64 = 3;

/// Normalize every member of a collection against the collection maximum.
///
/// The largest raw value maps to exactly 1.0; if every member is at 0 the
/// whole collection normalizes to 0.
pub fn normalize_collection(
    store: &dyn EventStore,
    collection: &PopularityCollection,
) -> Result<()> {
    let snapshot = store.popularity_snapshot(collection)?;
    if snapshot.is_empty() {
        return Ok(());
    }

    let max_popularity = snapshot.iter().map(|(_, raw)| *raw).max().unwrap_or(0);
    debug!(
        collection = %collection,
        members = snapshot.len(),
        max_popularity,
        "Normalizing popularity collection"
    );

    for (id, raw) in snapshot {
        let normalized = if max_popularity == 0 {
            0.0
        } else {
            raw as f64 / max_popularity as f64
        };
        let popularity_ref = PopularityRef::new(collection.clone(), &id);
        if let Err(err) = store.write_normalized_popularity(&popularity_ref, normalized) {
            warn!(collection = %collection, id, "Failed to write normalized popularity: {err:#}");
        }
    }
    Ok(())
}

/// Multiply every positive raw counter in a collection by `factor`,
/// flooring the result. A counter decayed to 0 stays there until the next
/// increment.
pub fn decay_collection(
    store: &dyn EventStore,
    collection: &PopularityCollection,
    factor: f64,
) -> Result<()> {
    let snapshot = store.popularity_snapshot(collection)?;
    for (id, raw) in snapshot {
        if raw == 0 {
            continue;
        }
        let decayed = (raw as f64 * factor).floor().max(0.0) as u64;
        let popularity_ref = PopularityRef::new(collection.clone(), &id);
        if let Err(err) = store.write_popularity(&popularity_ref, decayed) {
            warn!(collection = %collection, id, "Failed to write decayed popularity: {err:#}");
        }
    }
    Ok(())
}

/// Normalize the event buckets of the next `window_days` days for every
/// given location, starting at `today`.
pub fn normalize_event_buckets(
    store: &dyn EventStore,
    today: NaiveDate,
    window_days: i64,
    locations: &[String],
) -> Result<()> {
    for day_offset in 0..window_days {
        let date = today + Duration::days(day_offset);
        for location in locations {
            normalize_collection(
                store,
                &PopularityCollection::EventBucket {
                    date,
                    location: location.clone(),
                },
            )?;
        }
    }
    Ok(())
}

/// Normalize the global category collection and, one level down, each
/// category's subcategory collection.
pub fn normalize_global_categories(store: &dyn EventStore) -> Result<()> {
    normalize_collection(store, &PopularityCollection::Categories)?;
    for category in store.categories_in(&PopularityCollection::Categories)? {
        normalize_collection(store, &PopularityCollection::SubCategories { category })?;
    }
    Ok(())
}

/// Normalize one user's private category/subcategory mirrors. Triggered
/// after a session recorded at least one accept.
pub fn normalize_user_categories(store: &dyn EventStore, user_id: &str) -> Result<()> {
    let user_categories = PopularityCollection::UserCategories {
        user_id: user_id.to_string(),
    };
    normalize_collection(store, &user_categories)?;
    for category in store.categories_in(&user_categories)? {
        normalize_collection(
            store,
            &PopularityCollection::UserSubCategories {
                user_id: user_id.to_string(),
                category,
            },
        )?;
    }
    Ok(())
}

/// Decay the global category and subcategory counters. Events are not
/// decayed, only categories.
pub fn decay_global_categories(store: &dyn EventStore, factor: f64) -> Result<()> {
    decay_collection(store, &PopularityCollection::Categories, factor)?;
    for category in store.categories_in(&PopularityCollection::Categories)? {
        decay_collection(store, &PopularityCollection::SubCategories { category }, factor)?;
    }
    Ok(())
}
