use super::models::{
    Event, Location, PopularityCollection, PopularityRef, FALLBACK_ARTIST_IMAGE,
};
use super::schema::EVENT_VERSIONED_SCHEMAS;
use super::trait_def::EventStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Flat-table address of a category-namespace counter:
/// (user_id, category, sub_category), with '' meaning "global" and
/// "the category doc itself" respectively.
struct CategoryKey {
    user_id: String,
    category: String,
    sub_category: String,
}

pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open event database")?;
        if is_new_db {
            info!("Creating new event database at {:?}", path);
        }
        open_versioned(&mut conn, EVENT_VERSIONED_SCHEMAS, is_new_db)
            .context("Event database schema check failed")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn format_date(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    /// Map a category-side ref onto its table key. `None` for event refs.
    fn category_key(popularity_ref: &PopularityRef) -> Option<CategoryKey> {
        match &popularity_ref.collection {
            PopularityCollection::EventBucket { .. } => None,
            PopularityCollection::Categories => Some(CategoryKey {
                user_id: String::new(),
                category: popularity_ref.id.clone(),
                sub_category: String::new(),
            }),
            PopularityCollection::SubCategories { category } => Some(CategoryKey {
                user_id: String::new(),
                category: category.clone(),
                sub_category: popularity_ref.id.clone(),
            }),
            PopularityCollection::UserCategories { user_id } => Some(CategoryKey {
                user_id: user_id.clone(),
                category: popularity_ref.id.clone(),
                sub_category: String::new(),
            }),
            PopularityCollection::UserSubCategories { user_id, category } => Some(CategoryKey {
                user_id: user_id.clone(),
                category: category.clone(),
                sub_category: popularity_ref.id.clone(),
            }),
        }
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
        let utc_str: String = row.get("utc_date_time")?;
        let categories_json: String = row.get("categories")?;
        let artist_image_src: Option<String> = row.get("artist_image_src")?;
        let utc_date_time = DateTime::parse_from_rfc3339(&utc_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let bucket_date_str: String = row.get("date")?;

        Ok(Event {
            event_id: row.get("event_id")?,
            title: row.get("title")?,
            venue_name: row.get("venue_name")?,
            artist_id: row.get("artist_id")?,
            artist_name: row.get("artist_name")?,
            // Fallback image applied on read, matching the original's
            // event pre-processing.
            artist_image_src: match artist_image_src {
                Some(src) if !src.is_empty() => Some(src),
                _ => Some(FALLBACK_ARTIST_IMAGE.to_string()),
            },
            event_url: row.get("event_url")?,
            utc_date_time,
            categories: serde_json::from_str(&categories_json).unwrap_or_default(),
            popularity: row.get::<_, i64>("popularity")?.max(0) as u64,
            popularity_normalized: row.get("popularity_normalized")?,
            location: row.get("location")?,
            bucket_date: NaiveDate::parse_from_str(&bucket_date_str, "%Y-%m-%d")
                .unwrap_or_else(|_| utc_date_time.date_naive()),
            score: None,
        })
    }
}

impl EventStore for SqliteEventStore {
    fn increment_popularity(&self, popularity_ref: &PopularityRef) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        match Self::category_key(popularity_ref) {
            Some(key) => {
                conn.execute(
                    "INSERT INTO category_popularity (user_id, category, sub_category, popularity)
                     VALUES (?1, ?2, ?3, 1)
                     ON CONFLICT(user_id, category, sub_category)
                     DO UPDATE SET popularity = popularity + 1",
                    params![key.user_id, key.category, key.sub_category],
                )?;
            }
            None => {
                let (date, location) = match &popularity_ref.collection {
                    PopularityCollection::EventBucket { date, location } => (*date, location),
                    _ => unreachable!(),
                };
                conn.execute(
                    "INSERT INTO events (date, location, event_id, popularity)
                     VALUES (?1, ?2, ?3, 1)
                     ON CONFLICT(date, location, event_id)
                     DO UPDATE SET popularity = popularity + 1",
                    params![Self::format_date(date), location, popularity_ref.id],
                )?;
            }
        }
        Ok(())
    }

    fn write_popularity(&self, popularity_ref: &PopularityRef, value: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        match Self::category_key(popularity_ref) {
            Some(key) => {
                // Partial update first, merge-create if the doc is missing.
                let updated = conn.execute(
                    "UPDATE category_popularity SET popularity = ?4
                     WHERE user_id = ?1 AND category = ?2 AND sub_category = ?3",
                    params![key.user_id, key.category, key.sub_category, value as i64],
                )?;
                if updated == 0 {
                    conn.execute(
                        "INSERT INTO category_popularity (user_id, category, sub_category, popularity)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(user_id, category, sub_category)
                         DO UPDATE SET popularity = excluded.popularity",
                        params![key.user_id, key.category, key.sub_category, value as i64],
                    )?;
                }
            }
            None => {
                let (date, location) = match &popularity_ref.collection {
                    PopularityCollection::EventBucket { date, location } => (*date, location),
                    _ => unreachable!(),
                };
                let updated = conn.execute(
                    "UPDATE events SET popularity = ?4
                     WHERE date = ?1 AND location = ?2 AND event_id = ?3",
                    params![
                        Self::format_date(date),
                        location,
                        popularity_ref.id,
                        value as i64
                    ],
                )?;
                if updated == 0 {
                    conn.execute(
                        "INSERT INTO events (date, location, event_id, popularity)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(date, location, event_id)
                         DO UPDATE SET popularity = excluded.popularity",
                        params![
                            Self::format_date(date),
                            location,
                            popularity_ref.id,
                            value as i64
                        ],
                    )?;
                }
            }
        }
        Ok(())
    }

    fn write_normalized_popularity(
        &self,
        popularity_ref: &PopularityRef,
        value: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        match Self::category_key(popularity_ref) {
            Some(key) => {
                let updated = conn.execute(
                    "UPDATE category_popularity SET popularity_normalized = ?4
                     WHERE user_id = ?1 AND category = ?2 AND sub_category = ?3",
                    params![key.user_id, key.category, key.sub_category, value],
                )?;
                if updated == 0 {
                    conn.execute(
                        "INSERT INTO category_popularity
                         (user_id, category, sub_category, popularity_normalized)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(user_id, category, sub_category)
                         DO UPDATE SET popularity_normalized = excluded.popularity_normalized",
                        params![key.user_id, key.category, key.sub_category, value],
                    )?;
                }
            }
            None => {
                let (date, location) = match &popularity_ref.collection {
                    PopularityCollection::EventBucket { date, location } => (*date, location),
                    _ => unreachable!(),
                };
                let updated = conn.execute(
                    "UPDATE events SET popularity_normalized = ?4
                     WHERE date = ?1 AND location = ?2 AND event_id = ?3",
                    params![
                        Self::format_date(date),
                        location,
                        popularity_ref.id,
                        value
                    ],
                )?;
                if updated == 0 {
                    conn.execute(
                        "INSERT INTO events (date, location, event_id, popularity_normalized)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(date, location, event_id)
                         DO UPDATE SET popularity_normalized = excluded.popularity_normalized",
                        params![
                            Self::format_date(date),
                            location,
                            popularity_ref.id,
                            value
                        ],
                    )?;
                }
            }
        }
        Ok(())
    }

    fn popularity_snapshot(
        &self,
        collection: &PopularityCollection,
    ) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().unwrap();
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(String, u64)> {
            Ok((row.get(0)?, row.get::<_, i64>(1)?.max(0) as u64))
        };
        let rows = match collection {
            PopularityCollection::EventBucket { date, location } => {
                let mut stmt = conn.prepare(
                    "SELECT event_id, popularity FROM events WHERE date = ?1 AND location = ?2",
                )?;
                let rows = stmt
                    .query_map(params![Self::format_date(*date), location], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            PopularityCollection::Categories | PopularityCollection::UserCategories { .. } => {
                let user_id = match collection {
                    PopularityCollection::UserCategories { user_id } => user_id.clone(),
                    _ => String::new(),
                };
                let mut stmt = conn.prepare(
                    "SELECT category, popularity FROM category_popularity
                     WHERE user_id = ?1 AND sub_category = ''",
                )?;
                let rows = stmt
                    .query_map(params![user_id], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            PopularityCollection::SubCategories { category }
            | PopularityCollection::UserSubCategories { category, .. } => {
                let user_id = match collection {
                    PopularityCollection::UserSubCategories { user_id, .. } => user_id.clone(),
                    _ => String::new(),
                };
                let mut stmt = conn.prepare(
                    "SELECT sub_category, popularity FROM category_popularity
                     WHERE user_id = ?1 AND category = ?2 AND sub_category != ''",
                )?;
                let rows = stmt
                    .query_map(params![user_id, category], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows)
    }

    fn read_normalized_popularity(&self, popularity_ref: &PopularityRef) -> Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        let value = match Self::category_key(popularity_ref) {
            Some(key) => conn
                .query_row(
                    "SELECT popularity_normalized FROM category_popularity
                     WHERE user_id = ?1 AND category = ?2 AND sub_category = ?3",
                    params![key.user_id, key.category, key.sub_category],
                    |row| row.get(0),
                )
                .optional()?,
            None => {
                let (date, location) = match &popularity_ref.collection {
                    PopularityCollection::EventBucket { date, location } => (*date, location),
                    _ => unreachable!(),
                };
                conn.query_row(
                    "SELECT popularity_normalized FROM events
                     WHERE date = ?1 AND location = ?2 AND event_id = ?3",
                    params![Self::format_date(date), location, popularity_ref.id],
                    |row| row.get(0),
                )
                .optional()?
            }
        };
        Ok(value)
    }

    fn categories_in(&self, collection: &PopularityCollection) -> Result<Vec<String>> {
        let user_id = match collection {
            PopularityCollection::Categories => String::new(),
            PopularityCollection::UserCategories { user_id } => user_id.clone(),
            other => anyhow::bail!("Not a category-level collection: {}", other),
        };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT category FROM category_popularity
             WHERE user_id = ?1 AND sub_category = '' ORDER BY category",
        )?;
        let names = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn upsert_events(&self, date: NaiveDate, location: &str, events: &[Event]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for event in events {
            let categories_json = serde_json::to_string(&event.categories)?;
            // Merge semantics: popularity fields are owned by the counter
            // paths and survive re-ingestion untouched.
            tx.execute(
                "INSERT INTO events (date, location, event_id, title, venue_name, artist_id,
                                     artist_name, artist_image_src, event_url, utc_date_time,
                                     categories)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(date, location, event_id) DO UPDATE SET
                     title = excluded.title,
                     venue_name = excluded.venue_name,
                     artist_id = excluded.artist_id,
                     artist_name = excluded.artist_name,
                     artist_image_src = excluded.artist_image_src,
                     event_url = excluded.event_url,
                     utc_date_time = excluded.utc_date_time,
                     categories = excluded.categories",
                params![
                    Self::format_date(date),
                    location,
                    event.event_id,
                    event.title,
                    event.venue_name,
                    event.artist_id,
                    event.artist_name,
                    event.artist_image_src,
                    event.event_url,
                    event.utc_date_time.to_rfc3339(),
                    categories_json,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn events_in_bucket(&self, date: NaiveDate, location: &str) -> Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM events WHERE date = ?1 AND location = ?2 ORDER BY event_id",
        )?;
        let events = stmt
            .query_map(params![Self::format_date(date), location], Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn count_events_in_bucket(&self, date: NaiveDate, location: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE date = ?1 AND location = ?2",
            params![Self::format_date(date), location],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u32)
    }

    fn get_event(&self, date: NaiveDate, location: &str, event_id: &str) -> Result<Option<Event>> {
        let conn = self.conn.lock().unwrap();
        let event = conn
            .query_row(
                "SELECT * FROM events WHERE date = ?1 AND location = ?2 AND event_id = ?3",
                params![Self::format_date(date), location, event_id],
                Self::row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    fn list_locations(&self) -> Result<Vec<Location>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, latitude, longitude, online_events, daily_limit, enabled
             FROM locations ORDER BY id",
        )?;
        let locations = stmt
            .query_map([], |row| {
                Ok(Location {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                    online_events: row.get::<_, i64>(4)? != 0,
                    daily_limit: row.get::<_, i64>(5)?.max(0) as u32,
                    enabled: row.get::<_, i64>(6)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(locations)
    }

    fn put_location(&self, location: &Location) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO locations (id, name, latitude, longitude, online_events, daily_limit, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 latitude = excluded.latitude,
                 longitude = excluded.longitude,
                 online_events = excluded.online_events,
                 daily_limit = excluded.daily_limit,
                 enabled = excluded.enabled",
            params![
                location.id,
                location.name,
                location.latitude,
                location.longitude,
                location.online_events as i64,
                location.daily_limit as i64,
                location.enabled as i64,
            ],
        )?;
        Ok(())
    }

    fn user_profile_exists(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM user_profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn create_user_profile(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_profiles (user_id, created_at) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO NOTHING",
            params![user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn add_favorite_event(&self, user_id: &str, event: &Event) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO favorite_events (user_id, date, location, event_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, date, location, event_id) DO NOTHING",
            params![
                user_id,
                Self::format_date(event.bucket_date),
                event.location,
                event.event_id
            ],
        )?;
        Ok(())
    }

    fn remove_favorite_event(
        &self,
        user_id: &str,
        date: NaiveDate,
        location: &str,
        event_id: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM favorite_events
             WHERE user_id = ?1 AND date = ?2 AND location = ?3 AND event_id = ?4",
            params![user_id, Self::format_date(date), location, event_id],
        )?;
        Ok(())
    }

    fn favorite_event_ids(
        &self,
        user_id: &str,
        date: NaiveDate,
        location: &str,
    ) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT event_id FROM favorite_events
             WHERE user_id = ?1 AND date = ?2 AND location = ?3 ORDER BY event_id",
        )?;
        let ids = stmt
            .query_map(params![user_id, Self::format_date(date), location], |row| {
                row.get(0)
            })?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}
