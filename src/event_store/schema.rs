//! SQLite schema for the event/popularity document store.
//!
//! The hierarchical document paths of the original store map onto flat
//! tables: event buckets are keyed by (date, location, event_id) and every
//! category counter lives in one table keyed by (user_id, category,
//! sub_category), with `user_id = ''` for the global namespace and
//! `sub_category = ''` for the category document itself.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const EVENTS_TABLE_V1: Table = Table {
    name: "events",
    columns: &[
        sqlite_column!("date", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text, non_null = true),
        sqlite_column!("event_id", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("venue_name", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("artist_id", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("artist_name", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("artist_image_src", &SqlType::Text),
        sqlite_column!("event_url", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("utc_date_time", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("categories", &SqlType::Text, non_null = true, default_value = Some("'[]'")),
        sqlite_column!("popularity", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!(
            "popularity_normalized",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    primary_key: &["date", "location", "event_id"],
    indices: &[("idx_events_bucket", "date, location")],
};

const CATEGORY_POPULARITY_TABLE_V1: Table = Table {
    name: "category_popularity",
    columns: &[
        // '' = global namespace
        sqlite_column!("user_id", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("category", &SqlType::Text, non_null = true),
        // '' = the category document itself, otherwise a subcategory name
        sqlite_column!("sub_category", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("popularity", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!(
            "popularity_normalized",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    primary_key: &["user_id", "category", "sub_category"],
    indices: &[("idx_category_popularity_user", "user_id")],
};

const LOCATIONS_TABLE_V1: Table = Table {
    name: "locations",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("latitude", &SqlType::Real, non_null = true, default_value = Some("0")),
        sqlite_column!("longitude", &SqlType::Real, non_null = true, default_value = Some("0")),
        sqlite_column!("online_events", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("daily_limit", &SqlType::Integer, non_null = true, default_value = Some("25")),
        sqlite_column!("enabled", &SqlType::Integer, non_null = true, default_value = Some("1")),
    ],
    primary_key: &[],
    indices: &[],
};

const USER_PROFILES_TABLE_V1: Table = Table {
    name: "user_profiles",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    primary_key: &[],
    indices: &[],
};

const FAVORITE_EVENTS_TABLE_V1: Table = Table {
    name: "favorite_events",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("date", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text, non_null = true),
        sqlite_column!("event_id", &SqlType::Text, non_null = true),
    ],
    primary_key: &["user_id", "date", "location", "event_id"],
    indices: &[("idx_favorite_events_user", "user_id, date")],
};

pub const EVENT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        EVENTS_TABLE_V1,
        CATEGORY_POPULARITY_TABLE_V1,
        LOCATIONS_TABLE_V1,
        USER_PROFILES_TABLE_V1,
        FAVORITE_EVENTS_TABLE_V1,
    ],
    migration: None,
}];
