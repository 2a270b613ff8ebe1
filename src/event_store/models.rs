use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Image used when the source returns no artist image for an event.
pub const FALLBACK_ARTIST_IMAGE: &str = "https://assets.bandsintown.com/images/fallbackImage.png";

/// A single event as stored in a date+location bucket.
///
/// Identity is the namespaced `event_id` (e.g. `bit_12345`); everything else
/// is mutable payload. `score` is session-local and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub title: String,
    pub venue_name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub artist_image_src: Option<String>,
    pub event_url: String,
    pub utc_date_time: DateTime<Utc>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub popularity: u64,
    #[serde(default)]
    pub popularity_normalized: f64,
    /// The bucket key this event was stored under, not necessarily the
    /// user's own location.
    pub location: String,
    /// The bucket date this event was stored under. Differs from
    /// [`Event::utc_date`] when the daily quota rolled the event forward.
    #[serde(default)]
    pub bucket_date: NaiveDate,
    #[serde(skip)]
    pub score: Option<f64>,
}

impl Event {
    /// The UTC calendar date of the event, used as the bucket date key.
    pub fn utc_date(&self) -> NaiveDate {
        self.utc_date_time.date_naive()
    }

    /// ISO `YYYY-MM-DD` form of [`Event::utc_date`].
    pub fn utc_date_iso(&self) -> String {
        self.utc_date().format("%Y-%m-%d").to_string()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id
    }
}

impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.event_id.hash(state);
    }
}

/// A category tag on an event: a name plus an unordered set of subcategory
/// names. Two categories are equal when their names match; the subcategory
/// lists are not compared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    /// Label for the subcategory group (e.g. "Genre").
    #[serde(default)]
    pub sub_group: Option<String>,
    #[serde(default)]
    pub sub_categories: Vec<String>,
}

impl Category {
    pub fn new(name: impl Into<String>, sub_categories: Vec<String>) -> Self {
        Self {
            name: name.into(),
            sub_group: None,
            sub_categories,
        }
    }
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Category {}

/// A city the ingestion pipeline scrapes for, read-only configuration from
/// the store's `locations` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Whether purely-online events ("Streaming LIVE" venue) are admitted.
    pub online_events: bool,
    /// Maximum number of events ingested per calendar day.
    pub daily_limit: u32,
    pub enabled: bool,
}

/// A collection of sibling popularity counters. Normalization is always
/// computed within exactly one of these, never across them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopularityCollection {
    /// Top-level events of one date+location bucket.
    EventBucket { date: NaiveDate, location: String },
    /// The global category namespace.
    Categories,
    /// Subcategories of one global category.
    SubCategories { category: String },
    /// One user's private category mirror.
    UserCategories { user_id: String },
    /// Subcategories of one category in a user's private mirror.
    UserSubCategories { user_id: String, category: String },
}

impl std::fmt::Display for PopularityCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PopularityCollection::EventBucket { date, location } => {
                write!(f, "events/{}/{}", date.format("%Y-%m-%d"), location)
            }
            PopularityCollection::Categories => write!(f, "categories"),
            PopularityCollection::SubCategories { category } => {
                write!(f, "categories/{}/subCategories", category)
            }
            PopularityCollection::UserCategories { user_id } => {
                write!(f, "users/{}/categories", user_id)
            }
            PopularityCollection::UserSubCategories { user_id, category } => {
                write!(f, "users/{}/categories/{}/subCategories", user_id, category)
            }
        }
    }
}

/// One popularity counter: a document id within a [`PopularityCollection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularityRef {
    pub collection: PopularityCollection,
    pub id: String,
}

impl PopularityRef {
    pub fn new(collection: PopularityCollection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for PopularityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}
