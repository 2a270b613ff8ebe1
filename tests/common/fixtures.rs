//! Test fixture creation for the event pipeline
//!
//! Provides a temp-dir backed pair of stores plus a canned `EventSource`
//! the ingestion pipeline can page through without any network access.

use anyhow::Result;
use eventhou_server::event_store::{EventStore, Location, SqliteEventStore};
use eventhou_server::ingestion::{EventDetail, EventSource, RawEvent};
use eventhou_server::server_store::SqliteServerStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Canned event source: a fixed list of pages and an optional genre
/// detail per event URL.
pub struct FakeSource {
    pages: Mutex<Vec<Vec<RawEvent>>>,
    details: HashMap<String, EventDetail>,
}

impl FakeSource {
    pub fn new(pages: Vec<Vec<RawEvent>>) -> Self {
        Self {
            pages: Mutex::new(pages),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, url: &str, genres: Vec<&str>) -> Self {
        self.details.insert(
            url.to_string(),
            EventDetail {
                genres: genres.into_iter().map(String::from).collect(),
            },
        );
        self
    }
}

impl EventSource for FakeSource {
    fn fetch_page(&self, page: u32, _latitude: f64, _longitude: f64) -> Result<Vec<RawEvent>> {
        let pages = self.pages.lock().unwrap();
        Ok(pages.get((page - 1) as usize).cloned().unwrap_or_default())
    }

    fn fetch_detail(&self, event_url: &str) -> Result<Option<EventDetail>> {
        Ok(self.details.get(event_url).cloned())
    }
}

/// A raw source event whose URL carries `id` as its digit run, so the
/// derived identifier is `bit_<id>`.
pub fn raw_event(id: u32, start: &str) -> RawEvent {
    RawEvent {
        title: Some(format!("Event {id}")),
        venue_name: Some("Muffathalle".to_string()),
        artist_name: Some("Band".to_string()),
        artist_image_src: None,
        event_url: Some(event_url(id)),
        artist_url: Some(format!("https://www.bandsintown.com/a/{id}")),
        local_start_time: Some(start.to_string()),
    }
}

pub fn event_url(id: u32) -> String {
    format!("https://www.bandsintown.com/e/{id}-band")
}

/// Isolated stores for one test. The temp dir must outlive the stores.
pub struct TestEnv {
    _temp_dir: TempDir,
    pub event_store: Arc<SqliteEventStore>,
    pub server_store: Arc<SqliteServerStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let event_store =
            Arc::new(SqliteEventStore::new(temp_dir.path().join("events.db")).unwrap());
        let server_store =
            Arc::new(SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap());
        Self {
            _temp_dir: temp_dir,
            event_store,
            server_store,
        }
    }

    pub fn seed_location(&self, id: &str, daily_limit: u32) {
        self.event_store
            .put_location(&Location {
                id: id.to_string(),
                name: id.to_string(),
                latitude: 48.15,
                longitude: 11.5833333,
                online_events: false,
                daily_limit,
                enabled: true,
            })
            .unwrap();
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
