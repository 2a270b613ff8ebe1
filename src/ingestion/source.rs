//! Bandsintown scrape client.
//!
//! Rate limited to stay well under the page endpoint's tolerance.

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const BANDSINTOWN_BASE: &str = "https://www.bandsintown.com";
const RATE_LIMIT_INTERVAL: Duration = Duration::from_millis(500);

lazy_static! {
    // Genre tags live in a single obfuscated-class element on the event
    // detail page. TODO check whether this class name is still current.
    static ref GENRE_ELEMENT_RE: Regex =
        Regex::new(r#"class="_1v6hYzlTV-hB2ZkAb6CiCv"[^>]*>([^<]+)<"#).unwrap();
    static ref GENRE_NOISE_RE: Regex = Regex::new(r"[/\.\[\]\*`]").unwrap();
}

/// One event as listed on an upcoming-events page, before any
/// identifier derivation or bucketing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub title: Option<String>,
    pub venue_name: Option<String>,
    pub artist_name: Option<String>,
    pub artist_image_src: Option<String>,
    pub event_url: Option<String>,
    pub artist_url: Option<String>,
    /// Despite the name, the source reports the UTC start time here.
    pub local_start_time: Option<String>,
}

/// Extra information scraped from an event's detail page.
#[derive(Debug, Clone, Default)]
pub struct EventDetail {
    pub genres: Vec<String>,
}

/// Where raw events come from. The pipeline only talks to this trait so
/// tests can feed it canned pages.
pub trait EventSource: Send + Sync {
    /// Fetch one page of upcoming events around a coordinate. An empty
    /// page means the result set is exhausted.
    fn fetch_page(&self, page: u32, latitude: f64, longitude: f64) -> Result<Vec<RawEvent>>;

    /// Best-effort fetch of an event's detail page. `Ok(None)` means the
    /// page had no usable enrichment.
    fn fetch_detail(&self, event_url: &str) -> Result<Option<EventDetail>>;
}

pub struct BandsintownClient {
    client: Client,
    last_request: Mutex<Instant>,
}

#[derive(Deserialize)]
struct UpcomingEventsResponse {
    events: Option<Vec<RawEvent>>,
}

impl BandsintownClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            last_request: Mutex::new(Instant::now() - RATE_LIMIT_INTERVAL),
        })
    }

    fn rate_limit(&self) {
        let mut last = self.last_request.lock().unwrap();
        let elapsed = last.elapsed();
        if elapsed < RATE_LIMIT_INTERVAL {
            std::thread::sleep(RATE_LIMIT_INTERVAL - elapsed);
        }
        *last = Instant::now();
    }
}

impl EventSource for BandsintownClient {
    fn fetch_page(&self, page: u32, latitude: f64, longitude: f64) -> Result<Vec<RawEvent>> {
        self.rate_limit();

        let url = format!(
            "{}/upcomingEvents?page={}&longitude={}&latitude={}",
            BANDSINTOWN_BASE, page, longitude, latitude
        );
        let response = self.client.get(&url).send()?;
        if !response.status().is_success() {
            anyhow::bail!("Upcoming events page {} failed with status {}", page, response.status());
        }

        let body: UpcomingEventsResponse = response.json()?;
        Ok(body.events.unwrap_or_default())
    }

    fn fetch_detail(&self, event_url: &str) -> Result<Option<EventDetail>> {
        self.rate_limit();

        let response = self.client.get(event_url).send()?;
        if !response.status().is_success() {
            anyhow::bail!("Event detail page failed with status {}", response.status());
        }

        let html = response.text()?;
        Ok(parse_event_detail(&html))
    }
}

/// Pull the genre list out of a detail page, if present.
pub fn parse_event_detail(html: &str) -> Option<EventDetail> {
    let captures = GENRE_ELEMENT_RE.captures(html)?;
    let genres: Vec<String> = captures[1]
        .split(',')
        .map(clean_genre)
        .filter(|genre| !genre.is_empty())
        .collect();
    if genres.is_empty() {
        None
    } else {
        Some(EventDetail { genres })
    }
}

fn clean_genre(raw: &str) -> String {
    GENRE_NOISE_RE.replace_all(raw, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_detail_extracts_genres() {
        let html = r#"<div><span class="_1v6hYzlTV-hB2ZkAb6CiCv" data-x="1">Rock, Indie.Pop, [Jazz]</span></div>"#;
        let detail = parse_event_detail(html).unwrap();
        assert_eq!(detail.genres, vec!["Rock", "Indie Pop", "Jazz"]);
    }

    #[test]
    fn test_parse_event_detail_no_genre_element() {
        assert!(parse_event_detail("<html><body>nothing</body></html>").is_none());
    }

    #[test]
    fn test_parse_event_detail_only_noise_is_none() {
        let html = r#"<span class="_1v6hYzlTV-hB2ZkAb6CiCv">., /</span>"#;
        assert!(parse_event_detail(html).is_none());
    }

    #[test]
    fn test_raw_event_deserializes_source_fields() {
        let json = r#"{
            "title": "Open Air",
            "venueName": "Olympiapark",
            "artistName": "Some Band",
            "eventUrl": "https://www.bandsintown.com/e/103579246-some-band",
            "artistUrl": "https://www.bandsintown.com/a/65212-some-band",
            "localStartTime": "2024-05-17T20:30:00",
            "fallbackImageUrl": "ignored"
        }"#;
        let raw: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(raw.venue_name.as_deref(), Some("Olympiapark"));
        assert_eq!(raw.local_start_time.as_deref(), Some("2024-05-17T20:30:00"));
        assert!(raw.artist_image_src.is_none());
    }
}
