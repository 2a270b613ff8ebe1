//! Interactive recommendation session.
//!
//! A session owns a date range, a location pointer and a set of category
//! filters, and turns store buckets into a scored, filtered event list.
//! Results only reach the consumer through the subscription channel; a
//! refresh supersedes any in-flight one, and a superseded refresh never
//! delivers.

mod history;

pub use history::EventHistory;

use crate::event_store::{Event, EventStore, PopularityCollection, PopularityRef};
use crate::popularity::normalize_user_categories;
use crate::scoring::EventScorer;
use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle notifications delivered to subscribers. Cancelled work emits
/// nothing.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A refresh started.
    Loading,
    /// A refresh finished; the full filtered, scored, sorted list.
    Loaded(Vec<Event>),
    /// The list changed without a refetch (filter change, accept/reject).
    Updated(Vec<Event>),
    /// A refresh failed. No partial results follow.
    LoadingFailed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Location queried when a date bucket is empty for the session's own
    /// location.
    pub fallback_location: String,
    /// Whether falling back permanently switches the session's location
    /// pointer for subsequent dates.
    pub sticky_fallback: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fallback_location: "Munich".to_string(),
            sticky_fallback: true,
        }
    }
}

struct SessionState {
    start_date: NaiveDate,
    end_date: NaiveDate,
    location: Option<String>,
    locations_cached: bool,
    category_filters: Vec<String>,
    known_events: HashMap<String, Event>,
    history: EventHistory,
    accepted_since_teardown: bool,
}

pub struct RecommendationSession {
    store: Arc<dyn EventStore>,
    scorer: EventScorer,
    user_id: String,
    config: SessionConfig,
    state: Mutex<SessionState>,
    events_tx: broadcast::Sender<SessionEvent>,
    refresh_generation: AtomicU64,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl RecommendationSession {
    pub fn new(store: Arc<dyn EventStore>, user_id: &str, config: SessionConfig) -> Self {
        let (events_tx, _) = broadcast::channel(32);
        let today = Utc::now().date_naive();
        Self {
            scorer: EventScorer::new(store.clone()),
            store,
            user_id: user_id.to_string(),
            config,
            state: Mutex::new(SessionState {
                start_date: today,
                end_date: today,
                location: None,
                locations_cached: false,
                category_filters: Vec::new(),
                known_events: HashMap::new(),
                history: EventHistory::new(),
                accepted_since_teardown: false,
            }),
            events_tx,
            refresh_generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub async fn set_date_range(&self, start_date: NaiveDate, end_date: NaiveDate) {
        {
            let mut state = self.state.lock().unwrap();
            state.start_date = start_date;
            state.end_date = end_date;
        }
        self.publish_update().await;
    }

    /// Point the session at another location. Known events belong to the
    /// old location, so they are dropped; a refresh repopulates them.
    pub async fn set_location(&self, location: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.location = Some(location.to_string());
            state.known_events.clear();
        }
        self.publish_update().await;
    }

    pub async fn set_category_filters(&self, filters: Vec<String>) {
        {
            let mut state = self.state.lock().unwrap();
            state.category_filters = filters;
        }
        self.publish_update().await;
    }

    /// Start a refresh, superseding any in-flight one. Results arrive via
    /// the subscription channel; a superseded refresh delivers nothing.
    pub fn refresh(self: &Arc<Self>, reason: &str) {
        let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        if let Some(previous) = self.in_flight.lock().unwrap().replace(token.clone()) {
            previous.cancel();
        }

        info!("Refreshing recommendations ({reason})");
        let _ = self.events_tx.send(SessionEvent::Loading);

        let session = self.clone();
        tokio::spawn(async move {
            let result = session.run_refresh(&token).await;
            if token.is_cancelled()
                || session.refresh_generation.load(Ordering::SeqCst) != generation
            {
                return;
            }
            match result {
                Ok(Some(events)) => {
                    let _ = session.events_tx.send(SessionEvent::Loaded(events));
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("Refresh failed: {err:#}");
                    let _ = session.events_tx.send(SessionEvent::LoadingFailed);
                }
            }
        });
    }

    /// Record the event in the exclusion history, persist it as a
    /// favorite and feed every popularity counter it touches. The
    /// per-user normalization pass is deferred to teardown.
    pub async fn accept_event(&self, event: &Event) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.history.record(event.utc_date(), &event.event_id);
            state.accepted_since_teardown = true;
        }

        let store = self.store.clone();
        let user_id = self.user_id.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            store.create_user_profile(&user_id)?;
            store.add_favorite_event(&user_id, &event)?;

            let increment = |popularity_ref: &PopularityRef| {
                if let Err(err) = store.increment_popularity(popularity_ref) {
                    warn!("Failed to increment {popularity_ref}: {err:#}");
                }
            };
            // Keyed by the bucket the event was stored under, which for a
            // quota-rolled event is not its own calendar date.
            increment(&PopularityRef::new(
                PopularityCollection::EventBucket {
                    date: event.bucket_date,
                    location: event.location.clone(),
                },
                &event.event_id,
            ));
            for category in &event.categories {
                increment(&PopularityRef::new(
                    PopularityCollection::Categories,
                    &category.name,
                ));
                increment(&PopularityRef::new(
                    PopularityCollection::UserCategories {
                        user_id: user_id.clone(),
                    },
                    &category.name,
                ));
                for sub_category in &category.sub_categories {
                    increment(&PopularityRef::new(
                        PopularityCollection::SubCategories {
                            category: category.name.clone(),
                        },
                        sub_category,
                    ));
                    increment(&PopularityRef::new(
                        PopularityCollection::UserSubCategories {
                            user_id: user_id.clone(),
                            category: category.name.clone(),
                        },
                        sub_category,
                    ));
                }
            }
            Ok(())
        })
        .await??;

        self.publish_update().await;
        Ok(())
    }

    /// Record the event in the exclusion history without any popularity
    /// side effects.
    pub async fn reject_event(&self, event: &Event) {
        {
            let mut state = self.state.lock().unwrap();
            state.history.record(event.utc_date(), &event.event_id);
        }
        self.publish_update().await;
    }

    /// Cancel in-flight work and, if any accept happened since the last
    /// teardown, run one per-user normalization pass.
    pub async fn teardown(&self) {
        if let Some(token) = self.in_flight.lock().unwrap().take() {
            token.cancel();
        }
        let should_normalize = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.accepted_since_teardown)
        };
        if should_normalize {
            let store = self.store.clone();
            let user_id = self.user_id.clone();
            let outcome =
                tokio::task::spawn_blocking(move || normalize_user_categories(store.as_ref(), &user_id))
                    .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Per-user normalization failed: {err:#}"),
                Err(err) => warn!("Per-user normalization panicked: {err}"),
            }
        }
    }

    async fn run_refresh(&self, token: &CancellationToken) -> Result<Option<Vec<Event>>> {
        // Lazy location list fetch, only once per session.
        let needs_locations = !self.state.lock().unwrap().locations_cached;
        if needs_locations {
            let store = self.store.clone();
            let locations = tokio::task::spawn_blocking(move || store.list_locations()).await??;
            let mut state = self.state.lock().unwrap();
            state.locations_cached = true;
            if state.location.is_none() {
                state.location = locations
                    .iter()
                    .find(|location| location.enabled)
                    .map(|location| location.id.clone());
            }
        }

        let (start_date, end_date, location) = {
            let state = self.state.lock().unwrap();
            (state.start_date, state.end_date, state.location.clone())
        };
        let mut location = location.unwrap_or_else(|| self.config.fallback_location.clone());

        let mut date = start_date;
        while date <= end_date {
            if token.is_cancelled() {
                return Ok(None);
            }

            let store = self.store.clone();
            let bucket_location = location.clone();
            let mut events =
                tokio::task::spawn_blocking(move || store.events_in_bucket(date, &bucket_location))
                    .await??;

            if events.is_empty() && location != self.config.fallback_location {
                let store = self.store.clone();
                let fallback = self.config.fallback_location.clone();
                events =
                    tokio::task::spawn_blocking(move || store.events_in_bucket(date, &fallback))
                        .await??;
                if self.config.sticky_fallback {
                    location = self.config.fallback_location.clone();
                    self.state.lock().unwrap().location = Some(location.clone());
                }
            }

            {
                // Dedupe by identifier against already-known events.
                let mut state = self.state.lock().unwrap();
                for event in events {
                    state
                        .known_events
                        .entry(event.event_id.clone())
                        .or_insert(event);
                }
            }
            date += Duration::days(1);
        }

        if token.is_cancelled() {
            return Ok(None);
        }
        let events = self.filter_and_score().await?;
        Ok(Some(events))
    }

    /// Run the filter pipeline over the known events and score the
    /// survivors in parallel.
    async fn filter_and_score(&self) -> Result<Vec<Event>> {
        let candidates = {
            let state = self.state.lock().unwrap();
            state
                .known_events
                .values()
                .filter(|event| {
                    let date = event.utc_date();
                    date >= state.start_date && date <= state.end_date
                })
                .filter(|event| !state.history.contains(event.utc_date(), &event.event_id))
                .filter(|event| {
                    state.category_filters.is_empty()
                        || event
                            .categories
                            .iter()
                            .any(|category| state.category_filters.contains(&category.name))
                })
                .cloned()
                .collect::<Vec<_>>()
        };

        let now = Utc::now();
        let mut handles = Vec::with_capacity(candidates.len());
        for mut event in candidates {
            let scorer = self.scorer.clone();
            let user_id = self.user_id.clone();
            handles.push(tokio::task::spawn_blocking(move || -> Result<Event> {
                event.score = Some(scorer.score(&event, Some(&user_id), now)?);
                Ok(event)
            }));
        }

        let mut scored = futures::future::try_join_all(handles)
            .await?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        // Score descending, identifier ascending for deterministic ties.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        Ok(scored)
    }

    async fn publish_update(&self) {
        match self.filter_and_score().await {
            Ok(events) => {
                let _ = self.events_tx.send(SessionEvent::Updated(events));
            }
            Err(err) => warn!("Failed to update session results: {err:#}"),
        }
    }
}
