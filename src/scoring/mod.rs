//! Weighted heuristic event scoring.
//!
//! A score is the sum of independent sub-scores, each in [0, 1]:
//! temporal proximity (0.25), the event's normalized popularity (0.2),
//! global category popularity (0.15) and, only for users with an existing
//! profile, the user's private category popularity (0.4).

use crate::event_store::{Event, EventStore, PopularityCollection, PopularityRef};
use crate::similarity::{score_from_unbounded_distance, DAY_IN_SECONDS};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const TEMPORAL_WEIGHT: f64 = 0.25;
pub const POPULARITY_WEIGHT: f64 = 0.2;
pub const GLOBAL_CATEGORY_WEIGHT: f64 = 0.15;
pub const USER_CATEGORY_WEIGHT: f64 = 0.4;

#[derive(Clone)]
pub struct EventScorer {
    store: Arc<dyn EventStore>,
}

impl EventScorer {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Score one event for an optional user at a given reference time.
    ///
    /// The user term is omitted entirely (weight and all) when the user
    /// has no profile document, so cold-start users lean on global
    /// popularity instead of an empty personal history.
    pub fn score(&self, event: &Event, user_id: Option<&str>, now: DateTime<Utc>) -> Result<f64> {
        let seconds_from_now = (event.utc_date_time - now).num_seconds() as f64;
        let temporal = score_from_unbounded_distance(seconds_from_now, DAY_IN_SECONDS, 1.0);

        let mut score = TEMPORAL_WEIGHT * temporal
            + POPULARITY_WEIGHT * event.popularity_normalized
            + GLOBAL_CATEGORY_WEIGHT * self.category_score(event, None)?;

        if let Some(user_id) = user_id {
            if self.store.user_profile_exists(user_id)? {
                score += USER_CATEGORY_WEIGHT * self.category_score(event, Some(user_id))?;
            }
        }
        Ok(score)
    }

    /// Mean over the event's categories that exist in the namespace, of
    /// category normalized popularity times the mean of its found
    /// subcategories' normalized popularity (multiplier 1 when the event
    /// lists none, 0 when it lists some but none are found).
    fn category_score(&self, event: &Event, user_id: Option<&str>) -> Result<f64> {
        let mut sum = 0.0;
        let mut found = 0usize;

        for category in &event.categories {
            let category_collection = match user_id {
                Some(user_id) => PopularityCollection::UserCategories {
                    user_id: user_id.to_string(),
                },
                None => PopularityCollection::Categories,
            };
            let category_norm = match self.store.read_normalized_popularity(&PopularityRef::new(
                category_collection,
                &category.name,
            ))? {
                Some(norm) => norm,
                None => continue,
            };

            let multiplier = if category.sub_categories.is_empty() {
                1.0
            } else {
                let sub_collection = match user_id {
                    Some(user_id) => PopularityCollection::UserSubCategories {
                        user_id: user_id.to_string(),
                        category: category.name.clone(),
                    },
                    None => PopularityCollection::SubCategories {
                        category: category.name.clone(),
                    },
                };
                let mut sub_sum = 0.0;
                let mut sub_found = 0usize;
                for sub_category in &category.sub_categories {
                    if let Some(sub_norm) = self.store.read_normalized_popularity(
                        &PopularityRef::new(sub_collection.clone(), sub_category),
                    )? {
                        sub_sum += sub_norm;
                        sub_found += 1;
                    }
                }
                if sub_found == 0 {
                    0.0
                } else {
                    sub_sum / sub_found as f64
                }
            };

            sum += category_norm * multiplier;
            found += 1;
        }

        if found == 0 {
            Ok(0.0)
        } else {
            Ok(sum / found as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{Category, SqliteEventStore};
    use chrono::{NaiveDate, TimeZone};
    use tempfile::TempDir;

    fn test_store() -> (Arc<SqliteEventStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteEventStore::new(temp_dir.path().join("events.db")).unwrap());
        (store, temp_dir)
    }

    fn music_event(popularity_normalized: f64, sub_categories: Vec<&str>) -> Event {
        Event {
            event_id: "bit_1".to_string(),
            title: "Concert".to_string(),
            venue_name: "Muffathalle".to_string(),
            artist_id: "bit_1".to_string(),
            artist_name: "Band".to_string(),
            artist_image_src: None,
            event_url: String::new(),
            utc_date_time: Utc.with_ymd_and_hms(2024, 5, 17, 20, 0, 0).unwrap(),
            categories: vec![Category::new(
                "Music",
                sub_categories.into_iter().map(String::from).collect(),
            )],
            popularity: 0,
            popularity_normalized,
            location: "Munich".to_string(),
            bucket_date: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            score: None,
        }
    }

    fn write_global_norm(store: &SqliteEventStore, category: &str, value: f64) {
        store
            .write_normalized_popularity(
                &PopularityRef::new(PopularityCollection::Categories, category),
                value,
            )
            .unwrap();
    }

    fn write_global_sub_norm(store: &SqliteEventStore, category: &str, sub: &str, value: f64) {
        store
            .write_normalized_popularity(
                &PopularityRef::new(
                    PopularityCollection::SubCategories {
                        category: category.to_string(),
                    },
                    sub,
                ),
                value,
            )
            .unwrap();
    }

    #[test]
    fn test_category_score_times_subcategory_mean() {
        // Music normalized 0.8, Rock 0.6, Jazz 0.4:
        // category score = 0.8 * mean(0.6, 0.4) = 0.4
        let (store, _dir) = test_store();
        write_global_norm(&store, "Music", 0.8);
        write_global_sub_norm(&store, "Music", "Rock", 0.6);
        write_global_sub_norm(&store, "Music", "Jazz", 0.4);

        let scorer = EventScorer::new(store);
        let event = music_event(0.0, vec!["Rock", "Jazz"]);
        let category_score = scorer.category_score(&event, None).unwrap();
        assert!((category_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_category_without_subcategories_uses_multiplier_one() {
        let (store, _dir) = test_store();
        write_global_norm(&store, "Music", 0.8);

        let scorer = EventScorer::new(store);
        let event = music_event(0.0, vec![]);
        let category_score = scorer.category_score(&event, None).unwrap();
        assert!((category_score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_category_contributes_nothing() {
        let (store, _dir) = test_store();
        let scorer = EventScorer::new(store);
        let event = music_event(0.5, vec!["Rock"]);
        assert_eq!(scorer.category_score(&event, None).unwrap(), 0.0);
    }

    #[test]
    fn test_no_profile_omits_user_term() {
        let (store, _dir) = test_store();
        // Rich data in the user's private mirror, but no profile document.
        store
            .increment_popularity(&PopularityRef::new(
                PopularityCollection::UserCategories {
                    user_id: "ghost".to_string(),
                },
                "Music",
            ))
            .unwrap();

        let scorer = EventScorer::new(store);
        let event = music_event(0.5, vec![]);
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 20, 0, 0).unwrap();

        let without_user = scorer.score(&event, None, now).unwrap();
        let with_ghost_user = scorer.score(&event, Some("ghost"), now).unwrap();
        assert_eq!(without_user, with_ghost_user);
    }

    #[test]
    fn test_profile_adds_user_term() {
        let (store, _dir) = test_store();
        store.create_user_profile("u1").unwrap();
        store
            .write_normalized_popularity(
                &PopularityRef::new(
                    PopularityCollection::UserCategories {
                        user_id: "u1".to_string(),
                    },
                    "Music",
                ),
                1.0,
            )
            .unwrap();

        let scorer = EventScorer::new(store);
        let event = music_event(0.0, vec![]);
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 20, 0, 0).unwrap();

        let anonymous = scorer.score(&event, None, now).unwrap();
        let personalized = scorer.score(&event, Some("u1"), now).unwrap();
        assert!((personalized - anonymous - USER_CATEGORY_WEIGHT).abs() < 1e-9);
    }

    #[test]
    fn test_temporal_term_favors_nearer_events() {
        let (store, _dir) = test_store();
        let scorer = EventScorer::new(store);
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap();

        let mut near = music_event(0.0, vec![]);
        near.utc_date_time = Utc.with_ymd_and_hms(2024, 5, 17, 20, 0, 0).unwrap();
        let mut far = music_event(0.0, vec![]);
        far.utc_date_time = Utc.with_ymd_and_hms(2024, 5, 27, 20, 0, 0).unwrap();

        let near_score = scorer.score(&near, None, now).unwrap();
        let far_score = scorer.score(&far, None, now).unwrap();
        assert!(near_score > far_score);
    }

    #[test]
    fn test_event_at_now_scores_full_temporal_weight() {
        let (store, _dir) = test_store();
        let scorer = EventScorer::new(store);
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 20, 0, 0).unwrap();
        let event = music_event(0.0, vec![]);

        let score = scorer.score(&event, None, now).unwrap();
        assert!((score - TEMPORAL_WEIGHT).abs() < 1e-9);
    }
}
