use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

/// Per-date record of event ids the user has already dealt with
/// (accepted or rejected), kept for the lifetime of the session.
#[derive(Debug, Default, Clone)]
pub struct EventHistory {
    entries: HashMap<NaiveDate, HashSet<String>>,
}

impl EventHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, date: NaiveDate, event_id: &str) {
        self.entries
            .entry(date)
            .or_default()
            .insert(event_id.to_string());
    }

    pub fn contains(&self, date: NaiveDate, event_id: &str) -> bool {
        self.entries
            .get(&date)
            .map(|ids| ids.contains(event_id))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|ids| ids.is_empty())
    }
}
