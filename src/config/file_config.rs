use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,

    // Feature configs
    pub ingestion: Option<IngestionConfig>,
    pub jobs: Option<JobsConfig>,
    pub session: Option<SessionFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IngestionConfig {
    /// How many days past today an over-quota event may roll before it
    /// is dropped.
    pub future_days_max: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub ingest_interval_hours: Option<u64>,
    pub normalize_interval_hours: Option<u64>,
    pub decay_interval_hours: Option<u64>,
    pub decay_factor: Option<f64>,
    pub normalize_window_days: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SessionFileConfig {
    pub fallback_location: Option<String>,
    pub sticky_fallback: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
