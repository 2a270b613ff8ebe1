mod file_config;

pub use file_config::{FileConfig, IngestionConfig, JobsConfig, SessionFileConfig};

use crate::background_jobs::JobSettings;
use crate::ingestion::DEFAULT_FUTURE_DAYS_MAX;
use crate::popularity::{DEFAULT_DECAY_FACTOR, DEFAULT_NORMALIZE_WINDOW_DAYS};
use crate::session::SessionConfig;
use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub ingestion: IngestionSettings,
    pub jobs: JobsSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub future_days_max: i64,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub ingest_interval_hours: u64,
    pub normalize_interval_hours: u64,
    pub decay_interval_hours: u64,
    pub decay_factor: f64,
    pub normalize_window_days: i64,
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            ingest_interval_hours: 24,
            normalize_interval_hours: 12,
            decay_interval_hours: 24,
            decay_factor: DEFAULT_DECAY_FACTOR,
            normalize_window_days: DEFAULT_NORMALIZE_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub fallback_location: String,
    pub sticky_fallback: bool,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let ingestion_file = file.ingestion.unwrap_or_default();
        let ingestion = IngestionSettings {
            future_days_max: ingestion_file
                .future_days_max
                .unwrap_or(DEFAULT_FUTURE_DAYS_MAX),
        };

        let jobs_file = file.jobs.unwrap_or_default();
        let jobs_defaults = JobsSettings::default();
        let jobs = JobsSettings {
            ingest_interval_hours: jobs_file
                .ingest_interval_hours
                .unwrap_or(jobs_defaults.ingest_interval_hours),
            normalize_interval_hours: jobs_file
                .normalize_interval_hours
                .unwrap_or(jobs_defaults.normalize_interval_hours),
            decay_interval_hours: jobs_file
                .decay_interval_hours
                .unwrap_or(jobs_defaults.decay_interval_hours),
            decay_factor: jobs_file.decay_factor.unwrap_or(jobs_defaults.decay_factor),
            normalize_window_days: jobs_file
                .normalize_window_days
                .unwrap_or(jobs_defaults.normalize_window_days),
        };

        let session_defaults = SessionConfig::default();
        let session_file = file.session.unwrap_or_default();
        let session = SessionSettings {
            fallback_location: session_file
                .fallback_location
                .unwrap_or(session_defaults.fallback_location),
            sticky_fallback: session_file
                .sticky_fallback
                .unwrap_or(session_defaults.sticky_fallback),
        };

        Ok(Self {
            db_dir,
            ingestion,
            jobs,
            session,
        })
    }

    pub fn events_db_path(&self) -> PathBuf {
        self.db_dir.join("events.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            future_days_max: self.ingestion.future_days_max,
            decay_factor: self.jobs.decay_factor,
            normalize_window_days: self.jobs.normalize_window_days,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            fallback_location: self.session.fallback_location.clone(),
            sticky_fallback: self.session.sticky_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_db_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_resolve_cli_only_uses_defaults() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.ingestion.future_days_max, DEFAULT_FUTURE_DAYS_MAX);
        assert_eq!(config.jobs.ingest_interval_hours, 24);
        assert_eq!(config.jobs.normalize_interval_hours, 12);
        assert_eq!(config.jobs.decay_factor, DEFAULT_DECAY_FACTOR);
        assert_eq!(config.session.fallback_location, "Munich");
        assert!(config.session.sticky_fallback);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
        };

        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            ingestion: Some(IngestionConfig {
                future_days_max: Some(7),
            }),
            jobs: Some(JobsConfig {
                decay_factor: Some(0.5),
                normalize_window_days: Some(5),
                ..Default::default()
            }),
            session: Some(SessionFileConfig {
                fallback_location: Some("Berlin".to_string()),
                sticky_fallback: Some(false),
            }),
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.ingestion.future_days_max, 7);
        assert_eq!(config.jobs.decay_factor, 0.5);
        assert_eq!(config.jobs.normalize_window_days, 5);
        // TOML did not set these, so defaults apply
        assert_eq!(config.jobs.ingest_interval_hours, 24);
        assert_eq!(config.session.fallback_location, "Berlin");
        assert!(!config.session.sticky_fallback);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let cli = CliConfig::default();
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.events_db_path(), temp_dir.path().join("events.db"));
        assert_eq!(config.server_db_path(), temp_dir.path().join("server.db"));
    }

    #[test]
    fn test_job_settings_carry_configured_values() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
        };
        let file_config = FileConfig {
            ingestion: Some(IngestionConfig {
                future_days_max: Some(21),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();
        let settings = config.job_settings();
        assert_eq!(settings.future_days_max, 21);
        assert_eq!(settings.decay_factor, DEFAULT_DECAY_FACTOR);
    }
}
