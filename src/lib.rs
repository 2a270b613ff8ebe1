//! Eventhou Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod background_jobs;
pub mod config;
pub mod event_store;
pub mod ingestion;
pub mod popularity;
pub mod scoring;
pub mod server_store;
pub mod session;
pub mod similarity;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use event_store::{Event, EventStore, Location, SqliteEventStore};
pub use scoring::EventScorer;
pub use server_store::{ServerStore, SqliteServerStore};
pub use session::{RecommendationSession, SessionConfig, SessionEvent};
