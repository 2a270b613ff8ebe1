//! Specific background job implementations.
//!
//! This module contains implementations of the `BackgroundJob` trait
//! for the periodic maintenance work the server needs.

pub mod decay;
pub mod ingest;
pub mod normalize;

pub use decay::DecayPopularityJob;
pub use ingest::IngestEventsJob;
pub use normalize::NormalizePopularityJob;
