//! Common test infrastructure
//!
//! This module provides the stores and the canned event source the
//! end-to-end tests run against. Tests should only import from this
//! module, not from internal submodules.

mod constants;
mod fixtures;

// Public API - this is what tests import
pub use constants::*;
pub use fixtures::{event_url, raw_event, FakeSource, TestEnv};
