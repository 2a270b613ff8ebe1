//! Shared constants for end-to-end tests
//!
//! All test data identifiers live here so a change to the fixture set
//! only touches this file.

/// Test user identifier
pub const TEST_USER: &str = "user-1";

/// Primary fixture location
pub const MUNICH: &str = "Munich";

/// Secondary fixture location (empty buckets trigger the fallback)
pub const BERLIN: &str = "Berlin";

/// The run date every fixture revolves around
pub const TODAY: &str = "2024-05-17";

/// The day after the run date
pub const TOMORROW: &str = "2024-05-18";
