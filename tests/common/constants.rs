//! Shared constants for end-to-end tests
//!
//! When the seeded media or timing knobs change, update only this file.

#![allow(dead_code)]

// ============================================================================
// Seeded Media
// ============================================================================

/// Media file present in every test server's media directory
pub const MEDIA_1_ID: &str = "interview-01";

/// Second media file, for tests that switch between resources
pub const MEDIA_2_ID: &str = "lecture-02";

/// Resource id that passes validation but has no media file
pub const MISSING_MEDIA_ID: &str = "not-on-disk";

/// Resource id rejected by validation; `~` survives URL normalization
pub const INVALID_RESOURCE_ID: &str = "bad~id";

/// Segments produced by the fake engine on success
pub const FAKE_SEGMENT_COUNT: u32 = 4;

// ============================================================================
// Timeouts
// ============================================================================

/// Per-request timeout for the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long to wait for the server to accept requests
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Poll interval while waiting for the server
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// How long to wait for a job to reach a terminal status
pub const JOB_SETTLE_TIMEOUT_MS: u64 = 10_000;

/// Poll interval while waiting for a job
pub const JOB_POLL_INTERVAL_MS: u64 = 25;

/// Sampling interval of the test runner
pub const SAMPLE_INTERVAL_MS: u64 = 10;
