//! System-wide default constants.
//!
//! Values that must not vary per deployment live here as plain constants;
//! everything operator-tunable has a matching field in [`super::ServiceConfig`].

// ============================================================================
// Stage cache
// ============================================================================

/// Minimum confidence for a cached stage output to be reused instead of
/// re-executing the stage. Fixed for every call and every pipeline.
pub const REUSE_THRESHOLD: f64 = 0.6;

// ============================================================================
// Status projection
// ============================================================================

/// Re-read interval for push subscriptions (milliseconds).
pub const STATUS_POLL_INTERVAL_MS: u64 = 2_000;

/// A running incident whose heartbeat is older than this is treated as
/// abandoned and may be restarted by a new submission (seconds).
pub const STALE_RUN_SECS: u64 = 600;

// ============================================================================
// Storage
// ============================================================================

/// Incident Records expire this many days after creation.
pub const RETENTION_DAYS: u32 = 365;

/// How often the retention sweeper runs (seconds). 3 600 = hourly.
pub const RETENTION_SWEEP_SECS: u64 = 3_600;

/// Default sled directory.
pub const DATA_DIR: &str = "./data/policity.db";

// ============================================================================
// HTTP
// ============================================================================

pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Largest accepted request body. Base64 images make submissions large.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

// ============================================================================
// Collaborators
// ============================================================================

pub const REASONING_MODEL: &str = "gemini-2.5-flash";
pub const REASONING_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const REASONING_TEMPERATURE: f32 = 0.2;

/// HTTP timeout for reasoning and geocoding requests (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

pub const GEOCODER_BASE_URL: &str = "https://nominatim.openstreetmap.org";
pub const GEOCODER_USER_AGENT: &str = "policity/0.1 (incident-reports)";

/// Base path that artifact links are built from.
pub const REPORT_URL_BASE: &str = "/api/v1/workflow/infrastructure-report/incident";
