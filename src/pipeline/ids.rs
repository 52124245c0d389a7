//! Incident identifiers
//!
//! Generated ids look like `INC-20250314-0004F2A`: prefix, UTC date, then
//! `000` and four random uppercase hex digits. Uniqueness is probabilistic.

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

use crate::types::PipelineVariant;

pub const SINGLE_PREFIX: &str = "INC";
pub const MULTI_PREFIX: &str = "MULTI-INC";

pub fn generate(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen();
    format!("{prefix}-{}-000{suffix:04X}", now.format("%Y%m%d"))
}

/// Batch ids are recognised by their prefix; everything else, including
/// caller-chosen ids, is single-incident.
pub fn variant_of(incident_id: &str) -> PipelineVariant {
    if incident_id.starts_with("MULTI-INC-") {
        PipelineVariant::MultiIncident
    } else {
        PipelineVariant::SingleIncident
    }
}

fn generated_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"^(MULTI-)?INC-\d{8}-000[0-9A-F]{4}$").expect("static id pattern")
    })
}

/// Whether `incident_id` has the generated format.
pub fn is_generated(incident_id: &str) -> bool {
    generated_pattern().is_match(incident_id)
}
