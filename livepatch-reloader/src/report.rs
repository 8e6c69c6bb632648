use chrono::{DateTime, Utc};
use serde::Serialize;

use livepatch_core::PatchNumber;

/// Summary of one completed reload cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub patch: PatchNumber,
    pub remappings_written: usize,
    pub applied: usize,
    pub skipped: usize,
    pub build_ms: u64,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl CycleReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
