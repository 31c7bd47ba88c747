//! Expiry collection, kept free of I/O

use chrono::{DateTime, Utc};

use super::record::FileRecord;

/// Records split by expiry
#[derive(Debug, Default)]
pub struct GcOutcome {
    pub survivors: Vec<FileRecord>,
    pub expired: Vec<FileRecord>,
}

/// Partition `records` into those still live at `now` and those whose
/// expiry date is at or before `now`
pub fn collect_expired(now: DateTime<Utc>, records: Vec<FileRecord>) -> GcOutcome {
    let (expired, survivors) = records.into_iter().partition(|r| r.is_expired_at(now));
    GcOutcome { survivors, expired }
}
