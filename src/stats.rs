use crate::cohort::CohortConfig;
use crate::registry::StudentRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Records created at or after `now - days`. Timestamps that do not parse are
/// excluded rather than guessed at.
pub fn recent_within_days(
    records: &[StudentRecord],
    days: i64,
    now: DateTime<Utc>,
) -> Vec<StudentRecord> {
    let cutoff = now - Duration::days(days);
    records
        .iter()
        .filter(|r| r.created_at_utc().map(|t| t >= cutoff).unwrap_or(false))
        .cloned()
        .collect()
}

/// Counts per configured year, pre-seeded so empty cohorts show up as zero.
pub fn count_by_year(cohorts: &CohortConfig, records: &[StudentRecord]) -> BTreeMap<i64, usize> {
    let mut counts: BTreeMap<i64, usize> = cohorts.years().into_iter().map(|y| (y, 0)).collect();
    for record in records {
        if let Some(n) = counts.get_mut(&record.year) {
            *n += 1;
        }
    }
    counts
}

/// Counts per section, built incrementally; records without a section are
/// skipped.
pub fn count_by_section(records: &[StudentRecord]) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        if record.section.is_empty() {
            continue;
        }
        *counts.entry(record.section.clone()).or_insert(0) += 1;
    }
    counts
}
