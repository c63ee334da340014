use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::entities::remote_entries::RemoteEntry;

/// Which listed backups to delete and which survive a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionDecision {
    /// Oldest first.
    pub victims: Vec<RemoteEntry>,
    pub survivors: Vec<RemoteEntry>,
}

/// Keeps the `max_backups` most recently modified entries and marks the rest for deletion.
///
/// Entries whose `lastModifiedDateTime` does not parse as RFC3339 are treated as the oldest
/// possible backups, so they are always deleted before any entry with a known age. The sort is
/// stable: equal timestamps keep their listing order.
pub fn select_for_deletion(entries: Vec<RemoteEntry>, max_backups: usize) -> RetentionDecision {
    let excess = entries.len().saturating_sub(max_backups);
    if excess == 0 {
        return RetentionDecision {
            victims: Vec::new(),
            survivors: entries,
        };
    }

    let mut dated: Vec<(DateTime<Utc>, RemoteEntry)> = entries
        .into_iter()
        .map(|entry| (parse_last_modified(&entry), entry))
        .collect();
    dated.sort_by_key(|(modified, _)| *modified);

    let mut ordered = dated.into_iter().map(|(_, entry)| entry);
    let victims = ordered.by_ref().take(excess).collect();
    let survivors = ordered.collect();

    RetentionDecision { victims, survivors }
}

fn parse_last_modified(entry: &RemoteEntry) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(&entry.last_modified) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(err) => {
            warn!(
                entry_id = %entry.id,
                name = %entry.name,
                last_modified = %entry.last_modified,
                error = %err,
                "retention: unparseable lastModifiedDateTime; treating as oldest"
            );
            DateTime::<Utc>::MIN_UTC
        }
    }
}
