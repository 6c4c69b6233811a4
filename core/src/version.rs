use crate::crypto::sha256_hex;
use crate::snapshot::Snapshot;
use crate::{
    DetailedComparison, Error, FileDiff, Result, TotalChanges, VersionComparison, VersionInfo,
    VersionMetadata,
};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Buckets `|t2 - t1|` (milliseconds) into the largest whole unit.
///
/// ```
/// use pinsnap_core::version::format_time_difference;
///
/// assert_eq!(format_time_difference(0, 90_000), "1 minutes");
/// assert_eq!(format_time_difference(0, 30_000), "less than a minute");
/// ```
pub fn format_time_difference(t1: i64, t2: i64) -> String {
    let diff = t1.abs_diff(t2);
    if diff >= DAY_MS {
        format!("{} days", diff / DAY_MS)
    } else if diff >= HOUR_MS {
        format!("{} hours", diff / HOUR_MS)
    } else if diff >= MINUTE_MS {
        format!("{} minutes", diff / MINUTE_MS)
    } else {
        "less than a minute".to_string()
    }
}

/// Computes version identities and compares snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionManager;

impl VersionManager {
    pub fn new() -> Self {
        Self
    }

    /// Version of an in-memory buffer. Both timestamps are "now" since there is
    /// no backing file to stat.
    pub fn create_version_info(&self, buffer: &[u8]) -> VersionInfo {
        let now = Utc::now();
        Self::version_with_times(buffer, now, now, now)
    }

    /// Version of a file's bytes, carrying the file's birth and modification
    /// times when the platform reports them.
    pub async fn create_version_info_for_path<P: AsRef<Path>>(&self, path: P) -> Result<VersionInfo> {
        let path = path.as_ref();
        let buffer = fs::read(path).await.map_err(Error::file("read", path))?;
        let metadata = fs::metadata(path).await.map_err(Error::file("stat", path))?;

        let now = Utc::now();
        let created_at = metadata.created().map(DateTime::<Utc>::from).unwrap_or(now);
        let modified_at = metadata.modified().map(DateTime::<Utc>::from).unwrap_or(now);
        Ok(Self::version_with_times(&buffer, now, created_at, modified_at))
    }

    fn version_with_times(
        buffer: &[u8],
        now: DateTime<Utc>,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    ) -> VersionInfo {
        let checksum = sha256_hex(buffer);
        VersionInfo {
            hash: checksum.clone(),
            timestamp: now.timestamp_millis(),
            size: buffer.len() as u64,
            metadata: VersionMetadata {
                created_at,
                modified_at,
                checksum,
            },
        }
    }

    /// Cheap whole-artifact comparison by checksum.
    pub fn compare_versions(&self, local: &[u8], remote: &VersionInfo) -> VersionComparison {
        let local_version = self.create_version_info(local);
        VersionComparison {
            is_equal: local_version.metadata.checksum == remote.metadata.checksum,
            is_newer: local_version.timestamp > remote.timestamp,
            time_diff: local_version.timestamp.abs_diff(remote.timestamp),
            formatted_diff: format_time_difference(local_version.timestamp, remote.timestamp),
            local_version,
            remote_version: remote.clone(),
        }
    }

    /// Per-entry comparison of two serialized snapshots.
    ///
    /// `local` must parse as a snapshot. A `remote` buffer that does not is
    /// compared as an empty snapshot, so every local entry shows up as added;
    /// this case is logged and flagged through `remote_unreadable`.
    pub fn compare_detailed_versions(&self, local: &[u8], remote: &[u8]) -> Result<DetailedComparison> {
        let remote_version = self.create_version_info(remote);
        self.compare_detailed_with_version(local, remote, remote_version)
    }

    /// Like [`compare_detailed_versions`](Self::compare_detailed_versions) but
    /// with a remote version already known, typically the one stored with a backup.
    pub fn compare_detailed_with_version(
        &self,
        local: &[u8],
        remote: &[u8],
        remote_version: VersionInfo,
    ) -> Result<DetailedComparison> {
        let local_snapshot = Snapshot::from_slice(local)?;
        let (remote_snapshot, remote_unreadable) = match Snapshot::from_slice(remote) {
            Ok(snapshot) => (snapshot, false),
            Err(e) => {
                warn!(
                    error = %e,
                    size = remote.len(),
                    "Remote snapshot unreadable, comparing against an empty snapshot"
                );
                (Snapshot::new(), true)
            }
        };

        let differences = diff_snapshots(&local_snapshot, &remote_snapshot)?;
        let total_changes = TotalChanges::tally(&differences);
        let local_version = self.create_version_info(local);
        debug!(
            added = total_changes.added,
            modified = total_changes.modified,
            deleted = total_changes.deleted,
            "Detailed comparison finished"
        );

        Ok(DetailedComparison {
            is_equal: differences.is_empty(),
            is_newer: local_version.timestamp > remote_version.timestamp,
            time_diff: local_version.timestamp.abs_diff(remote_version.timestamp),
            formatted_diff: format_time_difference(
                local_version.timestamp,
                remote_version.timestamp,
            ),
            local_version,
            remote_version,
            differences,
            total_changes,
            remote_unreadable,
        })
    }
}

/// Entries added or changed locally come first in path order, then deletions.
pub fn diff_snapshots(local: &Snapshot, remote: &Snapshot) -> Result<Vec<FileDiff>> {
    let local_digests = local.entry_digests()?;
    let remote_digests = remote.entry_digests()?;
    let mut differences = Vec::new();

    for (path, digest) in &local_digests {
        match remote_digests.get(path) {
            None => differences.push(FileDiff::added(*path, digest.checksum.clone(), digest.size)),
            Some(old) if old.checksum != digest.checksum => differences.push(FileDiff::modified(
                *path,
                (old.checksum.clone(), old.size),
                (digest.checksum.clone(), digest.size),
            )),
            Some(_) => {}
        }
    }

    for (path, digest) in &remote_digests {
        if !local_digests.contains_key(path) {
            differences.push(FileDiff::deleted(*path, digest.checksum.clone(), digest.size));
        }
    }

    Ok(differences)
}
