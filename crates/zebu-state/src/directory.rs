//! Record directory - the single authority over which record is current
//!
//! Every record this replica holds or serves is one that passed verification
//! and beat the previously held sequence. All writes go through
//! [`RecordDirectory::try_merge`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use zebu_core::{ContentId, Identity, NameRecord, ZebuResult};
use zebu_crypto::verify_record;

use crate::RecordStorage;

/// Result of offering a candidate record to the directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Candidate is now the current record
    Accepted,
    /// A record with an equal or higher sequence is already held
    RejectedStale { current: u64 },
    /// Missing or bad signature, or an unsupported version
    RejectedInvalid,
}

impl MergeOutcome {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, MergeOutcome::Accepted)
    }
}

/// Counts for a batch of merges
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub accepted: u32,
    pub stale: u32,
    pub invalid: u32,
    pub failed: u32,
}

/// What `load` found in storage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: usize,
}

/// Lifetime merge counters
#[derive(Debug, Default)]
struct DirectoryStats {
    accepted: AtomicU64,
    stale: AtomicU64,
    invalid: AtomicU64,
}

/// Point-in-time copy of the merge counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MergeStats {
    pub accepted: u64,
    pub stale: u64,
    pub invalid: u64,
}

/// Map of identity to its newest verified record, backed by durable storage
pub struct RecordDirectory {
    records: RwLock<HashMap<Identity, NameRecord>>,
    storage: Arc<dyn RecordStorage>,
    stats: DirectoryStats,
}

impl RecordDirectory {
    /// Create an empty directory over `storage`. Call [`load`](Self::load)
    /// to pick up what is already stored.
    pub fn new(storage: Arc<dyn RecordStorage>) -> Self {
        RecordDirectory {
            records: RwLock::new(HashMap::new()),
            storage,
            stats: DirectoryStats::default(),
        }
    }

    /// Populate the directory from storage
    ///
    /// Fails only if storage itself cannot be listed. Entries that cannot be
    /// decoded, fail verification, or sit under another owner's name are
    /// skipped; among several entries for one owner the highest sequence wins.
    pub fn load(&self) -> ZebuResult<LoadSummary> {
        let entries = self.storage.load_all()?;
        let mut summary = LoadSummary::default();
        let mut records = self.records.write();

        for entry in entries {
            let record = match entry.record {
                Ok(record) => record,
                Err(error) => {
                    tracing::warn!(key = %entry.key, %error, "skipping unreadable stored record");
                    summary.skipped += 1;
                    continue;
                }
            };
            if !key_matches(&entry.key, &record.owner) {
                tracing::warn!(key = %entry.key, owner = %record.owner, "skipping stored record under a foreign name");
                summary.skipped += 1;
                continue;
            }
            if !verify_record(&record) {
                tracing::warn!(owner = %record.owner, sequence = record.sequence, "skipping stored record that fails verification");
                summary.skipped += 1;
                continue;
            }

            // `loaded` counts identities; every discarded duplicate is skipped
            match records.get(&record.owner) {
                Some(held) if held.sequence >= record.sequence => {
                    tracing::debug!(owner = %record.owner, sequence = record.sequence, current = held.sequence, "skipping older stored duplicate");
                    summary.skipped += 1;
                }
                Some(held) => {
                    tracing::debug!(owner = %record.owner, sequence = held.sequence, current = record.sequence, "skipping older stored duplicate");
                    summary.skipped += 1;
                    records.insert(record.owner, record);
                }
                None => {
                    records.insert(record.owner, record);
                    summary.loaded += 1;
                }
            }
        }

        tracing::info!(
            identities = records.len(),
            skipped = summary.skipped,
            "record directory loaded"
        );
        Ok(summary)
    }

    /// Current record for an identity; `None` when nothing is known
    pub fn lookup(&self, owner: &Identity) -> Option<NameRecord> {
        self.records.read().get(owner).cloned()
    }

    pub fn contains(&self, owner: &Identity) -> bool {
        self.records.read().contains_key(owner)
    }

    /// Offer a candidate record
    ///
    /// On acceptance the record is persisted before it becomes visible. A
    /// storage failure is returned as `Err` and leaves the held record as it was.
    ///
    /// The storage write runs under the directory write lock, so accepted
    /// writes are serialised per directory. With [`FileRecordStorage`] this
    /// includes an fsync, and concurrent `lookup` calls wait for it. Stale and
    /// invalid candidates never touch storage.
    ///
    /// [`FileRecordStorage`]: crate::FileRecordStorage
    pub fn try_merge(&self, candidate: NameRecord) -> ZebuResult<MergeOutcome> {
        // Signature recovery is the expensive part; keep it outside the lock.
        if !verify_record(&candidate) {
            self.stats.invalid.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                owner = %candidate.owner,
                sequence = candidate.sequence,
                "rejected record with invalid signature"
            );
            return Ok(MergeOutcome::RejectedInvalid);
        }

        let mut records = self.records.write();
        if let Some(held) = records.get(&candidate.owner) {
            if held.sequence >= candidate.sequence {
                self.stats.stale.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    owner = %candidate.owner,
                    sequence = candidate.sequence,
                    current = held.sequence,
                    "rejected stale record"
                );
                return Ok(MergeOutcome::RejectedStale {
                    current: held.sequence,
                });
            }
        }

        self.storage.put(&candidate)?;

        tracing::debug!(
            owner = %candidate.owner,
            sequence = candidate.sequence,
            cid = %candidate.content_id,
            "accepted record"
        );
        records.insert(candidate.owner, candidate);
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(MergeOutcome::Accepted)
    }

    /// Merge a batch, counting outcomes. Storage failures are logged and counted.
    pub fn merge_batch(&self, candidates: impl IntoIterator<Item = NameRecord>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for candidate in candidates {
            match self.try_merge(candidate) {
                Ok(MergeOutcome::Accepted) => summary.accepted += 1,
                Ok(MergeOutcome::RejectedStale { .. }) => summary.stale += 1,
                Ok(MergeOutcome::RejectedInvalid) => summary.invalid += 1,
                Err(error) => {
                    tracing::error!(%error, "failed to persist record");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Unsigned successor of the held record. Does not modify the directory.
    pub fn stage_next_sequence(&self, owner: &Identity, content_id: ContentId) -> NameRecord {
        let next = self
            .records
            .read()
            .get(owner)
            .map_or(1, |held| held.sequence.saturating_add(1));
        NameRecord::unsigned(*owner, content_id, next)
    }

    /// Up to `n` known identities, in no particular order
    pub fn snapshot(&self, n: usize) -> Vec<Identity> {
        self.records.read().keys().take(n).copied().collect()
    }

    /// Clone of every held record
    pub fn records(&self) -> Vec<NameRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn stats(&self) -> MergeStats {
        MergeStats {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            stale: self.stats.stale.load(Ordering::Relaxed),
            invalid: self.stats.invalid.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RecordDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordDirectory")
            .field("identities", &self.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn key_matches(key: &str, owner: &Identity) -> bool {
    Identity::parse(key).map_or(false, |k| k == *owner)
}
