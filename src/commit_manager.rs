//! Commit manager contract
//!
//! The commit manager is the central authority for transaction versions. It
//! issues snapshot descriptors that define the version set visible to a
//! transaction and is told when a snapshot completes, on commit and on
//! rollback alike.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::Result;

/// Transaction mode requested from the commit manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    ReadOnly,
    ReadWrite,
}

// ============================================================================
// Snapshot Descriptor
// ============================================================================

/// Version set visible to one transaction
///
/// Owned by exactly one transaction for its lifetime. A version is in the
/// snapshot when it committed before this transaction started and was not
/// still in flight at that point.
#[derive(Debug, Clone)]
pub struct SnapshotDescriptor {
    /// This transaction's version
    pub version: u64,
    /// Oldest version that was still active when the snapshot was taken
    pub lowest_active: u64,
    /// Versions in flight when the snapshot was taken
    pub active: Vec<u64>,
}

impl SnapshotDescriptor {
    /// Whether a writer version is visible to this snapshot
    pub fn in_snapshot(&self, version: u64) -> bool {
        version < self.version && !self.active.contains(&version)
    }
}

// ============================================================================
// Commit Manager
// ============================================================================

/// Handle to the commit manager
#[async_trait]
pub trait CommitManager: Send + Sync {
    /// Start a transaction, obtaining its snapshot descriptor.
    async fn start(&self, tx_type: TransactionType) -> Result<SnapshotDescriptor>;

    /// Local completion bookkeeping for a snapshot. Idempotent; called after
    /// the store has been notified, and from transaction teardown.
    fn release(&self, snapshot: &SnapshotDescriptor);
}

/// Commit manager backed by process-local state
///
/// Issues monotonically increasing versions and tracks the set of in-flight
/// transactions so each new snapshot can name the writers invisible to it.
pub struct LocalCommitManager {
    next_version: AtomicU64,
    active: RwLock<BTreeSet<u64>>,
    started: AtomicU64,
    completed: AtomicU64,
}

impl LocalCommitManager {
    pub fn new() -> Self {
        Self {
            next_version: AtomicU64::new(1),
            active: RwLock::new(BTreeSet::new()),
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Number of transactions started
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Number of snapshots completed
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Number of snapshots currently in flight
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }
}

impl Default for LocalCommitManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommitManager for LocalCommitManager {
    async fn start(&self, _tx_type: TransactionType) -> Result<SnapshotDescriptor> {
        let mut active = self.active.write();
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let in_flight: Vec<u64> = active.iter().copied().collect();
        let lowest_active = in_flight.first().copied().unwrap_or(version);
        active.insert(version);
        self.started.fetch_add(1, Ordering::Relaxed);
        Ok(SnapshotDescriptor {
            version,
            lowest_active,
            active: in_flight,
        })
    }

    fn release(&self, snapshot: &SnapshotDescriptor) {
        if self.active.write().remove(&snapshot.version) {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versions_increase() {
        let cm = LocalCommitManager::new();
        let s1 = cm.start(TransactionType::ReadWrite).await.unwrap();
        let s2 = cm.start(TransactionType::ReadWrite).await.unwrap();
        assert!(s2.version > s1.version);
        assert_eq!(cm.active_count(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_sees_committed_not_active() {
        let cm = LocalCommitManager::new();
        let s1 = cm.start(TransactionType::ReadWrite).await.unwrap();
        let s2 = cm.start(TransactionType::ReadWrite).await.unwrap();

        // s1 was in flight when s2 started
        assert!(s2.active.contains(&s1.version));
        assert!(!s2.in_snapshot(s1.version));
        assert!(!s2.in_snapshot(s2.version));

        cm.release(&s1);
        let s3 = cm.start(TransactionType::ReadOnly).await.unwrap();
        assert!(s3.in_snapshot(s1.version));
        assert!(!s3.in_snapshot(s2.version));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let cm = LocalCommitManager::new();
        let s = cm.start(TransactionType::ReadWrite).await.unwrap();
        cm.release(&s);
        cm.release(&s);
        assert_eq!(cm.completed(), 1);
        assert_eq!(cm.active_count(), 0);
    }
}
