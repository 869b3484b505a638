//! Counter Table
//!
//! Registry of instrumented compilation units. Each unit owns a fixed-length
//! array of counters that instrumented code bumps directly through its
//! [`PointCounters`] handle; the table never reallocates an array after
//! registration, so handles stay valid across [`CounterTable::reset`].

use crate::coordinator::Locking;
use crate::result::RuntimeResult;
use crate::snapshot::{FileCoverage, Snapshot};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Counters for one registered unit
#[derive(Debug)]
pub struct PointCounters {
    counts: Box<[AtomicU64]>,
}

impl PointCounters {
    fn new(point_count: usize) -> Self {
        Self {
            counts: (0..point_count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Record one visit of `point`; out-of-range points are ignored
    #[inline(always)]
    pub fn increment(&self, point: usize) {
        if let Some(counter) = self.counts.get(point) {
            // saturate rather than wrap
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                c.checked_add(1)
            });
        }
    }

    /// Current count for `point` (0 when out of range)
    #[inline]
    #[must_use]
    pub fn get(&self, point: usize) -> u64 {
        self.counts
            .get(point)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Number of points
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True when the unit has no points
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Copy of all counts
    #[must_use]
    pub fn to_vec(&self) -> Vec<u64> {
        self.counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    fn clear(&self) {
        for counter in self.counts.iter() {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
struct Entry {
    file_id: String,
    counters: Arc<PointCounters>,
    metadata: Vec<u8>,
}

/// All registered units, in registration order
#[derive(Debug, Default)]
pub struct CounterTable {
    entries: Mutex<Vec<Entry>>,
}

impl CounterTable {
    /// Empty table
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn hold_entries(&self) -> impl Sized + '_ {
        self.entries()
    }

    /// Register a unit. A second registration of the same `file_id` returns
    /// the existing counters and ignores the new shape.
    pub fn register(
        &self,
        file_id: &str,
        point_count: usize,
        metadata: &[u8],
    ) -> Arc<PointCounters> {
        let mut entries = self.entries();
        if let Some(existing) = entries.iter().find(|e| e.file_id == file_id) {
            return Arc::clone(&existing.counters);
        }
        let counters = Arc::new(PointCounters::new(point_count));
        entries.push(Entry {
            file_id: file_id.to_string(),
            counters: Arc::clone(&counters),
            metadata: metadata.to_vec(),
        });
        tracing::debug!(file_id, point_count, "registered instrumented unit");
        counters
    }

    /// Counters of an already registered unit
    #[must_use]
    pub fn counters(&self, file_id: &str) -> Option<Arc<PointCounters>> {
        self.entries()
            .iter()
            .find(|e| e.file_id == file_id)
            .map(|e| Arc::clone(&e.counters))
    }

    /// Identifiers in registration order
    #[must_use]
    pub fn registered_files(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.file_id.clone()).collect()
    }

    /// Zero every counter; arrays keep their length and identity
    pub fn reset(&self) {
        for entry in self.entries().iter() {
            entry.counters.clear();
        }
    }

    /// Current counters as a snapshot value
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Self::collect(&self.entries())
    }

    /// Like [`snapshot`](Self::snapshot), but `None` instead of waiting when
    /// the registry is locked. Safe to call from a signal handler that may
    /// have interrupted a registration or a reset.
    #[must_use]
    pub fn try_snapshot(&self) -> Option<Snapshot> {
        self.snapshot_with(Locking::Try)
    }

    pub(crate) fn snapshot_with(&self, locking: Locking) -> Option<Snapshot> {
        locking
            .acquire(&self.entries)
            .map(|entries| Self::collect(&entries))
    }

    fn collect(entries: &[Entry]) -> Snapshot {
        Snapshot {
            files: entries
                .iter()
                .map(|e| FileCoverage {
                    file_id: e.file_id.clone(),
                    counts: e.counters.to_vec(),
                    metadata: e.metadata.clone(),
                })
                .collect(),
        }
    }

    /// Write the current snapshot to `writer`
    pub fn serialize_to<W: Write>(&self, writer: &mut W) -> RuntimeResult<()> {
        self.snapshot().write_to(writer)
    }
}
