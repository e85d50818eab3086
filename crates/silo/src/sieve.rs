//! The sieve: the shared set of ids currently traversing the pipeline.
//!
//! The dedup forwarder inserts a key before handing a task to a consumer;
//! the consumer removes it one step later, when it accepts its *next* task.
//! Publishers snapshot the set to build SQL exclusion lists, so the sieve is
//! both the dedup gate and the first line of defense against re-polling
//! in-flight rows. Readers tolerate stale snapshots: a missed exclusion is
//! caught at the gate, a stale inclusion costs one wasted round-trip.

use dashmap::DashSet;

use crate::job::TaskKind;

pub(crate) type SieveKey = (TaskKind, u64);

#[derive(Default)]
pub(crate) struct Sieve {
    keys: DashSet<SieveKey>,
}

impl Sieve {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a key; returns `false` when it was already present.
    pub(crate) fn insert(&self, key: SieveKey) -> bool {
        self.keys.insert(key)
    }

    pub(crate) fn remove(&self, key: &SieveKey) {
        self.keys.remove(key);
    }

    /// Snapshot of the ids in flight for one id space.
    pub(crate) fn ids(&self, kind: TaskKind) -> Vec<u64> {
        self.keys
            .iter()
            .filter(|key| key.0 == kind)
            .map(|key| key.1)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}
