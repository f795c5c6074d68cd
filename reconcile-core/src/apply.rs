//! Apply coordinator: the only component allowed to mutate schedule state.
//!
//! Application is all-or-nothing per entry but not across entries: a lock
//! violation skips that entry and the rest still apply. Skipped entries stay
//! available for a future diff cycle. A mutex around the store serializes
//! concurrent apply calls (single-writer discipline).

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::block::{BlockSource, PlannedBlock};
use crate::diff::ScheduleDiff;
use crate::store::ScheduleStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct ApplyCoordinator {
    store: Mutex<ScheduleStore>,
}

impl ApplyCoordinator {
    pub fn new(store: ScheduleStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Read-only copy of the current blocks for analysis/diffing.
    pub fn snapshot(&self) -> Vec<PlannedBlock> {
        self.lock_store().snapshot()
    }

    /// Commit an accepted diff. Entries targeting locked blocks (or ids the
    /// store no longer knows) are skipped and counted, never overwritten.
    /// Added entries get a freshly minted persistent id; the temp id is
    /// discarded.
    pub fn apply(&self, diff: &ScheduleDiff) -> ApplyResult {
        let mut store = self.lock_store();
        let mut result = ApplyResult::default();

        for add in &diff.added {
            let id = store.mint_id();
            store.insert(
                PlannedBlock::new(id, add.title.clone(), add.start, add.duration_minutes)
                    .with_locked(add.locked)
                    .with_source(BlockSource::Generator),
            );
            result.applied += 1;
        }

        for mv in &diff.moved {
            match store.get_mut(&mv.block_id) {
                Some(block) if !block.locked => {
                    block.start = mv.new_start;
                    result.applied += 1;
                }
                _ => result.skipped += 1,
            }
        }

        for resize in &diff.resized {
            match store.get_mut(&resize.block_id) {
                Some(block) if !block.locked => {
                    block.duration_minutes = resize.new_duration_minutes;
                    result.applied += 1;
                }
                _ => result.skipped += 1,
            }
        }

        for remove in &diff.removed {
            match store.get(&remove.block_id) {
                Some(block) if !block.locked => {
                    store.remove(&remove.block_id);
                    result.applied += 1;
                }
                _ => result.skipped += 1,
            }
        }

        result
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, ScheduleStore> {
        // A poisoned lock means a panic mid-apply; the store itself is still
        // structurally valid (per-entry updates), so keep going.
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
