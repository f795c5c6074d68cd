//! In-memory schedule store.
//!
//! The single mutable resource of the engine. Persistence mechanics live in
//! an outer layer; this keeps the id-keyed block map and mints persistent
//! identifiers for accepted additions.

use std::collections::BTreeMap;

use crate::block::PlannedBlock;

#[derive(Debug, Default)]
pub struct ScheduleStore {
    blocks: BTreeMap<String, PlannedBlock>,
    next_id: u64,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: impl IntoIterator<Item = PlannedBlock>) -> Self {
        let mut store = Self::new();
        for block in blocks {
            store.insert(block);
        }
        store
    }

    pub fn insert(&mut self, block: PlannedBlock) {
        self.blocks.insert(block.id.clone(), block);
    }

    pub fn get(&self, id: &str) -> Option<&PlannedBlock> {
        self.blocks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PlannedBlock> {
        self.blocks.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PlannedBlock> {
        self.blocks.remove(id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks in id order (BTreeMap iteration), for deterministic analysis.
    pub fn snapshot(&self) -> Vec<PlannedBlock> {
        self.blocks.values().cloned().collect()
    }

    /// Mint a fresh persistent identifier for an accepted addition. The
    /// generator's temp id is discarded at this point.
    pub fn mint_id(&mut self) -> String {
        loop {
            self.next_id += 1;
            let id = format!("blk-{:04}", self.next_id);
            if !self.blocks.contains_key(&id) {
                return id;
            }
        }
    }
}
