//! Lock-free entity ID pool with generation counters.
//!
//! Indices are recycled through an MPMC free queue; each destruction bumps the
//! slot's generation so stale IDs fail `is_alive`. One process-wide instance
//! backs every entity manager, which is what keeps IDs unique across managers
//! and lets cross-manager moves preserve them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;

use crossbeam::queue::ArrayQueue;
use tracing::warn;

use crate::entity::EntityId;

/// Capacity of the process-wide allocator.
pub const MAX_ENTITIES: u32 = 1 << 20;

/// Thread-safe entity ID manager.
pub struct EntityIdAllocator {
    max_entities: u32,
    next_index: AtomicU32,
    generations: Vec<AtomicU32>,
    free_queue: ArrayQueue<u32>,
}

impl EntityIdAllocator {
    pub fn new(max_entities: u32) -> Self {
        assert!(max_entities > 0);
        let mut generations = Vec::with_capacity(max_entities as usize);
        generations.resize_with(max_entities as usize, || AtomicU32::new(0));
        Self {
            max_entities,
            next_index: AtomicU32::new(0),
            generations,
            free_queue: ArrayQueue::new(max_entities as usize),
        }
    }

    /// Issue a fresh ID, reusing a freed index when one is available.
    /// Returns [`EntityId::INVALID`] once the pool is exhausted.
    pub fn create(&self) -> EntityId {
        if let Some(index) = self.free_queue.pop() {
            let generation = self.generations[index as usize].load(Ordering::Acquire);
            return EntityId { index, generation };
        }

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        if index >= self.max_entities {
            return EntityId::INVALID;
        }

        EntityId {
            index,
            generation: self.generations[index as usize].load(Ordering::Acquire),
        }
    }

    /// Invalidate `id` and return its index to the pool. If the free queue is
    /// full the index leaks; the stale ID still fails `is_alive`.
    pub fn destroy(&self, id: EntityId) {
        if id.index >= self.max_entities {
            return;
        }

        self.generations[id.index as usize].fetch_add(1, Ordering::AcqRel);

        if self.free_queue.push(id.index).is_err() {
            warn!(index = id.index, "entity free queue full, index leaked");
        }
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        if id.index >= self.max_entities {
            return false;
        }
        self.generations[id.index as usize].load(Ordering::Acquire) == id.generation
    }

    pub fn capacity(&self) -> u32 {
        self.max_entities
    }
}

static ALLOCATOR: LazyLock<EntityIdAllocator> =
    LazyLock::new(|| EntityIdAllocator::new(MAX_ENTITIES));

/// Process-wide allocator instance.
pub fn allocator() -> &'static EntityIdAllocator {
    &ALLOCATOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_destroy_is_alive() {
        let alloc = EntityIdAllocator::new(8);
        let id = alloc.create();
        assert!(id.is_valid());
        assert!(alloc.is_alive(id));

        alloc.destroy(id);
        assert!(!alloc.is_alive(id));

        // The recycled index carries a bumped generation.
        let reused = alloc.create();
        assert_eq!(reused.index, id.index);
        assert_ne!(reused.generation, id.generation);
        assert!(alloc.is_alive(reused));
    }

    #[test]
    fn exhaustion_returns_invalid() {
        let alloc = EntityIdAllocator::new(4);
        let ids: Vec<_> = (0..4).map(|_| alloc.create()).collect();
        assert!(ids.iter().all(|id| id.is_valid()));
        assert_eq!(alloc.create(), EntityId::INVALID);

        // Freeing one index makes exactly one more create succeed.
        alloc.destroy(ids[2]);
        assert!(alloc.create().is_valid());
        assert_eq!(alloc.create(), EntityId::INVALID);
    }

    #[test]
    fn destroy_out_of_range_is_ignored() {
        let alloc = EntityIdAllocator::new(2);
        alloc.destroy(EntityId::INVALID);
        assert!(alloc.create().is_valid());
    }

    #[test]
    fn ids_unique_among_live() {
        let alloc = EntityIdAllocator::new(64);
        let ids: Vec<_> = (0..64).map(|_| alloc.create()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }
}
