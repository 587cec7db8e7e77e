//! Deferred cross-chunk entity migration.
//!
//! Systems detect crossings during the frame and enqueue `(id, src, dst)`
//! keys; the level flushes the queue at end of frame under a budget,
//! bucketing moves by `(source manager, destination manager)` so sparse
//! entries transfer in one call per pair. The mover never destroys IDs, it
//! only rebinds ownership; unprocessed entries stay queued for the next
//! frame.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

use crate::entity::EntityId;
use crate::manager::EntityManager;
use crate::partition::{ChunkRegistry, SpatialChunk, SpatialChunkKey};

/// One queued migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMove {
    pub id: EntityId,
    pub src: SpatialChunkKey,
    pub dst: SpatialChunkKey,
}

/// Per-level queue of pending migrations, flushed under a frame budget.
#[derive(Default)]
pub struct BudgetMover {
    queue: Mutex<Vec<PendingMove>>,
}

impl BudgetMover {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a single move for a later flush. Same-cell moves are ignored.
    pub fn enqueue(&self, id: EntityId, src: SpatialChunkKey, dst: SpatialChunkKey) {
        if src == dst {
            return;
        }
        self.queue.lock().push(PendingMove { id, src, dst });
    }

    /// Queue a batch with one lock acquisition.
    pub fn enqueue_bulk<I: IntoIterator<Item = PendingMove>>(&self, moves: I) {
        let mut queue = self.queue.lock();
        queue.extend(moves);
    }

    /// A producer-local buffer that flushes into this mover on drop.
    pub fn local_batch(&self) -> LocalBatch<'_> {
        LocalBatch {
            owner: Some(self),
            buf: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drop every queued entry.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Process up to `budget` queued moves: resolve both keys, bucket by
    /// manager pair, column-copy each entity with its ID preserved, then
    /// transfer sparse entries per bucket. Returns the number moved; entries
    /// whose keys no longer resolve are dropped.
    pub fn flush(&self, registry: &ChunkRegistry, budget: usize) -> usize {
        if budget == 0 {
            return 0;
        }

        let taken: Vec<PendingMove> = {
            let mut queue = self.queue.lock();
            if queue.is_empty() {
                return 0;
            }
            let n = queue.len().min(budget);
            queue.drain(..n).collect()
        };

        struct Bucket {
            src: Arc<SpatialChunk>,
            dst: Arc<SpatialChunk>,
            ids: Vec<EntityId>,
        }

        let mut buckets: FxHashMap<(usize, usize), Bucket> = FxHashMap::default();
        for pm in &taken {
            let Some(src) = registry.resolve_owner_em(pm.src) else {
                debug!(src = ?pm.src, "pending move dropped: source key unresolved");
                continue;
            };
            let Some(dst) = registry.resolve_owner_em(pm.dst) else {
                debug!(dst = ?pm.dst, "pending move dropped: destination key unresolved");
                continue;
            };
            if Arc::ptr_eq(&src, &dst) {
                continue;
            }
            let key = (Arc::as_ptr(&src) as usize, Arc::as_ptr(&dst) as usize);
            buckets
                .entry(key)
                .or_insert_with(|| Bucket {
                    src,
                    dst,
                    ids: Vec::new(),
                })
                .ids
                .push(pm.id);
        }

        let mut moved = 0;
        for (_, bucket) in buckets {
            let src_em = bucket.src.entity_manager();
            let dst_em = bucket.dst.entity_manager();
            for id in &bucket.ids {
                if EntityManager::insert_with_id_for_manager_move(*id, src_em, dst_em) {
                    moved += 1;
                }
            }
            src_em.move_sparse_ids_to(dst_em, &bucket.ids);
        }
        moved
    }
}

/// Producer-local move buffer; amortises queue locking and flushes any
/// remainder when dropped.
pub struct LocalBatch<'m> {
    owner: Option<&'m BudgetMover>,
    buf: Vec<PendingMove>,
}

impl LocalBatch<'_> {
    pub fn add(&mut self, id: EntityId, src: SpatialChunkKey, dst: SpatialChunkKey) {
        if src == dst {
            return;
        }
        self.buf.push(PendingMove { id, src, dst });
    }

    pub fn add_range<I: IntoIterator<Item = PendingMove>>(&mut self, moves: I) {
        self.buf.extend(moves);
    }

    /// Push buffered moves into the owner now.
    pub fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        if let Some(owner) = self.owner {
            owner.enqueue_bulk(self.buf.drain(..));
        }
    }

    /// Discard the buffer and detach from the owner.
    pub fn cancel(&mut self) {
        self.owner = None;
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Drop for LocalBatch<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
