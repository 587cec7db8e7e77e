//! Chunk-crossing detection and entity relocation between cell managers.
//!
//! Each spatially-tracked entity carries a [`ChunkHandle`]: the key is
//! authoritative, the cached pointer is an advisory fast path that is only
//! trusted for partitions with stable chunk pointers. Crossing moves come in
//! an immediate flavour and a deferred flavour that queues into a
//! [`LocalBatch`] for the end-of-frame flush.

use std::sync::{Arc, Weak};

use glam::Vec3;

use crate::component::Component;
use crate::entity::EntityId;
use crate::manager::EntityManager;
use crate::mover::LocalBatch;
use crate::partition::{
    ChunkRegistry, LevelId, OutOfBoundsPolicy, Partition, SpatialChunk, SpatialChunkKey,
};

/// Key-first handle to the cell an entity currently lives in.
#[derive(Debug, Clone, Default)]
pub struct ChunkHandle {
    pub key: SpatialChunkKey,
    pub cached: Weak<SpatialChunk>,
}

impl ChunkHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.key.is_valid() || self.cached.strong_count() > 0
    }
}

/// Move one entity between managers: dense row first, then its sparse
/// entries. Returns false when nothing moved.
pub fn relocate_entity_between_managers(
    id: EntityId,
    src: &EntityManager,
    dst: &EntityManager,
) -> bool {
    if std::ptr::eq(src, dst) {
        return false;
    }
    if !EntityManager::insert_with_id_for_manager_move(id, src, dst) {
        return false;
    }
    src.move_sparse_ids_to(dst, &[id]);
    true
}

/// Detect a cell crossing at `new_pos` and relocate immediately when one
/// happened. Returns true when the handle changed cells.
pub fn move_if_crossed<P: Partition>(
    id: EntityId,
    new_pos: Vec3,
    partition: &P,
    registry: &ChunkRegistry,
    level: LevelId,
    handle: &mut ChunkHandle,
    policy: OutOfBoundsPolicy,
) -> bool {
    let Some(dst) = partition.chunk_at(new_pos, registry, level, policy) else {
        return false;
    };

    if P::STABLE_CHUNK_PTRS {
        if let Some(cached) = handle.cached.upgrade() {
            if Arc::ptr_eq(&cached, &dst) {
                return false;
            }
            relocate_entity_between_managers(id, cached.entity_manager(), dst.entity_manager());
        }
        handle.key = dst.key();
        handle.cached = Arc::downgrade(&dst);
        true
    } else {
        let dst_key = dst.key();
        if dst_key == handle.key {
            handle.cached = Arc::downgrade(&dst);
            return false;
        }
        if let (Some(src_chunk), Some(dst_chunk)) = (
            registry.resolve_owner_em(handle.key),
            registry.resolve_owner_em(dst_key),
        ) {
            relocate_entity_between_managers(
                id,
                src_chunk.entity_manager(),
                dst_chunk.entity_manager(),
            );
        }
        handle.key = dst_key;
        handle.cached = Arc::downgrade(&dst);
        true
    }
}

/// Deferred variant: the crossing is recorded into `batch` and executed at
/// the mover flush. The handle is updated optimistically so repeated calls
/// within a frame enqueue each crossing once.
pub fn move_if_crossed_deferred<P: Partition>(
    id: EntityId,
    new_pos: Vec3,
    partition: &P,
    registry: &ChunkRegistry,
    level: LevelId,
    handle: &mut ChunkHandle,
    batch: &mut LocalBatch<'_>,
    policy: OutOfBoundsPolicy,
) -> bool {
    let Some(dst) = partition.chunk_at(new_pos, registry, level, policy) else {
        return false;
    };

    if P::STABLE_CHUNK_PTRS {
        if let Some(cached) = handle.cached.upgrade() {
            if Arc::ptr_eq(&cached, &dst) {
                return false;
            }
            batch.add(id, handle.key, dst.key());
        }
        handle.key = dst.key();
        handle.cached = Arc::downgrade(&dst);
        true
    } else {
        let dst_key = dst.key();
        if dst_key == handle.key {
            handle.cached = Arc::downgrade(&dst);
            return false;
        }
        if handle.key.is_valid() {
            batch.add(id, handle.key, dst_key);
        }
        handle.key = dst_key;
        handle.cached = Arc::downgrade(&dst);
        true
    }
}

/// Whether a tracked entity currently lives in a cell manager or in the
/// level's floating manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatialState {
    #[default]
    Attached,
    Detached,
}

/// Sparse tracking component for entities that move between cells.
#[derive(Debug, Clone, Default)]
pub struct SpatialMotionTag {
    pub handle: ChunkHandle,
    pub pending_key: SpatialChunkKey,
    pub stable_frames: u16,
    pub state: SpatialState,
}

impl Component for SpatialMotionTag {
    const SPARSE: bool = true;
}

/// Re-attachment rule: an entity settles once it has been slower than
/// `speed_threshold` for `frames` consecutive frames.
#[derive(Debug, Clone, Copy)]
pub struct SettleRule {
    pub speed_threshold: f32,
    pub frames: u16,
}

impl Default for SettleRule {
    fn default() -> Self {
        Self {
            speed_threshold: 0.2,
            frames: 5,
        }
    }
}

/// Detach fast movers into `float_em`, track their pending destination and
/// re-attach them once they settle.
pub fn update_spatial_attachment<P: Partition>(
    id: EntityId,
    pos: Vec3,
    vel: Vec3,
    partition: &P,
    registry: &ChunkRegistry,
    level: LevelId,
    tag: &mut SpatialMotionTag,
    float_em: &EntityManager,
    rule: &SettleRule,
) {
    let dst = partition.chunk_at(pos, registry, level, OutOfBoundsPolicy::ClampToEdge);
    let dst_key = dst.as_ref().map(|c| c.key()).unwrap_or_default();
    let moving = vel.length() > rule.speed_threshold;

    match tag.state {
        SpatialState::Attached => {
            if moving {
                if let Some(src) = registry.resolve_owner_em(tag.handle.key) {
                    relocate_entity_between_managers(id, src.entity_manager(), float_em);
                }
                tag.state = SpatialState::Detached;
                tag.pending_key = dst_key;
                tag.stable_frames = 0;
            } else {
                move_if_crossed(
                    id,
                    pos,
                    partition,
                    registry,
                    level,
                    &mut tag.handle,
                    OutOfBoundsPolicy::ClampToEdge,
                );
            }
        }
        SpatialState::Detached => {
            tag.pending_key = dst_key;
            if moving {
                tag.stable_frames = 0;
                return;
            }
            tag.stable_frames += 1;
            if tag.stable_frames < rule.frames || !dst_key.is_valid() {
                return;
            }
            if let Some(dst_chunk) = registry.resolve_owner_em(dst_key) {
                if relocate_entity_between_managers(id, float_em, dst_chunk.entity_manager()) {
                    tag.handle.key = dst_key;
                    tag.handle.cached = Arc::downgrade(&dst_chunk);
                    tag.state = SpatialState::Attached;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::register;
    use crate::mover::BudgetMover;
    use crate::partition::GridPartition;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Marker(u32);
    impl Component for Marker {}

    fn world() -> (GridPartition, ChunkRegistry, LevelId) {
        register::<Marker>();
        register::<SpatialMotionTag>();
        let grid = GridPartition::new(2, 1, 10.0);
        let registry = ChunkRegistry::new();
        let level = LevelId(7);
        grid.register_all_chunks(&registry, level);
        (grid, registry, level)
    }

    #[test]
    fn immediate_move_relocates_on_crossing() {
        let (grid, registry, level) = world();
        let left = grid
            .chunk_at(
                Vec3::new(5.0, 5.0, 0.0),
                &registry,
                level,
                OutOfBoundsPolicy::Reject,
            )
            .unwrap();

        let id = left.entity_manager().add_entity((Marker(1),)).unwrap();
        let mut handle = ChunkHandle {
            key: left.key(),
            cached: Arc::downgrade(&left),
        };

        // Same cell: no move.
        assert!(!move_if_crossed(
            id,
            Vec3::new(7.0, 5.0, 0.0),
            &grid,
            &registry,
            level,
            &mut handle,
            OutOfBoundsPolicy::Reject,
        ));
        assert_eq!(left.entity_manager().get::<Marker>(id), Some(Marker(1)));

        // Crossing into the right cell moves the entity.
        assert!(move_if_crossed(
            id,
            Vec3::new(15.0, 5.0, 0.0),
            &grid,
            &registry,
            level,
            &mut handle,
            OutOfBoundsPolicy::Reject,
        ));
        let right = registry.resolve_owner_em(handle.key).unwrap();
        assert!(left.entity_manager().location_of(id).is_none());
        assert_eq!(right.entity_manager().get::<Marker>(id), Some(Marker(1)));
    }

    #[test]
    fn deferred_move_queues_until_flush() {
        let (grid, registry, level) = world();
        let left = grid
            .chunk_at(
                Vec3::new(1.0, 1.0, 0.0),
                &registry,
                level,
                OutOfBoundsPolicy::Reject,
            )
            .unwrap();
        let id = left.entity_manager().add_entity((Marker(9),)).unwrap();

        let mover = BudgetMover::new();
        let mut handle = ChunkHandle {
            key: left.key(),
            cached: Arc::downgrade(&left),
        };
        {
            let mut batch = mover.local_batch();
            assert!(move_if_crossed_deferred(
                id,
                Vec3::new(15.0, 1.0, 0.0),
                &grid,
                &registry,
                level,
                &mut handle,
                &mut batch,
                OutOfBoundsPolicy::Reject,
            ));
        }

        // Still home until the flush runs.
        assert_eq!(left.entity_manager().get::<Marker>(id), Some(Marker(9)));
        assert_eq!(mover.flush(&registry, usize::MAX), 1);
        assert!(left.entity_manager().location_of(id).is_none());
        let dst = registry.resolve_owner_em(handle.key).unwrap();
        assert_eq!(dst.entity_manager().get::<Marker>(id), Some(Marker(9)));
    }

    #[test]
    fn settle_rule_detaches_and_reattaches() {
        let (grid, registry, level) = world();
        let float_em = EntityManager::new();
        let home = grid
            .chunk_at(
                Vec3::new(1.0, 1.0, 0.0),
                &registry,
                level,
                OutOfBoundsPolicy::Reject,
            )
            .unwrap();
        let id = home.entity_manager().add_entity((Marker(3),)).unwrap();

        let mut tag = SpatialMotionTag {
            handle: ChunkHandle {
                key: home.key(),
                cached: Arc::downgrade(&home),
            },
            ..Default::default()
        };
        let rule = SettleRule {
            speed_threshold: 0.5,
            frames: 2,
        };

        // Fast: detaches into the floating manager.
        update_spatial_attachment(
            id,
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
            &grid,
            &registry,
            level,
            &mut tag,
            &float_em,
            &rule,
        );
        assert_eq!(tag.state, SpatialState::Detached);
        assert!(float_em.location_of(id).is_some());
        assert!(home.entity_manager().location_of(id).is_none());

        // Slow in the right cell for two frames: re-attaches there.
        for _ in 0..2 {
            update_spatial_attachment(
                id,
                Vec3::new(15.0, 1.0, 0.0),
                Vec3::ZERO,
                &grid,
                &registry,
                level,
                &mut tag,
                &float_em,
                &rule,
            );
        }
        assert_eq!(tag.state, SpatialState::Attached);
        assert!(float_em.location_of(id).is_none());
        let dst = registry.resolve_owner_em(tag.handle.key).unwrap();
        assert_eq!(dst.entity_manager().get::<Marker>(id), Some(Marker(3)));
    }
}
