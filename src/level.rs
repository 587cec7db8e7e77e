//! Level: one scene unit wiring a partition, a scheduler and a mover.
//!
//! Each frame the level merges pending systems, runs every batch, then
//! flushes the cross-chunk mover under its per-frame budget.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use glam::Vec3;
use tracing::error;

use crate::component::ComponentSet;
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::executor::Executor;
use crate::mover::BudgetMover;
use crate::partition::{ChunkRegistry, LevelId, OutOfBoundsPolicy, Partition, SpatialChunk};
use crate::schedule::SystemScheduler;
use crate::service::ServiceLocator;
use crate::system::BoxedSystem;

/// Default per-frame mover budget.
pub const DEFAULT_MOVE_BUDGET: usize = 2000;

/// Full-update vs limited-update levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    Main,
    Sub,
}

/// Per-level state handed to every system.
pub struct LevelContext {
    id: LevelId,
    /// Deferred cross-chunk move queue; systems enqueue, the level flushes.
    pub mover: BudgetMover,
}

impl LevelContext {
    pub(crate) fn new(id: LevelId) -> Self {
        Self {
            id,
            mover: BudgetMover::new(),
        }
    }

    pub fn id(&self) -> LevelId {
        self.id
    }
}

static NEXT_LEVEL_ID: AtomicU32 = AtomicU32::new(1);

/// A scene: partition-backed entity storage, a system scheduler and the
/// deferred mover, updated once per frame.
pub struct Level<P: Partition> {
    ctx: LevelContext,
    name: String,
    state: LevelState,
    scheduler: SystemScheduler<P>,
    limited_systems: Vec<BoxedSystem<P>>,
    partition: P,
    registry: Arc<ChunkRegistry>,
    move_budget: usize,
}

impl<P: Partition> Level<P> {
    pub fn new(name: impl Into<String>, registry: Arc<ChunkRegistry>, partition: P) -> Self {
        let id = LevelId(NEXT_LEVEL_ID.fetch_add(1, Ordering::Relaxed));
        partition.register_all_chunks(&registry, id);
        Self {
            ctx: LevelContext::new(id),
            name: name.into(),
            state: LevelState::Main,
            scheduler: SystemScheduler::new(),
            limited_systems: Vec::new(),
            partition,
            registry,
            move_budget: DEFAULT_MOVE_BUDGET,
        }
    }

    pub fn id(&self) -> LevelId {
        self.ctx.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LevelState {
        self.state
    }

    pub fn set_state(&mut self, state: LevelState) {
        self.state = state;
    }

    pub fn set_move_budget(&mut self, budget: usize) {
        self.move_budget = budget;
    }

    pub fn partition(&self) -> &P {
        &self.partition
    }

    pub fn registry(&self) -> &ChunkRegistry {
        &self.registry
    }

    pub fn context(&self) -> &LevelContext {
        &self.ctx
    }

    pub fn mover(&self) -> &BudgetMover {
        &self.ctx.mover
    }

    pub fn scheduler(&self) -> &SystemScheduler<P> {
        &self.scheduler
    }

    /// Queue a system; it starts participating next frame.
    pub fn add_system(&self, system: BoxedSystem<P>, services: &ServiceLocator) {
        self.scheduler.add_system(system, services);
    }

    /// Systems run by [`Level::update_limited`] only (fade-outs,
    /// interpolation on background levels).
    pub fn add_limited_system(&mut self, system: BoxedSystem<P>) {
        self.limited_systems.push(system);
    }

    /// Spawn an entity into the cell owning `pos`.
    pub fn spawn_at<B: ComponentSet>(&self, pos: Vec3, set: B) -> Result<EntityId> {
        let Some(chunk) = self.partition.chunk_at(
            pos,
            &self.registry,
            self.ctx.id,
            OutOfBoundsPolicy::ClampToEdge,
        ) else {
            error!(?pos, "spawn position resolved to no cell");
            return Err(EcsError::NoChunkForPosition);
        };
        chunk.entity_manager().add_entity(set)
    }

    /// Spawn an entity without a spatial anchor into the global manager.
    pub fn spawn_global<B: ComponentSet>(&self, set: B) -> Result<EntityId> {
        self.partition.global_manager().add_entity(set)
    }

    pub fn get_chunk(&self, pos: Vec3, policy: OutOfBoundsPolicy) -> Option<Arc<SpatialChunk>> {
        self.partition.chunk_at(pos, &self.registry, self.ctx.id, policy)
    }

    pub fn entity_count(&self) -> usize {
        self.partition.entity_count()
    }

    /// One frame: partition maintenance, all system batches, then the
    /// budgeted mover flush.
    pub fn update(
        &mut self,
        services: &ServiceLocator,
        dt: f64,
        executor: Option<&dyn Executor>,
    ) -> Result<()> {
        self.partition.update(dt);
        self.scheduler
            .run_frame(&self.partition, &self.ctx, services, executor)?;
        self.ctx.mover.flush(&self.registry, self.move_budget);
        Ok(())
    }

    /// Run only the limited system list (no batching, serial order).
    pub fn update_limited(
        &mut self,
        services: &ServiceLocator,
        _dt: f64,
        executor: Option<&dyn Executor>,
    ) -> Result<()> {
        for system in self.limited_systems.iter_mut() {
            system.update(&self.partition, &self.ctx, services, executor)?;
        }
        Ok(())
    }

    /// Run every system's `end` hook.
    pub fn clean(&mut self, services: &ServiceLocator) {
        self.scheduler
            .end_all(&self.partition, &self.ctx, services);
        for system in self.limited_systems.iter_mut() {
            system.end(&self.partition, &self.ctx, services);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{register, Component};
    use crate::partition::GridPartition;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Coin(u32);
    impl Component for Coin {}

    #[test]
    fn spawn_routes_by_position() {
        register::<Coin>();
        let registry = Arc::new(ChunkRegistry::new());
        let level = Level::new("town", Arc::clone(&registry), GridPartition::new(2, 1, 10.0));

        let left = level.spawn_at(Vec3::new(2.0, 2.0, 0.0), (Coin(1),)).unwrap();
        let right = level
            .spawn_at(Vec3::new(12.0, 2.0, 0.0), (Coin(2),))
            .unwrap();
        let global = level.spawn_global((Coin(3),)).unwrap();

        let left_chunk = level
            .get_chunk(Vec3::new(2.0, 2.0, 0.0), OutOfBoundsPolicy::Reject)
            .unwrap();
        let right_chunk = level
            .get_chunk(Vec3::new(12.0, 2.0, 0.0), OutOfBoundsPolicy::Reject)
            .unwrap();

        assert_eq!(left_chunk.entity_manager().get::<Coin>(left), Some(Coin(1)));
        assert!(left_chunk.entity_manager().location_of(right).is_none());
        assert_eq!(
            right_chunk.entity_manager().get::<Coin>(right),
            Some(Coin(2))
        );
        assert_eq!(
            level.partition().global_manager().get::<Coin>(global),
            Some(Coin(3))
        );
        assert_eq!(level.entity_count(), 3);
    }

    #[test]
    fn levels_get_distinct_ids() {
        let registry = Arc::new(ChunkRegistry::new());
        let a = Level::new("a", Arc::clone(&registry), GridPartition::new(1, 1, 1.0));
        let b = Level::new("b", Arc::clone(&registry), GridPartition::new(1, 1, 1.0));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.context().id(), a.id());
    }
}
