// Copyright 2025 Spatial ECS Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end scenarios across the level, scheduler, storage and mover.

#[cfg(test)]
mod tests {
    use crate::access::{AccessSpec, Write};
    use crate::component::{register, Component, FieldLayout};
    use crate::error::Result;
    use crate::executor::{Executor, ThreadPoolExecutor};
    use crate::layout::ColumnInfo;
    use crate::level::{Level, LevelContext};
    use crate::manager::EntityManager;
    use crate::partition::{
        ChunkRegistry, Frustum, GridPartition, OutOfBoundsPolicy, Partition, VoidPartition,
    };
    use crate::query::{par_for_each_chunk, Query};
    use crate::service::ServiceLocator;
    use crate::system::System;
    use glam::Vec3;
    use smallvec::{smallvec, SmallVec};
    use std::sync::Arc;

    // 128 bytes per row so a chunk holds 128 entities.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Counter {
        value: u64,
        _pad: [u8; 120],
    }
    impl Component for Counter {}

    impl Counter {
        fn new(value: u64) -> Self {
            Self {
                value,
                _pad: [0; 120],
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Spot {
        x: f32,
        y: f32,
    }
    impl Component for Spot {}

    #[derive(Debug, Clone, PartialEq)]
    struct Sticker(String);
    impl Component for Sticker {
        const SPARSE: bool = true;
    }

    // Stored as two sub-columns sharing the chunk row capacity.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct SoaPoint {
        x: f32,
        w: f64,
    }
    impl Component for SoaPoint {
        const SOA: bool = true;

        fn fields() -> SmallVec<[FieldLayout; 4]> {
            smallvec![FieldLayout::of::<f32>(), FieldLayout::of::<f64>()]
        }

        unsafe fn write_into(self, base: *mut u8, cols: &[ColumnInfo], row: usize) {
            std::ptr::write(base.add(cols[0].offset).cast::<f32>().add(row), self.x);
            std::ptr::write(base.add(cols[1].offset).cast::<f64>().add(row), self.w);
        }

        unsafe fn read_from(base: *const u8, cols: &[ColumnInfo], row: usize) -> Self {
            Self {
                x: std::ptr::read(base.add(cols[0].offset).cast::<f32>().add(row)),
                w: std::ptr::read(base.add(cols[1].offset).cast::<f64>().add(row)),
            }
        }
    }

    fn setup() {
        register::<Counter>();
        register::<Spot>();
        register::<Sticker>();
        register::<SoaPoint>();
    }

    struct IncrementSystem;

    impl System<VoidPartition> for IncrementSystem {
        fn name(&self) -> &str {
            "increment"
        }

        fn access(&self) -> AccessSpec {
            AccessSpec::of::<(Write<Counter>,)>()
        }

        fn parallel_update(&self) -> bool {
            true
        }

        fn update(
            &mut self,
            partition: &VoidPartition,
            _ctx: &LevelContext,
            _services: &ServiceLocator,
            executor: Option<&dyn Executor>,
        ) -> Result<()> {
            let chunks = Query::new()
                .with::<Counter>()
                .matching_chunks(partition.global_manager());
            par_for_each_chunk(&chunks, executor, self.parallel_update(), |chunk| {
                // SAFETY: this system declares Write<Counter>; the scheduler
                // guarantees no concurrent access to the column.
                let column = unsafe { chunk.column_mut::<Counter>() }.expect("column present");
                for counter in column {
                    counter.value += 1;
                }
                Ok(())
            })
        }
    }

    #[test]
    fn parallel_chunk_iteration_increments_every_entity() {
        setup();
        let registry = Arc::new(ChunkRegistry::new());
        let mut level = Level::new("bench", Arc::clone(&registry), VoidPartition::new());
        let services = ServiceLocator::new();
        let pool = ThreadPoolExecutor::with_threads(4);

        let chunk_capacity = {
            level.spawn_global((Counter::new(1),)).unwrap();
            Query::new()
                .with::<Counter>()
                .matching_chunks(level.partition().global_manager())[0]
                .capacity()
        };
        let total = chunk_capacity * 40;
        for _ in 1..total {
            level.spawn_global((Counter::new(1),)).unwrap();
        }

        level.add_system(Box::new(IncrementSystem), &services);
        level.update(&services, 0.016, Some(&pool)).unwrap();

        let chunks = Query::new()
            .with::<Counter>()
            .matching_chunks(level.partition().global_manager());
        assert!(chunks.len() >= 40);
        let mut seen = 0;
        for chunk in &chunks {
            for counter in chunk.column::<Counter>().unwrap() {
                assert_eq!(counter.value, 2);
                seen += 1;
            }
        }
        assert_eq!(seen, total);
    }

    struct DriftSystem;

    impl System<GridPartition> for DriftSystem {
        fn name(&self) -> &str {
            "drift"
        }

        fn access(&self) -> AccessSpec {
            AccessSpec::of::<(Write<Spot>,)>()
        }

        fn update(
            &mut self,
            partition: &GridPartition,
            ctx: &LevelContext,
            services: &ServiceLocator,
            _executor: Option<&dyn Executor>,
        ) -> Result<()> {
            let registry = services
                .get::<Arc<ChunkRegistry>>()
                .expect("chunk registry service");
            let mut batch = ctx.mover.local_batch();

            for cell in partition.cull_chunks(&Frustum::everything()) {
                let src_key = cell.key();
                let chunks = Query::new().with::<Spot>().matching_chunks(cell.entity_manager());
                for chunk in chunks {
                    let ids = chunk.entities().to_vec();
                    for (row, id) in ids.iter().enumerate() {
                        let mut spot = chunk.read::<Spot>(row).expect("spot present");
                        spot.x += 10.0;
                        chunk.write(row, spot);

                        let new_pos = Vec3::new(spot.x, spot.y, 0.0);
                        if let Some(dst) = partition.chunk_at(
                            new_pos,
                            registry,
                            ctx.id(),
                            OutOfBoundsPolicy::ClampToEdge,
                        ) {
                            if dst.key() != src_key {
                                batch.add(*id, src_key, dst.key());
                            }
                        }
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn deferred_move_crosses_cells_at_end_of_frame() {
        setup();
        let registry = Arc::new(ChunkRegistry::new());
        let mut level = Level::new(
            "scroller",
            Arc::clone(&registry),
            GridPartition::new(2, 1, 10.0),
        );
        let mut services = ServiceLocator::new();
        services.insert(Arc::clone(&registry));

        let id = level
            .spawn_at(
                Vec3::new(5.0, 5.0, 0.0),
                (Spot { x: 5.0, y: 5.0 }, Sticker("wanderer".into())),
            )
            .unwrap();

        let k1 = level
            .get_chunk(Vec3::new(5.0, 5.0, 0.0), OutOfBoundsPolicy::Reject)
            .unwrap();
        let k2 = level
            .get_chunk(Vec3::new(15.0, 5.0, 0.0), OutOfBoundsPolicy::Reject)
            .unwrap();
        assert!(k1.entity_manager().all_ids().contains(&id));

        level.add_system(Box::new(DriftSystem), &services);
        level.update(&services, 0.016, None).unwrap();

        // The frame's flush moved the entity, dense row and sparse entry.
        assert!(!k1.entity_manager().all_ids().contains(&id));
        assert!(k2.entity_manager().all_ids().contains(&id));
        assert_eq!(
            k2.entity_manager().get::<Spot>(id),
            Some(Spot { x: 15.0, y: 5.0 })
        );
        assert!(k2.entity_manager().has::<Sticker>(id));
        assert!(!k1.entity_manager().has::<Sticker>(id));
    }

    #[test]
    fn destroy_of_fresh_entity_is_unobservable() {
        setup();
        let em = EntityManager::new();
        let count_before = em.entity_count();
        let id = em.add_entity((Spot { x: 0.0, y: 0.0 },)).unwrap();
        em.destroy(id);
        em.destroy(id); // idempotent
        assert_eq!(em.entity_count(), count_before);
        assert!(!em.is_alive(id));
        assert!(em.mask_of(id).is_empty());
    }

    #[test]
    fn soa_component_round_trips_through_transition() {
        setup();
        let em = EntityManager::new();
        let p = SoaPoint { x: 1.5, w: -2.25 };
        let id = em.add_entity((p,)).unwrap();
        assert_eq!(em.get::<SoaPoint>(id), Some(p));

        // Transition into a wider archetype keeps each sub-column intact.
        em.add_component(id, Spot { x: 9.0, y: 9.0 }).unwrap();
        assert_eq!(em.get::<SoaPoint>(id), Some(p));
        assert_eq!(em.get::<Spot>(id), Some(Spot { x: 9.0, y: 9.0 }));

        em.remove_component::<Spot>(id).unwrap();
        assert_eq!(em.get::<SoaPoint>(id), Some(p));
    }

    #[test]
    fn sparse_only_entity_has_no_dense_location() {
        setup();
        let em = EntityManager::new();
        let id = em.add_entity((Sticker("ghost".into()),)).unwrap();
        assert!(em.location_of(id).is_none());
        assert!(em.mask_of(id).is_empty());
        assert!(em.has::<Sticker>(id));
        em.destroy(id);
        assert!(!em.has::<Sticker>(id));
    }
}
