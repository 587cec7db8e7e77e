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

//! Spatial ECS - data-oriented entity runtime
//!
//! Archetype storage in fixed-size columnar chunks, a lock-free generational
//! ID allocator, a conflict-aware parallel system scheduler, and spatial
//! partition routing with deferred cross-chunk entity migration.

pub mod access;
pub mod allocator;
pub mod archetype;
pub mod component;
pub mod entity;
pub mod error;
pub mod executor;
pub mod layout;
pub mod level;
pub mod manager;
pub mod mask;
pub mod motion;
pub mod mover;
pub mod partition;
pub mod query;
pub mod schedule;
pub mod service;
pub mod sparse;
pub mod system;
pub mod utils;

// Re-exports for convenience
pub use access::{AccessSpec, Read, Write};
pub use allocator::{allocator, EntityIdAllocator, MAX_ENTITIES};
pub use archetype::{Archetype, ArchetypeChunk};
pub use component::{register, Component, ComponentSet, ComponentTypeId, FieldLayout};
pub use entity::{EntityId, EntityLocation};
pub use error::{EcsError, Result};
pub use executor::{CountDownLatch, Executor, ThreadPoolExecutor};
pub use layout::{ChunkLayout, CHUNK_SIZE_BYTES};
pub use level::{Level, LevelContext, LevelState};
pub use manager::EntityManager;
pub use mask::ComponentMask;
pub use motion::{ChunkHandle, SettleRule, SpatialMotionTag, SpatialState};
pub use mover::{BudgetMover, LocalBatch, PendingMove};
pub use partition::{
    Aabb, ChunkRegistry, Frustum, GridPartition, LevelId, OutOfBoundsPolicy, Partition,
    SpatialChunk, SpatialChunkKey, VoidPartition,
};
pub use query::{par_for_each_chunk, ChunkRef, Query};
pub use schedule::SystemScheduler;
pub use service::ServiceLocator;
pub use system::{BoxedSystem, System};

#[cfg(feature = "parallel")]
pub use executor::RayonExecutor;

pub mod prelude;

#[cfg(test)]
mod tests;
