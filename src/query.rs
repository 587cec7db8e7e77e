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

//! Mask-based chunk queries and column views.
//!
//! A query matches every archetype whose mask contains all `with` components
//! and none of the `without` components, and yields its chunks. Views borrow
//! columns for the duration of the query; chunks never point back at their
//! manager.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::archetype::ArchetypeChunk;
use crate::component::{component_id_of, Component};
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::executor::{run_indexed, Executor};
use crate::manager::EntityManager;
use crate::mask::ComponentMask;

/// Chunks handed to one parallel task.
pub const CHUNKS_PER_TASK: usize = 16;

/// Chunk filter over dense component types.
#[derive(Debug, Clone, Copy, Default)]
pub struct Query {
    required: ComponentMask,
    excluded: ComponentMask,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require component `T`. Sparse types cannot appear in a query.
    pub fn with<T: Component>(mut self) -> Self {
        debug_assert!(!T::SPARSE, "sparse components cannot be queried by mask");
        self.required.set(component_id_of::<T>());
        self
    }

    /// Exclude component `T`.
    pub fn without<T: Component>(mut self) -> Self {
        debug_assert!(!T::SPARSE, "sparse components cannot be queried by mask");
        self.excluded.set(component_id_of::<T>());
        self
    }

    pub fn required(&self) -> &ComponentMask {
        &self.required
    }

    pub fn excluded(&self) -> &ComponentMask {
        &self.excluded
    }

    /// Chunks of `em` whose archetype matches this query.
    pub fn matching_chunks(&self, em: &EntityManager) -> Vec<ChunkRef> {
        let mut out = Vec::new();
        em.matching_chunks(&self.required, &self.excluded, &mut out);
        out
    }

    /// As [`Query::matching_chunks`], appending into a caller-owned vector.
    pub fn matching_chunks_into(&self, em: &EntityManager, out: &mut Vec<ChunkRef>) {
        em.matching_chunks(&self.required, &self.excluded, out);
    }
}

/// Borrowed view of one chunk.
///
/// Valid while the owning entity manager is alive; chunks are never
/// reclaimed, so a ref taken during a frame stays valid for that frame.
#[derive(Clone, Copy)]
pub struct ChunkRef {
    ptr: NonNull<ArchetypeChunk>,
}

// Shared across the scheduler's worker threads; column aliasing is governed
// by the declared-access batching.
unsafe impl Send for ChunkRef {}
unsafe impl Sync for ChunkRef {}

impl ChunkRef {
    pub(crate) fn new(ptr: NonNull<ArchetypeChunk>) -> Self {
        Self { ptr }
    }

    fn chunk(&self) -> &ArchetypeChunk {
        unsafe { self.ptr.as_ref() }
    }

    pub fn len(&self) -> usize {
        self.chunk().entity_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.chunk().capacity()
    }

    pub fn mask(&self) -> ComponentMask {
        *self.chunk().mask()
    }

    /// IDs of the occupied rows.
    pub fn entities(&self) -> &[EntityId] {
        self.chunk().entities()
    }

    /// Read-only column slice. `None` for absent or SoA-stored components.
    pub fn column<T: Component>(&self) -> Option<&[T]> {
        let chunk = self.chunk();
        let cols = chunk.columns(component_id_of::<T>())?;
        if cols.len() != 1 || cols[0].stride != std::mem::size_of::<T>() {
            return None;
        }
        let base = unsafe { chunk.base_ptr().add(cols[0].offset) }.cast::<T>();
        Some(unsafe { std::slice::from_raw_parts(base, chunk.entity_count()) })
    }

    /// Mutable column slice. `None` for absent or SoA-stored components.
    ///
    /// # Safety
    /// The caller must hold a `Write<T>` declaration for the running system
    /// (or otherwise guarantee no concurrent access to this column), and must
    /// not obtain two live mutable slices of the same column.
    pub unsafe fn column_mut<T: Component>(&self) -> Option<&mut [T]> {
        let chunk = self.chunk();
        let cols = chunk.columns(component_id_of::<T>())?;
        if cols.len() != 1 || cols[0].stride != std::mem::size_of::<T>() {
            return None;
        }
        let base = chunk.base_ptr().add(cols[0].offset).cast::<T>();
        Some(std::slice::from_raw_parts_mut(base, chunk.entity_count()))
    }

    /// Copy one component value out of row `row`. Works for SoA components.
    pub fn read<T: Component + Copy>(&self, row: usize) -> Option<T> {
        self.chunk().read_component::<T>(row)
    }

    /// Write one component value into row `row`. Works for SoA components.
    pub fn write<T: Component>(&self, row: usize, value: T) {
        self.chunk().write_component(row, value);
    }
}

/// Run `f` over every chunk, splitting into blocks of roughly
/// [`CHUNKS_PER_TASK`] on the executor when `parallel` is set. The first
/// error wins and is returned after all blocks have joined.
pub fn par_for_each_chunk<F>(
    chunks: &[ChunkRef],
    executor: Option<&dyn Executor>,
    parallel: bool,
    f: F,
) -> Result<()>
where
    F: Fn(ChunkRef) -> Result<()> + Sync,
{
    if chunks.is_empty() {
        return Ok(());
    }

    if !parallel || chunks.len() == 1 {
        for chunk in chunks {
            f(*chunk)?;
        }
        return Ok(());
    }

    let concurrency = executor.map(|e| e.concurrency()).unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    let tasks = chunks
        .len()
        .div_ceil(CHUNKS_PER_TASK)
        .clamp(1, concurrency.max(1));

    let first_err: Mutex<Option<EcsError>> = Mutex::new(None);
    run_indexed(executor, chunks.len(), tasks, &|i| {
        if let Err(e) = f(chunks[i]) {
            let mut slot = first_err.lock();
            if slot.is_none() {
                *slot = Some(e);
            }
        }
    });

    match first_err.into_inner() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
