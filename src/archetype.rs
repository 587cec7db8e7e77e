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

//! Archetype storage: fixed-size columnar chunks with swap-pop removal.

use std::cell::UnsafeCell;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::error;

use crate::component::{component_id_of, Component};
use crate::entity::EntityId;
use crate::error::Result;
use crate::layout::{layout_of, ChunkLayout, ColumnInfo, CHUNK_SIZE_BYTES};
use crate::mask::ComponentMask;

#[repr(align(64))]
struct ChunkBuf {
    bytes: UnsafeCell<[u8; CHUNK_SIZE_BYTES]>,
}

/// Fixed-size columnar chunk.
///
/// Rows `0..entity_count` are dense; row `i` of every column belongs to
/// `entities[i]`. Removal is swap-pop: the last row is byte-copied into the
/// vacated slot and the count decremented. The mask never changes after
/// construction.
pub struct ArchetypeChunk {
    buf: Box<ChunkBuf>,
    entity_count: usize,
    entities: Vec<EntityId>,
    mask: ComponentMask,
    layout: Arc<ChunkLayout>,
}

// Column bytes sit in an UnsafeCell so scheduler-governed systems can write
// them through shared references. Structural mutation (add/swap-pop) requires
// `&mut self` and runs under the owning manager's exclusive section.
unsafe impl Send for ArchetypeChunk {}
unsafe impl Sync for ArchetypeChunk {}

impl ArchetypeChunk {
    pub fn new(mask: ComponentMask) -> Result<Self> {
        let layout = layout_of(&mask)?;
        debug_assert!(layout.capacity > 0 || mask.is_empty());
        Ok(Self {
            buf: Box::new(ChunkBuf {
                bytes: UnsafeCell::new([0; CHUNK_SIZE_BYTES]),
            }),
            entity_count: 0,
            entities: vec![EntityId::INVALID; layout.capacity],
            mask,
            layout,
        })
    }

    pub fn mask(&self) -> &ComponentMask {
        &self.mask
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn is_full(&self) -> bool {
        self.entity_count >= self.layout.capacity
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// IDs of the occupied rows.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities[..self.entity_count]
    }

    /// Base pointer of the chunk buffer.
    pub fn base_ptr(&self) -> *mut u8 {
        self.buf.bytes.get().cast()
    }

    /// Sub-columns for a component type present in this chunk's mask.
    pub fn columns(&self, id: crate::component::ComponentTypeId) -> Option<&[ColumnInfo]> {
        self.layout.columns(id)
    }

    /// Append `id`, returning its row. Must not be called on a full chunk.
    pub fn add_entity(&mut self, id: EntityId) -> usize {
        debug_assert!(!self.is_full(), "add_entity on a full chunk");
        let row = self.entity_count;
        self.entities[row] = id;
        self.entity_count += 1;
        row
    }

    /// Remove row `row`, moving the last row's bytes into its place.
    ///
    /// The caller must, in the same critical section, re-bind the location of
    /// the entity that previously occupied the last row.
    pub fn remove_entity_swap_pop(&mut self, row: usize) {
        debug_assert!(row < self.entity_count);
        let last = self.entity_count - 1;
        if row < last {
            let base = self.base_ptr();
            for (_, cols) in self.layout.iter() {
                for col in cols {
                    // Trivially-copyable rows only; a byte copy is an exact move.
                    unsafe {
                        let src = base.add(col.offset + last * col.stride);
                        let dst = base.add(col.offset + row * col.stride);
                        std::ptr::copy_nonoverlapping(src, dst, col.stride);
                    }
                }
            }
            self.entities[row] = self.entities[last];
        }
        self.entities[last] = EntityId::INVALID;
        self.entity_count -= 1;
    }

    /// Write a component value into row `row`.
    pub fn write_component<T: Component>(&self, row: usize, value: T) {
        debug_assert!(row < self.layout.capacity);
        let id = component_id_of::<T>();
        let Some(cols) = self.layout.columns(id) else {
            error!(component = id, "component type not present in chunk layout");
            return;
        };
        unsafe { value.write_into(self.base_ptr(), cols, row) }
    }

    /// Read the component value at row `row`.
    pub fn read_component<T: Component + Copy>(&self, row: usize) -> Option<T> {
        debug_assert!(row < self.entity_count);
        let cols = self.layout.columns(component_id_of::<T>())?;
        Some(unsafe { T::read_from(self.base_ptr(), cols, row) })
    }

    /// Byte-copy every column of `src_row` into `dst_row` of `dst`, for each
    /// component present in both masks, optionally skipping one type.
    pub(crate) fn copy_row_to(
        &self,
        src_row: usize,
        dst: &ArchetypeChunk,
        dst_row: usize,
        skip: Option<crate::component::ComponentTypeId>,
    ) {
        let src_base = self.base_ptr();
        let dst_base = dst.base_ptr();
        for (id, src_cols) in self.layout.iter() {
            if skip == Some(id) {
                continue;
            }
            let Some(dst_cols) = dst.layout.columns(id) else {
                continue;
            };
            debug_assert_eq!(src_cols.len(), dst_cols.len());
            for (src_col, dst_col) in src_cols.iter().zip(dst_cols.iter()) {
                debug_assert_eq!(src_col.stride, dst_col.stride);
                unsafe {
                    let src = src_base.add(src_col.offset + src_row * src_col.stride);
                    let dst = dst_base.add(dst_col.offset + dst_row * dst_col.stride);
                    std::ptr::copy_nonoverlapping(src, dst, src_col.stride);
                }
            }
        }
    }
}

/// An archetype owns the chunks of one component mask. Chunks are appended
/// only, never reordered or reclaimed.
pub struct Archetype {
    mask: ComponentMask,
    chunks: Vec<Box<ArchetypeChunk>>,
}

impl Archetype {
    pub fn new(mask: ComponentMask) -> Self {
        Self {
            mask,
            chunks: Vec::new(),
        }
    }

    pub fn mask(&self) -> &ComponentMask {
        &self.mask
    }

    pub fn chunks(&self) -> &[Box<ArchetypeChunk>] {
        &self.chunks
    }

    /// First chunk with a free row, allocating a new one when all are full.
    pub fn get_or_create_chunk(&mut self) -> Result<&mut ArchetypeChunk> {
        let mut free = None;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if !chunk.is_full() {
                free = Some(i);
                break;
            }
        }
        let idx = match free {
            Some(i) => i,
            None => {
                self.chunks.push(Box::new(ArchetypeChunk::new(self.mask)?));
                self.chunks.len() - 1
            }
        };
        Ok(&mut self.chunks[idx])
    }

    pub fn entity_count(&self) -> usize {
        self.chunks.iter().map(|c| c.entity_count()).sum()
    }
}

/// Mask-keyed archetype table.
#[derive(Default)]
pub struct ArchetypeMap {
    archetypes: FxHashMap<ComponentMask, Box<Archetype>>,
}

impl ArchetypeMap {
    pub fn get_or_create(&mut self, mask: &ComponentMask) -> &mut Archetype {
        self.archetypes
            .entry(*mask)
            .or_insert_with(|| Box::new(Archetype::new(*mask)))
    }

    pub fn get(&self, mask: &ComponentMask) -> Option<&Archetype> {
        self.archetypes.get(mask).map(|a| a.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.values().map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }
}
