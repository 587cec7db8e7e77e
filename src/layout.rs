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

//! Chunk layout derivation and the process-wide layout registry.
//!
//! A layout is derived deterministically from a component mask: columns are
//! laid out in ascending type-ID order, each sub-column aligned to its field
//! alignment, and the row capacity is the largest count that fits the fixed
//! chunk byte budget. A derived layout never changes; lookups return a shared
//! handle with a stable address.

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::error;

use crate::component::{self, ComponentTypeId};
use crate::error::{EcsError, Result};
use crate::mask::ComponentMask;
use crate::utils::align_to;

/// Fixed chunk byte budget.
pub const CHUNK_SIZE_BYTES: usize = 16 * 1024;

/// One sub-column within a chunk buffer: byte offset of the column start and
/// the per-row stride (the sub-field's size).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInfo {
    pub offset: usize,
    pub stride: usize,
}

/// Derived layout for one mask.
#[derive(Debug)]
pub struct ChunkLayout {
    /// Maximum rows that fit the chunk byte budget.
    pub capacity: usize,
    columns: FxHashMap<ComponentTypeId, SmallVec<[ColumnInfo; 4]>>,
}

impl ChunkLayout {
    /// Sub-columns for a component, one entry per sub-field.
    pub fn columns(&self, id: ComponentTypeId) -> Option<&[ColumnInfo]> {
        self.columns.get(&id).map(|c| c.as_slice())
    }

    /// IDs present in this layout.
    pub fn component_ids(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.columns.keys().copied()
    }

    /// All sub-columns, keyed by component type.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentTypeId, &[ColumnInfo])> {
        self.columns.iter().map(|(id, cols)| (*id, cols.as_slice()))
    }
}

struct Entry {
    id: ComponentTypeId,
    meta: component::ComponentMeta,
}

fn collect_entries(mask: &ComponentMask) -> Result<(Vec<Entry>, bool)> {
    let mut entries = Vec::with_capacity(mask.count());
    let mut has_soa = false;
    for id in mask.ones() {
        let Some(meta) = component::meta(id) else {
            error!(component = id, "layout requested for unregistered component type");
            return Err(EcsError::UnknownComponentType(id));
        };
        if meta.is_sparse {
            continue;
        }
        has_soa |= meta.is_soa;
        entries.push(Entry { id, meta });
    }
    Ok((entries, has_soa))
}

/// Total bytes needed to store `count` rows of every sub-column, aligned.
fn total_size(entries: &[Entry], count: usize) -> usize {
    let mut offset = 0;
    for e in entries {
        for f in &e.meta.structure {
            offset = align_to(offset, f.align);
            offset += f.size * count;
        }
    }
    offset
}

fn derive(mask: &ComponentMask) -> Result<ChunkLayout> {
    let (entries, has_soa) = collect_entries(mask)?;

    let capacity = if has_soa {
        // Largest k whose aligned sub-column sum still fits.
        let (mut low, mut high) = (0usize, CHUNK_SIZE_BYTES);
        while low < high {
            let mid = (low + high + 1) / 2;
            if total_size(&entries, mid) <= CHUNK_SIZE_BYTES {
                low = mid;
            } else {
                high = mid - 1;
            }
        }
        low
    } else {
        let per_row: usize = entries
            .iter()
            .flat_map(|e| e.meta.structure.iter())
            .map(|f| f.size)
            .sum();
        if per_row == 0 {
            0
        } else {
            // Division ignores alignment padding; back off until it fits.
            let mut cap = CHUNK_SIZE_BYTES / per_row;
            while cap > 0 && total_size(&entries, cap) > CHUNK_SIZE_BYTES {
                cap -= 1;
            }
            cap
        }
    };

    if capacity == 0 && !entries.is_empty() {
        error!("component mask oversubscribes the {CHUNK_SIZE_BYTES}-byte chunk budget");
        return Err(EcsError::LayoutOversubscribed);
    }

    let mut columns = FxHashMap::default();
    let mut offset = 0;
    for e in &entries {
        let mut infos: SmallVec<[ColumnInfo; 4]> = SmallVec::new();
        for f in &e.meta.structure {
            offset = align_to(offset, f.align);
            infos.push(ColumnInfo {
                offset,
                stride: f.size,
            });
            offset += f.size * capacity;
        }
        columns.insert(e.id, infos);
    }

    Ok(ChunkLayout { capacity, columns })
}

static LAYOUTS: LazyLock<RwLock<FxHashMap<ComponentMask, Arc<ChunkLayout>>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

/// Derives and caches the layout for `mask`. The returned handle is shared;
/// the same mask always resolves to the same layout.
pub fn layout_of(mask: &ComponentMask) -> Result<Arc<ChunkLayout>> {
    {
        let layouts = LAYOUTS.read();
        if let Some(layout) = layouts.get(mask) {
            return Ok(Arc::clone(layout));
        }
    }
    let derived = Arc::new(derive(mask)?);
    let mut layouts = LAYOUTS.write();
    // First writer wins; a racing derivation produced an identical layout.
    let layout = layouts
        .entry(*mask)
        .or_insert(derived);
    Ok(Arc::clone(layout))
}
