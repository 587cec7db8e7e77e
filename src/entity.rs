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

//! Entity identifiers and location metadata.

use std::ptr::NonNull;

use crate::archetype::ArchetypeChunk;

/// Generational entity identifier. Valid iff the allocator's live generation
/// for `index` equals `generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub index: u32,
    pub generation: u32,
}

impl EntityId {
    /// Sentinel returned when the ID pool is exhausted.
    pub const INVALID: EntityId = EntityId {
        index: u32::MAX,
        generation: u32::MAX,
    };

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Entity location in chunk storage (chunk, row)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub chunk: NonNull<ArchetypeChunk>,
    pub row: usize,
}

// Chunk pointers are owned by the manager's append-only archetype storage;
// access is serialized by the manager's locks.
unsafe impl Send for EntityLocation {}
unsafe impl Sync for EntityLocation {}
