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

//! Entity manager: the transactional facade over archetype storage.
//!
//! Creates, destroys and mutates entities; routes sparse components to keyed
//! stores; performs archetype transitions on component add/remove; supports
//! bulk moves between managers with IDs preserved.
//!
//! Locking: the location map is guarded by a reader-writer lock. Readers take
//! shared locks; structural mutations reserve rows and copy columns outside
//! the exclusive section, then acquire the structural and location locks
//! (always in that order) only for the swap-pop and re-binding step.

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::allocator::allocator;
use crate::archetype::{ArchetypeChunk, ArchetypeMap};
use crate::component::{component_id_of, Component, ComponentSet, ComponentTypeId};
use crate::entity::{EntityId, EntityLocation};
use crate::error::{EcsError, Result};
use crate::mask::ComponentMask;
use crate::sparse::{ErasedSparseStore, SparseComponentStore, SparseHandle};

#[derive(Default)]
pub struct EntityManager {
    /// Mask-keyed archetype storage. The write lock doubles as the manager's
    /// structural section: all chunk row mutation happens under it.
    archetypes: RwLock<ArchetypeMap>,
    /// EntityId -> (chunk, row) for every entity with at least one dense
    /// component. Sparse-only entities have no entry.
    locations: RwLock<FxHashMap<EntityId, EntityLocation>>,
    /// Lazily created per-type sparse stores.
    sparse: RwLock<FxHashMap<ComponentTypeId, Arc<dyn ErasedSparseStore>>>,
}

impl EntityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity from a component pack; the mask is the OR of the
    /// pack's dense members.
    pub fn add_entity<B: ComponentSet>(&self, set: B) -> Result<EntityId> {
        self.add_entity_with_mask(B::mask(), set)
    }

    /// Create an entity with an explicit mask, which must be a superset of
    /// the pack's dense members.
    pub fn add_entity_with_mask<B: ComponentSet>(
        &self,
        mask: ComponentMask,
        set: B,
    ) -> Result<EntityId> {
        debug_assert!(mask.is_superset(&B::mask()));

        let id = allocator().create();
        if !id.is_valid() {
            return Err(EcsError::IdExhausted);
        }

        if mask.any() {
            let (chunk, row) = match self.reserve_row(&mask, id) {
                Ok(r) => r,
                Err(e) => {
                    allocator().destroy(id);
                    return Err(e);
                }
            };
            set.store(self, Some(unsafe { chunk.as_ref() }), row, id);
            self.locations
                .write()
                .insert(id, EntityLocation { chunk, row });
        } else {
            set.store(self, None, 0, id);
        }
        Ok(id)
    }

    /// Destroy `id`: swap-pop its dense row, purge its sparse entries, bump
    /// its generation. Idempotent for IDs that are no longer alive.
    pub fn destroy(&self, id: EntityId) {
        if !allocator().is_alive(id) {
            return;
        }

        let stores: Vec<_> = self.sparse.read().values().cloned().collect();
        for store in &stores {
            store.remove_erased(id);
        }

        self.erase_local(id);
        allocator().destroy(id);
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        allocator().is_alive(id)
    }

    /// Dense: mask test; sparse: store membership.
    pub fn has<T: Component>(&self, id: EntityId) -> bool {
        if T::SPARSE {
            return self
                .existing_sparse::<T>()
                .is_some_and(|store| store.has(id));
        }
        let tid = component_id_of::<T>();
        let locations = self.locations.read();
        match locations.get(&id) {
            Some(loc) => unsafe { loc.chunk.as_ref() }.mask().test(tid),
            None => false,
        }
    }

    /// Copy the component value out. For non-`Copy` sparse components use
    /// [`EntityManager::with_sparse`].
    pub fn get<T: Component + Copy>(&self, id: EntityId) -> Option<T> {
        if T::SPARSE {
            return self.existing_sparse::<T>()?.get(id);
        }
        let locations = self.locations.read();
        let loc = locations.get(&id)?;
        unsafe { loc.chunk.as_ref() }.read_component::<T>(loc.row)
    }

    /// Borrow a sparse component under its store lock.
    pub fn with_sparse<T: Component, R>(
        &self,
        id: EntityId,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        self.existing_sparse::<T>()?.with(id, f)
    }

    /// Mutably borrow a sparse component under its store lock.
    pub fn with_sparse_mut<T: Component, R>(
        &self,
        id: EntityId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        self.existing_sparse::<T>()?.with_mut(id, f)
    }

    /// Add a component. Dense types trigger an archetype transition; a dense
    /// type the entity already holds is overwritten in place. No-op for IDs
    /// that are not alive.
    pub fn add_component<T: Component>(&self, id: EntityId, value: T) -> Result<()> {
        if T::SPARSE {
            if allocator().is_alive(id) {
                self.sparse_store::<T>().insert(id, value);
            }
            return Ok(());
        }
        if !allocator().is_alive(id) {
            return Ok(());
        }

        let tid = component_id_of::<T>();
        let old = { self.locations.read().get(&id).copied() };
        match old {
            None => {
                // First dense component of a live entity.
                let mask = ComponentMask::EMPTY.with(tid);
                let (chunk, row) = self.reserve_row(&mask, id)?;
                unsafe { chunk.as_ref() }.write_component(row, value);
                self.locations
                    .write()
                    .insert(id, EntityLocation { chunk, row });
            }
            Some(old) => {
                let old_chunk = unsafe { old.chunk.as_ref() };
                let old_mask = *old_chunk.mask();
                if old_mask.test(tid) {
                    old_chunk.write_component(old.row, value);
                    return Ok(());
                }
                let new_mask = old_mask.with(tid);
                let (new_chunk, new_row) = self.reserve_row(&new_mask, id)?;
                // Heavy column copy outside the exclusive section.
                old_chunk.copy_row_to(old.row, unsafe { new_chunk.as_ref() }, new_row, None);
                unsafe { new_chunk.as_ref() }.write_component(new_row, value);
                self.rebind_after_transition(id, old, new_chunk, new_row);
            }
        }
        Ok(())
    }

    /// Remove a component. Dense types trigger an archetype transition;
    /// removing the last dense component leaves a live, location-less entity.
    /// No-op when the entity does not hold the component.
    pub fn remove_component<T: Component>(&self, id: EntityId) -> Result<()> {
        if T::SPARSE {
            if let Some(store) = self.existing_sparse::<T>() {
                store.remove(id);
            }
            return Ok(());
        }

        let tid = component_id_of::<T>();
        let Some(old) = ({ self.locations.read().get(&id).copied() }) else {
            return Ok(());
        };
        let old_chunk = unsafe { old.chunk.as_ref() };
        let old_mask = *old_chunk.mask();
        if !old_mask.test(tid) {
            return Ok(());
        }

        let new_mask = old_mask.without(tid);
        if new_mask.is_empty() {
            self.erase_local(id);
            return Ok(());
        }

        let (new_chunk, new_row) = self.reserve_row(&new_mask, id)?;
        old_chunk.copy_row_to(old.row, unsafe { new_chunk.as_ref() }, new_row, Some(tid));
        self.rebind_after_transition(id, old, new_chunk, new_row);
        Ok(())
    }

    /// The entity's dense component mask; empty for sparse-only entities.
    pub fn mask_of(&self, id: EntityId) -> ComponentMask {
        let locations = self.locations.read();
        match locations.get(&id) {
            Some(loc) => *unsafe { loc.chunk.as_ref() }.mask(),
            None => ComponentMask::EMPTY,
        }
    }

    /// O(1) location lookup under a shared lock.
    pub fn location_of(&self, id: EntityId) -> Option<EntityLocation> {
        self.locations.read().get(&id).copied()
    }

    /// Number of entities with a dense row in this manager.
    pub fn entity_count(&self) -> usize {
        self.locations.read().len()
    }

    /// Snapshot of every ID present in the location map or any chunk.
    pub fn all_ids(&self) -> Vec<EntityId> {
        let mut set: FxHashSet<EntityId> = self.locations.read().keys().copied().collect();
        let archetypes = self.archetypes.read();
        for arch in archetypes.iter() {
            for chunk in arch.chunks() {
                set.extend(chunk.entities().iter().copied());
            }
        }
        set.into_iter().collect()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.read().len()
    }

    /// Reserve a row in `dst` for `id` and copy all dense columns from `src`,
    /// preserving the ID. The ID must be alive, present in `src` and absent
    /// from `dst`. The source row is erased locally; sparse entries and the
    /// allocator are untouched.
    pub fn insert_with_id_for_manager_move(
        id: EntityId,
        src: &EntityManager,
        dst: &EntityManager,
    ) -> bool {
        if std::ptr::eq(src, dst) || !allocator().is_alive(id) {
            return false;
        }
        if dst.locations.read().contains_key(&id) {
            return false;
        }
        let Some(old) = src.locations.read().get(&id).copied() else {
            return false;
        };

        let old_chunk = unsafe { old.chunk.as_ref() };
        let mask = *old_chunk.mask();
        let Ok((new_chunk, new_row)) = dst.reserve_row(&mask, id) else {
            return false;
        };
        old_chunk.copy_row_to(old.row, unsafe { new_chunk.as_ref() }, new_row, None);
        dst.locations.write().insert(
            id,
            EntityLocation {
                chunk: new_chunk,
                row: new_row,
            },
        );
        src.erase_local(id);
        true
    }

    /// Move the listed IDs' entries of every sparse type to `dst`.
    pub fn move_sparse_ids_to(&self, dst: &EntityManager, ids: &[EntityId]) {
        let stores: Vec<_> = self.sparse.read().values().cloned().collect();
        for store in &stores {
            store.move_many_to(dst, ids);
        }
    }

    /// Merge every sparse store into `dst`.
    pub fn move_all_sparse_to(&self, dst: &EntityManager) {
        let stores: Vec<_> = self.sparse.read().values().cloned().collect();
        for store in &stores {
            store.move_all_to(dst);
        }
    }

    /// Absorb every entity of `src`: sparse stores first, then each dense row
    /// column-copied with its ID preserved. Returns the number moved.
    pub fn merge_from_all(&self, src: &EntityManager) -> usize {
        if std::ptr::eq(self, src) {
            return 0;
        }
        src.move_all_sparse_to(self);
        let mut moved = 0;
        for id in src.all_ids() {
            if Self::insert_with_id_for_manager_move(id, src, self) {
                moved += 1;
            }
        }
        moved
    }

    /// Route every entity through `router` and batch-move per destination.
    /// Returns the number moved; entities routed to `self` (or to nowhere)
    /// stay put.
    pub fn split_by_all<'a, F>(&self, router: F) -> usize
    where
        F: Fn(EntityId, &ComponentMask) -> Option<&'a EntityManager>,
    {
        let mut buckets: FxHashMap<usize, (&EntityManager, Vec<EntityId>)> = FxHashMap::default();
        let mut moved = 0;
        for id in self.all_ids() {
            let Some(loc) = self.location_of(id) else {
                continue;
            };
            let mask = *unsafe { loc.chunk.as_ref() }.mask();
            let Some(dst) = router(id, &mask) else {
                continue;
            };
            if std::ptr::eq(dst, self) {
                continue;
            }
            if Self::insert_with_id_for_manager_move(id, self, dst) {
                buckets
                    .entry(dst as *const EntityManager as usize)
                    .or_insert_with(|| (dst, Vec::new()))
                    .1
                    .push(id);
                moved += 1;
            }
        }
        for (_, (dst, ids)) in buckets {
            self.move_sparse_ids_to(dst, &ids);
        }
        moved
    }

    /// The manager's store for sparse type `T`, created on first use.
    pub fn sparse_store<T: Component>(&self) -> SparseHandle<T> {
        let tid = component_id_of::<T>();
        {
            let map = self.sparse.read();
            if let Some(store) = map.get(&tid) {
                return SparseHandle::new(Arc::clone(store));
            }
        }
        let mut map = self.sparse.write();
        let store = map.entry(tid).or_insert_with(|| {
            Arc::new(SparseComponentStore::<T>::default()) as Arc<dyn ErasedSparseStore>
        });
        SparseHandle::new(Arc::clone(store))
    }

    /// Chunks of every archetype matching `(required, excluded)`.
    pub(crate) fn matching_chunks(
        &self,
        required: &ComponentMask,
        excluded: &ComponentMask,
        out: &mut Vec<crate::query::ChunkRef>,
    ) {
        let archetypes = self.archetypes.read();
        for arch in archetypes.iter() {
            let mask = arch.mask();
            if mask.is_superset(required) && !mask.intersects(excluded) {
                for chunk in arch.chunks() {
                    out.push(crate::query::ChunkRef::new(NonNull::from(&**chunk)));
                }
            }
        }
    }

    fn existing_sparse<T: Component>(&self) -> Option<SparseHandle<T>> {
        let tid = component_id_of::<T>();
        self.sparse
            .read()
            .get(&tid)
            .map(|store| SparseHandle::new(Arc::clone(store)))
    }

    /// Reserve a row for `id` in the archetype for `mask` under the
    /// structural lock. The returned chunk pointer is stable: chunks are
    /// boxed and never reclaimed.
    fn reserve_row(
        &self,
        mask: &ComponentMask,
        id: EntityId,
    ) -> Result<(NonNull<ArchetypeChunk>, usize)> {
        let mut archetypes = self.archetypes.write();
        let arch = archetypes.get_or_create(mask);
        let chunk = arch.get_or_create_chunk()?;
        let row = chunk.add_entity(id);
        Ok((NonNull::from(&mut *chunk), row))
    }

    /// Swap-pop the entity's current row and drop its location entry,
    /// re-binding the displaced neighbour in the same critical section.
    /// Sparse entries and the allocator are untouched.
    fn erase_local(&self, id: EntityId) -> bool {
        let _structural = self.archetypes.write();
        let mut locations = self.locations.write();
        let Some(loc) = locations.remove(&id) else {
            return false;
        };
        let chunk = unsafe { &mut *loc.chunk.as_ptr() };
        let last = chunk.entity_count() - 1;
        if loc.row < last {
            let swapped = chunk.entities()[last];
            if let Some(entry) = locations.get_mut(&swapped) {
                *entry = EntityLocation {
                    chunk: loc.chunk,
                    row: loc.row,
                };
            }
        }
        chunk.remove_entity_swap_pop(loc.row);
        true
    }

    /// Final re-binding step of an archetype transition.
    fn rebind_after_transition(
        &self,
        id: EntityId,
        old: EntityLocation,
        new_chunk: NonNull<ArchetypeChunk>,
        new_row: usize,
    ) {
        let _structural = self.archetypes.write();
        let mut locations = self.locations.write();
        let old_chunk = unsafe { &mut *old.chunk.as_ptr() };
        let last = old_chunk.entity_count() - 1;
        if old.row < last {
            let swapped = old_chunk.entities()[last];
            if let Some(entry) = locations.get_mut(&swapped) {
                *entry = EntityLocation {
                    chunk: old.chunk,
                    row: old.row,
                };
            }
        }
        old_chunk.remove_entity_swap_pop(old.row);
        locations.insert(
            id,
            EntityLocation {
                chunk: new_chunk,
                row: new_row,
            },
        );
    }
}
