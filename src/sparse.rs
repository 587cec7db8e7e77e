//! Keyed stores for sparse components.
//!
//! Sparse components never enter chunk columns; each registered sparse type
//! gets one mutex-guarded map per entity manager, created lazily on first
//! use. Bulk moves between managers lock both sides briefly.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::component::Component;
use crate::entity::EntityId;
use crate::manager::EntityManager;

/// Map of `EntityId -> T` for one sparse component type.
pub struct SparseComponentStore<T: Component> {
    components: Mutex<AHashMap<EntityId, T>>,
}

impl<T: Component> Default for SparseComponentStore<T> {
    fn default() -> Self {
        Self {
            components: Mutex::new(AHashMap::new()),
        }
    }
}

impl<T: Component> SparseComponentStore<T> {
    pub fn insert(&self, id: EntityId, value: T) {
        self.components.lock().insert(id, value);
    }

    pub fn has(&self, id: EntityId) -> bool {
        self.components.lock().contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<T>
    where
        T: Clone,
    {
        self.components.lock().get(&id).cloned()
    }

    /// Borrow the value for `id` under the store lock.
    pub fn with<R>(&self, id: EntityId, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.components.lock().get(&id).map(f)
    }

    /// Mutably borrow the value for `id` under the store lock.
    pub fn with_mut<R>(&self, id: EntityId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.components.lock().get_mut(&id).map(f)
    }

    pub fn remove(&self, id: EntityId) -> Option<T> {
        self.components.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.components.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.lock().is_empty()
    }

    pub fn for_each(&self, mut f: impl FnMut(EntityId, &T)) {
        for (id, value) in self.components.lock().iter() {
            f(*id, value);
        }
    }

    pub fn for_each_mut(&self, mut f: impl FnMut(EntityId, &mut T)) {
        for (id, value) in self.components.lock().iter_mut() {
            f(*id, value);
        }
    }

    /// Snapshot of the keys, ascending. Built once per frame by callers that
    /// merge-join sparse data onto dense chunk iteration.
    pub fn sorted_keys(&self) -> Vec<EntityId> {
        let mut keys: Vec<_> = self.components.lock().keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

/// Type-erased sparse store surface used by the entity manager for
/// whole-entity operations.
pub(crate) trait ErasedSparseStore: Send + Sync {
    fn remove_erased(&self, id: EntityId);
    fn has_erased(&self, id: EntityId) -> bool;
    fn move_all_to(&self, dst: &EntityManager);
    fn move_many_to(&self, dst: &EntityManager, ids: &[EntityId]);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Component> ErasedSparseStore for SparseComponentStore<T> {
    fn remove_erased(&self, id: EntityId) {
        self.remove(id);
    }

    fn has_erased(&self, id: EntityId) -> bool {
        self.has(id)
    }

    fn move_all_to(&self, dst: &EntityManager) {
        let dst_store = dst.sparse_store::<T>();
        let mut src = self.components.lock();
        let mut dst_map = dst_store.typed().components.lock();
        dst_map.reserve(src.len());
        for (id, value) in src.drain() {
            dst_map.insert(id, value);
        }
    }

    fn move_many_to(&self, dst: &EntityManager, ids: &[EntityId]) {
        let dst_store = dst.sparse_store::<T>();
        let mut src = self.components.lock();
        let mut dst_map = dst_store.typed().components.lock();
        dst_map.reserve(ids.len());
        for id in ids {
            if let Some(value) = src.remove(id) {
                dst_map.insert(*id, value);
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Typed handle to a manager's sparse store for `T`.
pub struct SparseHandle<T: Component> {
    store: Arc<dyn ErasedSparseStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> SparseHandle<T> {
    pub(crate) fn new(store: Arc<dyn ErasedSparseStore>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    fn typed(&self) -> &SparseComponentStore<T> {
        self.store
            .as_any()
            .downcast_ref()
            .expect("sparse store type mismatch")
    }

    pub fn insert(&self, id: EntityId, value: T) {
        self.typed().insert(id, value);
    }

    pub fn has(&self, id: EntityId) -> bool {
        self.typed().has(id)
    }

    pub fn get(&self, id: EntityId) -> Option<T>
    where
        T: Clone,
    {
        self.typed().get(id)
    }

    pub fn with<R>(&self, id: EntityId, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.typed().with(id, f)
    }

    pub fn with_mut<R>(&self, id: EntityId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.typed().with_mut(id, f)
    }

    pub fn remove(&self, id: EntityId) -> Option<T> {
        self.typed().remove(id)
    }

    pub fn len(&self) -> usize {
        self.typed().len()
    }

    pub fn is_empty(&self) -> bool {
        self.typed().is_empty()
    }

    pub fn for_each(&self, f: impl FnMut(EntityId, &T)) {
        self.typed().for_each(f)
    }

    pub fn for_each_mut(&self, f: impl FnMut(EntityId, &mut T)) {
        self.typed().for_each_mut(f)
    }

    pub fn sorted_keys(&self) -> Vec<EntityId> {
        self.typed().sorted_keys()
    }
}

/// Two-pointer merge of a chunk's entity IDs against sorted sparse keys:
/// calls `f(row, id)` for every row whose entity also has the sparse entry.
/// Both inputs must be sorted ascending.
pub fn merge_join_rows(
    chunk_ids: &[EntityId],
    sorted_keys: &[EntityId],
    mut f: impl FnMut(usize, EntityId),
) -> usize {
    let (mut i, mut j, mut hits) = (0, 0, 0);
    while i < chunk_ids.len() && j < sorted_keys.len() {
        match chunk_ids[i].cmp(&sorted_keys[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                f(i, chunk_ids[i]);
                hits += 1;
                i += 1;
                j += 1;
            }
        }
    }
    hits
}
