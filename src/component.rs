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

//! Component trait and the process-wide component type registry.
//!
//! Every component type used in a mask must be registered once; registration
//! records size/alignment metadata (per sub-field for SoA components) under a
//! dense integer ID. ID assignment is deterministic within a run but not
//! across runs.

use std::any::TypeId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::layout::ColumnInfo;
use crate::mask::{ComponentMask, MAX_COMPONENT_TYPES};

/// Dense component type identifier, stable for the process lifetime.
pub type ComponentTypeId = u32;

/// Size/alignment of one stored sub-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub size: usize,
    pub align: usize,
}

impl FieldLayout {
    pub fn of<T>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        }
    }
}

/// A value type stored per entity.
///
/// Dense components (`SPARSE == false`) live in chunk columns and must be
/// `Copy`: relocation between rows and chunks is a byte-wise move. Sparse
/// components live in per-type keyed maps and may own heap data.
///
/// SoA components set `SOA`, list one [`FieldLayout`] per sub-field and
/// override the column codec to scatter/gather each sub-field into its own
/// sub-column.
pub trait Component: Send + Sync + 'static {
    const SPARSE: bool = false;
    const SOA: bool = false;

    /// Ordered sub-field layouts; length 1 for non-SoA components.
    fn fields() -> SmallVec<[FieldLayout; 4]>
    where
        Self: Sized,
    {
        smallvec![FieldLayout::of::<Self>()]
    }

    /// Write `self` into row `row` of the columns described by `cols`.
    ///
    /// # Safety
    /// `base` must be the chunk buffer holding the columns, `cols` the layout
    /// entries registered for this type, and `row` a reserved row.
    unsafe fn write_into(self, base: *mut u8, cols: &[ColumnInfo], row: usize)
    where
        Self: Sized,
    {
        debug_assert_eq!(cols.len(), 1);
        debug_assert_eq!(cols[0].stride, std::mem::size_of::<Self>());
        let dst = base.add(cols[0].offset).cast::<Self>().add(row);
        std::ptr::write(dst, self);
    }

    /// Read the value at row `row` out of the columns described by `cols`.
    ///
    /// # Safety
    /// Same requirements as [`Component::write_into`], and the row must hold
    /// an initialized value.
    unsafe fn read_from(base: *const u8, cols: &[ColumnInfo], row: usize) -> Self
    where
        Self: Sized,
    {
        debug_assert_eq!(cols.len(), 1);
        let src = base.add(cols[0].offset).cast::<Self>().add(row);
        std::ptr::read(src)
    }
}

/// Metadata recorded once per registered component type.
#[derive(Debug, Clone)]
pub struct ComponentMeta {
    pub structure: SmallVec<[FieldLayout; 4]>,
    pub is_sparse: bool,
    pub is_soa: bool,
}

struct RegistryInner {
    ids: FxHashMap<TypeId, ComponentTypeId>,
    meta: Vec<Option<ComponentMeta>>,
}

static NEXT_ID: AtomicU32 = AtomicU32::new(0);
static REGISTRY: LazyLock<RwLock<RegistryInner>> = LazyLock::new(|| {
    RwLock::new(RegistryInner {
        ids: FxHashMap::default(),
        meta: Vec::new(),
    })
});

/// Returns the type's dense ID, assigning the next integer on first call.
pub fn component_id_of<T: Component>() -> ComponentTypeId {
    let type_id = TypeId::of::<T>();
    {
        let reg = REGISTRY.read();
        if let Some(id) = reg.ids.get(&type_id) {
            return *id;
        }
    }
    let mut reg = REGISTRY.write();
    // Racing registration may have won the write lock first.
    if let Some(id) = reg.ids.get(&type_id) {
        return *id;
    }
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    assert!(
        (id as usize) < MAX_COMPONENT_TYPES,
        "component type id space exhausted"
    );
    reg.ids.insert(type_id, id);
    id
}

/// Records the type's metadata. Must be called before the type is used in a
/// mask; calling it again is a no-op.
pub fn register<T: Component>() -> ComponentTypeId {
    let id = component_id_of::<T>();
    let mut reg = REGISTRY.write();
    let idx = id as usize;
    if idx >= reg.meta.len() {
        reg.meta.resize(idx + 1, None);
    }
    if reg.meta[idx].is_none() {
        reg.meta[idx] = Some(ComponentMeta {
            structure: T::fields(),
            is_sparse: T::SPARSE,
            is_soa: T::SOA,
        });
    }
    id
}

/// Read-only metadata lookup. `None` means the type was never registered.
pub fn meta(id: ComponentTypeId) -> Option<ComponentMeta> {
    let reg = REGISTRY.read();
    reg.meta.get(id as usize).and_then(|m| m.clone())
}

/// Compile-time sparsity query.
pub const fn is_sparse<T: Component>() -> bool {
    T::SPARSE
}

/// OR the type's bit into `mask`, skipping sparse types.
pub fn set_mask<T: Component>(mask: &mut ComponentMask) {
    if !T::SPARSE {
        mask.set(component_id_of::<T>());
    }
}

/// Maximum number of components supported by ComponentSet implementations
pub const MAX_SET_COMPONENTS: usize = 8;

/// A pack of component values spawned onto one entity.
///
/// Dense members are written into the reserved chunk row; sparse members are
/// routed to the owning manager's keyed stores.
pub trait ComponentSet: Send + Sync + 'static {
    /// Mask over the pack's dense members (sparse members contribute no bit).
    fn mask() -> ComponentMask
    where
        Self: Sized;

    /// Register every member type's metadata.
    fn register_all()
    where
        Self: Sized;

    /// Store the pack for entity `id`: dense members into `chunk` row `row`,
    /// sparse members into `manager`'s stores.
    fn store(
        self,
        manager: &crate::manager::EntityManager,
        chunk: Option<&crate::archetype::ArchetypeChunk>,
        row: usize,
        id: crate::entity::EntityId,
    );
}

macro_rules! impl_component_set {
    ($($T:ident),*) => {
        impl<$($T: Component),*> ComponentSet for ($($T,)*) {
            fn mask() -> ComponentMask {
                let mut mask = ComponentMask::EMPTY;
                $(set_mask::<$T>(&mut mask);)*
                mask
            }

            fn register_all() {
                $(register::<$T>();)*
            }

            #[allow(non_snake_case)]
            fn store(
                self,
                manager: &crate::manager::EntityManager,
                chunk: Option<&crate::archetype::ArchetypeChunk>,
                row: usize,
                id: crate::entity::EntityId,
            ) {
                let ($($T,)*) = self;
                $(
                    if $T::SPARSE {
                        manager.sparse_store::<$T>().insert(id, $T);
                    } else if let Some(chunk) = chunk {
                        chunk.write_component(row, $T);
                    }
                )*
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);
