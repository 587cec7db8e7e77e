//! System access declarations and the conflict predicate.
//!
//! A system declares a tuple of `Read<T>`/`Write<T>` markers; the scheduler
//! reduces it to a pair of component masks and batches systems so that no two
//! concurrently-running systems touch a component in conflicting modes.

use std::marker::PhantomData;

use crate::component::{component_id_of, Component};
use crate::mask::ComponentMask;

/// Shared access to component `T`.
pub struct Read<T: Component>(PhantomData<fn() -> T>);

/// Exclusive access to component `T`.
pub struct Write<T: Component>(PhantomData<fn() -> T>);

/// One `Read`/`Write` marker.
pub trait AccessDecl {
    fn collect(reads: &mut ComponentMask, writes: &mut ComponentMask);
}

impl<T: Component> AccessDecl for Read<T> {
    fn collect(reads: &mut ComponentMask, _writes: &mut ComponentMask) {
        reads.set(component_id_of::<T>());
    }
}

impl<T: Component> AccessDecl for Write<T> {
    fn collect(_reads: &mut ComponentMask, writes: &mut ComponentMask) {
        writes.set(component_id_of::<T>());
    }
}

/// A tuple of access markers.
pub trait AccessList {
    fn collect(reads: &mut ComponentMask, writes: &mut ComponentMask);
}

macro_rules! impl_access_list {
    ($($T:ident),*) => {
        impl<$($T: AccessDecl),*> AccessList for ($($T,)*) {
            fn collect(reads: &mut ComponentMask, writes: &mut ComponentMask) {
                $($T::collect(reads, writes);)*
            }
        }
    };
}

impl_access_list!(A);
impl_access_list!(A, B);
impl_access_list!(A, B, C);
impl_access_list!(A, B, C, D);
impl_access_list!(A, B, C, D, E);
impl_access_list!(A, B, C, D, E, F);
impl_access_list!(A, B, C, D, E, F, G);
impl_access_list!(A, B, C, D, E, F, G, H);

/// A system's reduced access sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessSpec {
    pub reads: ComponentMask,
    pub writes: ComponentMask,
}

impl AccessSpec {
    /// Empty access (conflicts with nothing).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from a marker tuple, e.g. `AccessSpec::of::<(Read<A>, Write<B>)>()`.
    pub fn of<L: AccessList>() -> Self {
        let mut spec = Self::default();
        L::collect(&mut spec.reads, &mut spec.writes);
        spec
    }

    pub fn read<T: Component>(mut self) -> Self {
        self.reads.set(component_id_of::<T>());
        self
    }

    pub fn write<T: Component>(mut self) -> Self {
        self.writes.set(component_id_of::<T>());
        self
    }

    /// Mask a query must require to cover this access.
    pub fn required_mask(&self) -> ComponentMask {
        self.reads.union(&self.writes)
    }

    /// Two systems conflict iff either's writes intersect the other's reads
    /// or writes. Concurrent readers never conflict.
    pub fn conflicts_with(&self, other: &AccessSpec) -> bool {
        self.writes.intersects(&other.writes)
            || self.writes.intersects(&other.reads)
            || other.writes.intersects(&self.reads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::register;

    #[derive(Clone, Copy)]
    struct A;
    impl Component for A {}

    #[derive(Clone, Copy)]
    struct B;
    impl Component for B {}

    #[test]
    fn writers_conflict_with_everything_on_same_type() {
        register::<A>();
        register::<B>();

        let write_a = AccessSpec::of::<(Write<A>,)>();
        let read_a = AccessSpec::of::<(Read<A>,)>();
        let write_b = AccessSpec::of::<(Write<B>,)>();

        assert!(write_a.conflicts_with(&write_a));
        assert!(write_a.conflicts_with(&read_a));
        assert!(read_a.conflicts_with(&write_a));
        assert!(!write_a.conflicts_with(&write_b));
        assert!(!read_a.conflicts_with(&read_a));
    }

    #[test]
    fn mixed_tuple_reduces_to_masks() {
        register::<A>();
        register::<B>();
        let spec = AccessSpec::of::<(Read<A>, Write<B>)>();
        assert!(spec.reads.test(component_id_of::<A>()));
        assert!(spec.writes.test(component_id_of::<B>()));
        assert_eq!(spec.required_mask().count(), 2);
    }
}
