//! Service locator handed to systems each frame.

use std::any::{Any, TypeId};

use rustc_hash::FxHashMap;

/// Type-keyed registry of shared services (camera, renderer front-end,
/// registries). Services are installed before the frame loop starts and
/// resolved by reference inside system hooks.
#[derive(Default)]
pub struct ServiceLocator {
    services: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a service, replacing any previous instance of the same type.
    pub fn insert<S: Any + Send + Sync>(&mut self, service: S) {
        self.services.insert(TypeId::of::<S>(), Box::new(service));
    }

    /// Resolve a service by type.
    pub fn get<S: Any + Send + Sync>(&self) -> Option<&S> {
        self.services
            .get(&TypeId::of::<S>())
            .and_then(|s| s.downcast_ref())
    }

    pub fn contains<S: Any + Send + Sync>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<S>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock {
        dt: f64,
    }

    #[test]
    fn insert_and_resolve() {
        let mut services = ServiceLocator::new();
        assert!(services.get::<Clock>().is_none());

        services.insert(Clock { dt: 0.016 });
        assert!(services.contains::<Clock>());
        assert_eq!(services.get::<Clock>().unwrap().dt, 0.016);

        services.insert(Clock { dt: 0.033 });
        assert_eq!(services.len(), 1);
        assert_eq!(services.get::<Clock>().unwrap().dt, 0.033);
    }
}
