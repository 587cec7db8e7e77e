//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use spatial_ecs::prelude::*;
//! ```

pub use crate::access::{AccessSpec, Read, Write};
pub use crate::component::{register, Component, ComponentSet};
pub use crate::entity::EntityId;
pub use crate::error::{EcsError, Result};
pub use crate::executor::{Executor, ThreadPoolExecutor};
pub use crate::level::{Level, LevelContext};
pub use crate::manager::EntityManager;
pub use crate::mask::ComponentMask;
pub use crate::partition::{
    ChunkRegistry, GridPartition, LevelId, OutOfBoundsPolicy, Partition, VoidPartition,
};
pub use crate::query::Query;
pub use crate::service::ServiceLocator;
pub use crate::system::{BoxedSystem, System};
