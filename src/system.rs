//! System trait and per-frame entry points.

use crate::access::AccessSpec;
use crate::error::Result;
use crate::executor::Executor;
use crate::level::LevelContext;
use crate::partition::Partition;
use crate::service::ServiceLocator;

/// A unit of per-frame logic over one level's partition.
///
/// `access` declares the component types the system reads and writes; the
/// scheduler uses it to batch non-conflicting systems for parallel execution.
/// Systems wanting parallel per-chunk iteration inside `update` return `true`
/// from `parallel_update` and hand the executor to
/// [`crate::query::par_for_each_chunk`].
pub trait System<P: Partition>: Send + Sync {
    fn name(&self) -> &str;

    /// Declared component access; must cover everything `update` touches.
    fn access(&self) -> AccessSpec;

    /// Hint that `update` splits its chunk iteration across the executor.
    fn parallel_update(&self) -> bool {
        false
    }

    /// Called once when the system is added to a scheduler.
    fn start(&mut self, _services: &ServiceLocator) {}

    /// Called every frame within the system's batch.
    fn update(
        &mut self,
        partition: &P,
        ctx: &LevelContext,
        services: &ServiceLocator,
        executor: Option<&dyn Executor>,
    ) -> Result<()>;

    /// Called once when the owning level is cleaned up.
    fn end(&mut self, _partition: &P, _ctx: &LevelContext, _services: &ServiceLocator) {}
}

/// Boxed system
pub type BoxedSystem<P> = Box<dyn System<P>>;
