//! System scheduler: conflict-free batch construction and execution.
//!
//! Systems added mid-frame are parked in a pending list and merged at the
//! next frame under a short lock. Batches are rebuilt only when the system
//! set changes, by greedy first-fit coloring over the declared access sets;
//! the coloring is deterministic given insertion order. Each batch runs its
//! members in parallel on the injected executor, with a barrier before the
//! next batch.

use parking_lot::Mutex;
use tracing::debug;

use crate::access::AccessSpec;
use crate::error::{EcsError, Result};
use crate::executor::{run_indexed, Executor};
use crate::level::LevelContext;
use crate::partition::Partition;
use crate::service::ServiceLocator;
use crate::system::BoxedSystem;

pub struct SystemScheduler<P: Partition> {
    systems: Vec<BoxedSystem<P>>,
    access: Vec<AccessSpec>,
    pending: Mutex<Vec<BoxedSystem<P>>>,
    batches: Vec<Vec<usize>>,
    dirty: bool,
}

impl<P: Partition> Default for SystemScheduler<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Partition> SystemScheduler<P> {
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            access: Vec::new(),
            pending: Mutex::new(Vec::new()),
            batches: Vec::new(),
            dirty: true,
        }
    }

    /// Run the system's `start` hook and queue it for the next frame.
    /// Callable mid-frame from any thread.
    pub fn add_system(&self, mut system: BoxedSystem<P>, services: &ServiceLocator) {
        system.start(services);
        self.pending.lock().push(system);
    }

    /// Number of systems merged into the schedule.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Current batch plan as index groups into insertion order.
    pub fn batches(&self) -> &[Vec<usize>] {
        &self.batches
    }

    /// One frame: merge pending systems, rebuild batches if dirty, then run
    /// every batch in order. Within a batch all members complete even when
    /// one fails; the first error is returned after that batch joins.
    pub fn run_frame(
        &mut self,
        partition: &P,
        ctx: &LevelContext,
        services: &ServiceLocator,
        executor: Option<&dyn Executor>,
    ) -> Result<()> {
        self.merge_pending();
        if self.dirty {
            self.rebuild_batches();
        }

        for group_idx in 0..self.batches.len() {
            self.run_batch(group_idx, partition, ctx, services, executor)?;
        }
        Ok(())
    }

    /// Invoke `end` on every system in insertion order.
    pub fn end_all(&mut self, partition: &P, ctx: &LevelContext, services: &ServiceLocator) {
        self.merge_pending();
        for system in self.systems.iter_mut() {
            system.end(partition, ctx, services);
        }
    }

    fn merge_pending(&mut self) {
        let newly = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return;
            }
            std::mem::take(&mut *pending)
        };
        self.systems.reserve(newly.len());
        self.access.reserve(newly.len());
        for system in newly {
            self.access.push(system.access());
            self.systems.push(system);
        }
        self.dirty = true;
    }

    /// Greedy coloring: each system joins the first batch it does not
    /// conflict with, else opens a new one.
    fn rebuild_batches(&mut self) {
        self.batches.clear();
        self.batches.reserve(self.systems.len() / 2 + 1);

        for i in 0..self.systems.len() {
            let access_i = self.access[i];
            let mut placed = false;
            for group in self.batches.iter_mut() {
                if group
                    .iter()
                    .all(|&j| !access_i.conflicts_with(&self.access[j]))
                {
                    group.push(i);
                    placed = true;
                    break;
                }
            }
            if !placed {
                self.batches.push(vec![i]);
            }
        }
        self.dirty = false;
        debug!(
            systems = self.systems.len(),
            batches = self.batches.len(),
            "rebuilt system batches"
        );
    }

    fn run_batch(
        &mut self,
        group_idx: usize,
        partition: &P,
        ctx: &LevelContext,
        services: &ServiceLocator,
        executor: Option<&dyn Executor>,
    ) -> Result<()> {
        let group = &self.batches[group_idx];
        let first_err: Mutex<Option<EcsError>> = Mutex::new(None);

        if group.len() == 1 || executor.is_none() {
            for &idx in group {
                if let Err(e) = self.systems[idx].update(partition, ctx, services, executor) {
                    let mut slot = first_err.lock();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            }
        } else {
            // Opaque handle so the pointer crosses the Send boundary; see the
            // safety notes below.
            let systems_ptr = self.systems.as_mut_ptr() as usize;
            let group: &[usize] = group;

            run_indexed(executor, group.len(), group.len(), &|i| {
                let idx = group[i];
                // SAFETY: batch indices are distinct, so each task gets
                // exclusive access to its own boxed system; the declared
                // access sets were verified conflict-free at batch build, so
                // concurrent component access is disjoint by construction.
                let system = unsafe { &mut *(systems_ptr as *mut BoxedSystem<P>).add(idx) };
                if let Err(e) = system.update(partition, ctx, services, executor) {
                    let mut slot = first_err.lock();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            });
        }

        match first_err.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
