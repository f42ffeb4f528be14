//! #### Sort
//! An in-place, ascending quick sort. The top levels of the recursion run on the
//! calling thread; partitions nested deeper than `max_recursion_depth` become
//! tasks of a `Registry` and run concurrently. The sort returns once every task
//! of the tree, including tasks spawned by other tasks, has completed.
//!
//! Tasks check the error flag of the registry before every partition step, so a
//! failure anywhere stops the rest of the tree soon after. The first error is
//! returned to the caller, the elements are then left in an unspecified order but
//! none of them is lost or duplicated.
//!
//! Tasks work on raw views into the borrowed sequence, so the views and the
//! sort tasks built over them never leave this module:
//!
//! ```compile_fail
//! use threaded_sort::sort::{RawSlice, SortTask};
//! ```

mod partition;
mod slice;
mod task;

pub use self::partition::partition;

use self::slice::RawSlice;
use self::task::SortTask;

use std::sync::Arc;

use crate::errors::Result;
use crate::sched::ThreadPool;
use crate::settings::{ExecutorParams, SortParams};
use crate::task::{CollectErrors, FirstErrorWins, Launcher, Registry, Task, ThreadLauncher};

/// Sorts `v` in ascending order with default settings.
///
/// Every call spawns a thread pool of its own and tears it down before returning.
/// Use a `Sorter` to share one pool between repeated sorts.
pub fn quick_sort<T>(v: &mut [T]) -> Result<()>
where
    T: Ord + Send + 'static,
{
    quick_sort_with(v, &SortParams::default())
}

/// Sorts `v` in ascending order with `params`.
///
/// Like `quick_sort`, this builds the execution backend described by `params`
/// for this one call, see `Sorter` for repeated sorts.
pub fn quick_sort_with<T>(v: &mut [T], params: &SortParams) -> Result<()>
where
    T: Ord + Send + 'static,
{
    if v.len() < 2 {
        return Ok(());
    }

    Sorter::new(params)?.sort(v)
}

/// Sorts sequences with a given execution backend. The backend is kept between
/// sorts, a `Sorter` with a thread pool spawns its workers only once.
pub struct Sorter {
    launcher: Arc<dyn Launcher>,
    max_recursion_depth: usize,
    collect_all_errors: bool,
}

impl Sorter {
    /// Creates a sorter with the execution backend described by `params`.
    pub fn new(params: &SortParams) -> Result<Self> {
        let launcher: Arc<dyn Launcher> = match params.executor {
            ExecutorParams::ThreadPerTask { stack_size } => Arc::new(ThreadLauncher::new(stack_size)),
            ExecutorParams::Pool(ref pool) => Arc::new(ThreadPool::new(pool)?),
        };

        Ok(Sorter {
            launcher,
            max_recursion_depth: params.max_recursion_depth,
            collect_all_errors: params.collect_all_errors,
        })
    }

    /// Creates a sorter which runs its tasks with `launcher`.
    pub fn with_launcher(launcher: Arc<dyn Launcher>, max_recursion_depth: usize) -> Self {
        Sorter {
            launcher,
            max_recursion_depth,
            collect_all_errors: false,
        }
    }

    #[inline]
    pub fn max_recursion_depth(&self) -> usize {
        self.max_recursion_depth
    }

    /// Creates an empty registry for one sort.
    pub fn registry(&self) -> Arc<Registry> {
        if self.collect_all_errors {
            Registry::with_policy(self.launcher.clone(), Box::new(CollectErrors::default()))
        } else {
            Registry::with_policy(self.launcher.clone(), Box::new(FirstErrorWins::default()))
        }
    }

    /// Sorts `v` in ascending order.
    pub fn sort<T>(&self, v: &mut [T]) -> Result<()>
    where
        T: Ord + Send + 'static,
    {
        if v.len() < 2 {
            return Ok(());
        }

        self.sort_in(&self.registry(), v)
    }

    /// Sorts `v` in ascending order, tracking the tasks with `registry`.
    ///
    /// This blocks until every task is done, calling it from a job of the thread
    /// pool the tasks run in takes one worker away from them.
    pub fn sort_in<T>(&self, registry: &Arc<Registry>, v: &mut [T]) -> Result<()>
    where
        T: Ord + Send + 'static,
    {
        if v.len() < 2 {
            return Ok(());
        }

        info!(
            "Sorts {} elements with recursion depth {}.",
            v.len(),
            self.max_recursion_depth
        );

        let len = v.len();
        let root = Task::new(
            registry,
            SortTask::new(RawSlice::new(v), 0, self.max_recursion_depth),
        );

        registry.add_task(&root)?;

        {
            // The tasks borrow `v`, they must all be done before we return, even
            // if we are unwinding.
            let _teardown = Teardown(registry);
            root.start_inline(registry);
        }

        info!(
            "Sorted {} elements with {} tasks.",
            len,
            registry.registered_count()
        );

        match registry.get_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct Teardown<'a>(&'a Registry);

impl<'a> Drop for Teardown<'a> {
    fn drop(&mut self) {
        self.0.wait_for_all_tasks_completion();
        self.0.reclaim_all();
    }
}
