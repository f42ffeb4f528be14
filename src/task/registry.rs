//! # Registry
//!
//! The `Registry` owns every task of a tree of concurrent work. Tasks register
//! themselves before they are started and report exactly once when they are done,
//! successful or not. The registry keeps them in two sets:
//!
//! 1. _active_, tasks that have been registered but have not reported yet;
//! 2. _finished_, tasks that have reported but whose execution context has not
//! been reclaimed yet.
//!
//! An execution context can't be reclaimed from inside itself, so the context of
//! a task is reclaimed later, either by the completion report of some other task
//! or by `reclaim_all` when the tree is torn down.
//!
//! All the state lives behind one mutex, the condition variable is signaled when
//! the active set becomes empty.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::errors::{Error, Result};

use super::policy::{ErrorPolicy, FirstErrorWins};
use super::{Launcher, Task, TaskId};

pub struct Registry {
    state: Mutex<RegistryState>,
    completed: Condvar,
    next_id: AtomicU64,
    launcher: Arc<dyn Launcher>,
}

struct RegistryState {
    active: HashMap<TaskId, Arc<Task>>,
    finished: VecDeque<Arc<Task>>,
    policy: Box<dyn ErrorPolicy>,
    registered: usize,
    reclaimed: usize,
}

impl RegistryState {
    fn record(&mut self, err: Error) {
        if self.policy.first().is_none() {
            warn!("Task execution failed: {}", err);
        } else {
            debug!("Task execution failed after a prior error: {}", err);
        }

        self.policy.record(err);
    }

    /// Joins the execution contexts of finished tasks which are done running.
    fn reclaim_finished(&mut self) {
        let mut errors = Vec::new();
        let reclaimed = &mut self.reclaimed;

        self.finished.retain(|task| match task.reclaim(false) {
            Some(result) => {
                trace!("Reclaims execution context of task {}.", task.id());
                *reclaimed += 1;

                if let Err(err) = result {
                    errors.push(err);
                }

                false
            }
            None => true,
        });

        for err in errors {
            self.record(err);
        }
    }
}

impl Registry {
    /// Creates a new registry which keeps the first reported error only.
    pub fn new(launcher: Arc<dyn Launcher>) -> Arc<Self> {
        Registry::with_policy(launcher, Box::new(FirstErrorWins::default()))
    }

    /// Creates a new registry which reduces the reported errors with `policy`.
    pub fn with_policy(launcher: Arc<dyn Launcher>, policy: Box<dyn ErrorPolicy>) -> Arc<Self> {
        let state = RegistryState {
            active: HashMap::new(),
            finished: VecDeque::new(),
            policy,
            registered: 0,
            reclaimed: 0,
        };

        Arc::new(Registry {
            state: Mutex::new(state),
            completed: Condvar::new(),
            next_id: AtomicU64::new(0),
            launcher,
        })
    }

    /// Hands out the next task identifier.
    #[inline]
    pub fn next_task_id(&self) -> TaskId {
        TaskId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The launcher which creates execution contexts of tasks.
    #[inline]
    pub fn launcher(&self) -> &dyn Launcher {
        &*self.launcher
    }

    /// Adds a task into the active set, but doesn't start it. Fails if the active
    /// set could not grow, the task must not be started in that case.
    pub fn add_task(&self, task: &Arc<Task>) -> Result<()> {
        let mut state = self.lock();
        state.active.try_reserve(1)?;

        debug_assert!(!state.active.contains_key(&task.id()));
        state.active.insert(task.id(), task.clone());
        state.registered += 1;
        Ok(())
    }

    /// Gets count of active tasks.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Gets count of tasks which have completed but have not been reclaimed yet.
    pub fn finished_count(&self) -> usize {
        self.lock().finished.len()
    }

    /// Gets count of tasks ever registered.
    pub fn registered_count(&self) -> usize {
        self.lock().registered
    }

    /// Gets count of tasks whose execution context has been reclaimed.
    pub fn reclaimed_count(&self) -> usize {
        self.lock().reclaimed
    }

    /// Must be called by a task exactly once, after its work is final.
    ///
    /// # Panics
    ///
    /// Panics if the task with `id` is not active, which means it has reported
    /// already or has never been registered.
    pub fn handle_task_completion(&self, id: TaskId, error: Option<Error>) {
        let mut state = self.lock();

        // The caller can't reclaim itself, but it could reclaim the others.
        state.reclaim_finished();

        let task = match state.active.remove(&id) {
            Some(task) => task,
            None => {
                drop(state);
                error!("Task {} reported completion, but it is not active.", id);
                panic!("task {} reported completion, but it is not active", id);
            }
        };

        debug!(
            "Task {} ({}) completed, {} tasks still active.",
            id,
            task.describe(),
            state.active.len()
        );

        match state.finished.try_reserve(1) {
            Ok(()) => state.finished.push_back(task),
            Err(err) => state.record(err.into()),
        }

        if let Some(err) = error {
            state.record(err);
        }

        if state.active.is_empty() {
            self.completed.notify_all();
        }
    }

    /// Checks if some task has reported an error.
    pub fn is_error_occurred(&self) -> bool {
        self.lock().policy.first().is_some()
    }

    /// Gets the error surfaced by the error policy, the first reported one by default.
    pub fn get_error(&self) -> Option<Error> {
        self.lock().policy.first().cloned()
    }

    /// Gets every error kept by the error policy.
    pub fn errors(&self) -> Vec<Error> {
        self.lock().policy.all()
    }

    /// Checks if all registered tasks have reported their completion.
    pub fn are_all_tasks_completed(&self) -> bool {
        self.lock().active.is_empty()
    }

    /// Blocks until all registered tasks have reported their completion.
    pub fn wait_for_all_tasks_completion(&self) {
        let mut state = self.lock();
        while !state.active.is_empty() {
            state = self
                .completed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until all registered tasks have reported their completion, or `timeout`
    /// elapsed. Returns true if all tasks have completed. Running tasks are not
    /// affected by the timeout.
    pub fn wait_for_all_tasks_completion_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        while !state.active.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            state = self
                .completed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        true
    }

    /// Joins the execution contexts of all finished tasks, blocking until they are
    /// done running. Returns the number of reclaimed contexts.
    pub fn reclaim_all(&self) -> usize {
        let finished: Vec<_> = self.lock().finished.drain(..).collect();

        let mut reclaimed = 0;
        let mut errors = Vec::new();
        for task in finished {
            match task.reclaim(true) {
                Some(result) => {
                    reclaimed += 1;
                    if let Err(err) = result {
                        errors.push(err);
                    }
                }
                None => trace!("Execution context of task {} is left detached.", task.id()),
            }
        }

        let mut state = self.lock();
        state.reclaimed += reclaimed;
        for err in errors {
            state.record(err);
        }

        reclaimed
    }

    #[inline]
    fn lock(&self) -> MutexGuard<RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        if !state.active.is_empty() {
            warn!(
                "Registry is dropped with {} active tasks.",
                state.active.len()
            );
        }

        // This could run inside the execution context of the task which released
        // the last reference, that one context is left detached.
        for task in state.finished.drain(..) {
            match task.reclaim(true) {
                Some(Err(err)) => warn!("Failed to reclaim task {}: {}", task.id(), err),
                Some(Ok(())) => {}
                None => trace!("Execution context of task {} is left detached.", task.id()),
            }
        }
    }
}
