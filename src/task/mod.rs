//! #### Task Subsystem
//! A `Task` is one unit of background work. It has an identity handed out by the
//! `Registry` it belongs to, a three-state lifecycle which only moves forward
//! (`NotStarted -> Started -> Completed`), and an error slot.
//!
//! Successful and failed executions both end up in `Completed`, and both report
//! to the registry exactly once with `Registry::handle_task_completion`. The
//! registry tracks every registered task until it reports, aggregates the
//! errors and lets a thread block until all of them, including the tasks they
//! spawned transitively, are done.

pub mod handle;
pub mod policy;
pub mod registry;

pub use self::handle::{ExecHandle, Job, Launcher, ThreadLauncher};
pub use self::policy::{CollectErrors, ErrorPolicy, FirstErrorWins};
pub use self::registry::Registry;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::{Error, Result};
use crate::sched::unwind;

/// Identifier of a task. Unique and strictly increasing within one `Registry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    #[inline]
    pub fn new(v: u64) -> Self {
        TaskId(v)
    }

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskStatus {
    /// Set just after task construction.
    NotStarted = 0,
    Started = 1,
    /// Either finished normally or failed.
    Completed = 2,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::NotStarted,
            1 => TaskStatus::Started,
            _ => TaskStatus::Completed,
        }
    }
}

/// The work performed by a task. Implementations must not let panics escape on
/// purpose, but the task wrapper catches them anyway and turns them into
/// `Error::Panic`.
pub trait TaskBody: Send + Sync + 'static {
    fn run_body(&self, ctx: &TaskContext) -> Result<()>;

    /// Short human readable description used in log messages.
    fn describe(&self) -> String {
        "task".to_owned()
    }
}

/// Task body made of a closure, see `body_fn`.
pub struct FnBody<F>(F);

impl<F> TaskBody for FnBody<F>
where
    F: Fn(&TaskContext) -> Result<()> + Send + Sync + 'static,
{
    fn run_body(&self, ctx: &TaskContext) -> Result<()> {
        (self.0)(ctx)
    }

    fn describe(&self) -> String {
        "closure".to_owned()
    }
}

/// Wraps a closure into a `TaskBody`.
pub fn body_fn<F>(func: F) -> FnBody<F>
where
    F: Fn(&TaskContext) -> Result<()> + Send + Sync + 'static,
{
    FnBody(func)
}

/// What a running task body could see of the world.
pub struct TaskContext<'a> {
    task: &'a Task,
    registry: &'a Arc<Registry>,
}

impl<'a> TaskContext<'a> {
    #[inline]
    pub fn task(&self) -> &Task {
        self.task
    }

    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        self.registry
    }

    /// Checks if any task of the registry has failed so far.
    #[inline]
    pub fn is_error_occurred(&self) -> bool {
        self.registry.is_error_occurred()
    }

    /// Creates a new task with `body`, registers and starts it.
    pub fn spawn<B: TaskBody>(&self, body: B) -> Result<TaskId> {
        let task = Task::new(self.registry, body);
        self.registry.add_task(&task)?;

        debug!(
            "Task {} spawns task {} ({}).",
            self.task.id(),
            task.id(),
            task.describe()
        );

        task.start(self.registry);
        Ok(task.id())
    }
}

pub struct Task {
    id: TaskId,
    status: AtomicU8,
    error: Mutex<Option<Error>>,
    handle: Mutex<Option<ExecHandle>>,
    reclaimed: AtomicBool,
    body: Box<dyn TaskBody>,
}

impl Task {
    /// Creates a new task which takes its identifier from `registry`. The task
    /// is neither registered nor started.
    pub fn new<B: TaskBody>(registry: &Registry, body: B) -> Arc<Task> {
        Arc::new(Task {
            id: registry.next_task_id(),
            status: AtomicU8::new(TaskStatus::NotStarted as u8),
            error: Mutex::new(None),
            handle: Mutex::new(None),
            reclaimed: AtomicBool::new(false),
            body: Box::new(body),
        })
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn describe(&self) -> String {
        self.body.describe()
    }

    /// Gets the error raised on task execution, `None` if the task has not failed.
    pub fn error(&self) -> Option<Error> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Returns true once the execution context of this task has been joined.
    #[inline]
    pub fn is_reclaimed(&self) -> bool {
        self.reclaimed.load(Ordering::SeqCst)
    }

    /// Starts executing the task with the launcher of `registry`. Calling this on a
    /// task which has been started already does nothing.
    ///
    /// If the execution context could not be created, the task fails and reports
    /// that failure to `registry` instead of returning it.
    pub fn start(self: &Arc<Self>, registry: &Arc<Registry>) {
        if !self.advance(TaskStatus::NotStarted, TaskStatus::Started) {
            trace!("Task {} has been started already.", self.id);
            return;
        }

        let job = {
            let task = self.clone();
            let registry = registry.clone();
            Box::new(move || task.execute(&registry))
        };

        match registry.launcher().launch(job) {
            Ok(handle) => self.attach(handle),
            Err(err) => {
                self.on_error(err.clone());
                registry.handle_task_completion(self.id, Some(err));
            }
        }
    }

    /// Starts executing the task on the current thread and returns once its body
    /// has finished. Calling this on a task which has been started already does
    /// nothing.
    pub fn start_inline(self: &Arc<Self>, registry: &Arc<Registry>) {
        if !self.advance(TaskStatus::NotStarted, TaskStatus::Started) {
            trace!("Task {} has been started already.", self.id);
            return;
        }

        self.attach(ExecHandle::Inline);
        self.execute(registry);
    }

    /// Records `err` unless an error has been recorded already, and forces the
    /// task into `Completed`.
    pub fn on_error(&self, err: Error) {
        {
            let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(err);
            }
        }

        self.set_status(TaskStatus::Completed);
    }

    fn execute(&self, registry: &Arc<Registry>) {
        let ctx = TaskContext {
            task: self,
            registry,
        };

        let result = match unwind::halt_unwinding(|| self.body.run_body(&ctx)) {
            Ok(result) => result,
            Err(payload) => Err(Error::Panic(self.id, unwind::payload_message(&*payload))),
        };

        match result {
            Ok(()) => {
                self.set_status(TaskStatus::Completed);
                registry.handle_task_completion(self.id, None);
            }
            Err(err) => {
                self.on_error(err.clone());
                registry.handle_task_completion(self.id, Some(err));
            }
        }
    }

    #[inline]
    fn advance(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    #[inline]
    fn set_status(&self, status: TaskStatus) {
        // Status only moves forward.
        self.status.fetch_max(status as u8, Ordering::SeqCst);
    }

    fn attach(&self, handle: ExecHandle) {
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Joins the execution context of this task. Returns `None` if there is nothing
    /// that could be joined from here: the context is not attached yet, belongs to
    /// the current thread, or is still running and `blocking` is false.
    pub(crate) fn reclaim(&self, blocking: bool) -> Option<Result<()>> {
        let handle = {
            let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
            let ready = match *slot {
                Some(ref v) => v.joinable_from_current() && (blocking || v.is_finished()),
                None => false,
            };

            if !ready {
                return None;
            }

            slot.take()
        };

        let result = handle.map(ExecHandle::join);
        self.reclaimed.store(true, Ordering::SeqCst);
        result
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("body", &self.describe())
            .finish()
    }
}
