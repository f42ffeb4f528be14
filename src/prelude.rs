pub use crate::errors::{Error, Result};

pub use crate::settings::{ExecutorParams, PoolParams, SortParams};

pub use crate::sched::{JobHandle, ThreadPool};

pub use crate::task::{body_fn, ExecHandle, Launcher, Registry, Task, TaskBody, TaskContext};
pub use crate::task::{ErrorPolicy, TaskId, TaskStatus, ThreadLauncher};

pub use crate::sort::{quick_sort, quick_sort_with, Sorter};
