use failure::Fail;

use crate::task::TaskId;

/// Failures that can be reported by a task or by the registry. The error is `Clone` since
/// the task, the registry and the caller of the sort each keep their own copy.
#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum Error {
    #[fail(display = "Failed to spawn execution context: {}", _0)]
    Spawn(String),
    #[fail(display = "Failed to allocate storage for {}.", _0)]
    Alloc(&'static str),
    #[fail(display = "Task {} panicked: {}", _0, _1)]
    Panic(TaskId, String),
    #[fail(display = "Failed to reclaim execution context: {}", _0)]
    Join(String),
    #[fail(display = "Thread pool has been terminated.")]
    PoolTerminated,
    #[fail(display = "{}", _0)]
    Failed(String),
    #[fail(display = "Malformed settings: {}", _0)]
    Settings(String),
}

pub type Result<T> = ::std::result::Result<T, Error>;

impl From<::std::io::Error> for Error {
    fn from(err: ::std::io::Error) -> Self {
        Error::Spawn(err.to_string())
    }
}

impl From<::std::collections::TryReserveError> for Error {
    fn from(_: ::std::collections::TryReserveError) -> Self {
        Error::Alloc("task registry")
    }
}

impl From<::serde_json::Error> for Error {
    fn from(err: ::serde_json::Error) -> Self {
        Error::Settings(err.to_string())
    }
}
