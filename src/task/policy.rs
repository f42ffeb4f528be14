//! Reducers over the errors reported by the tasks of a registry.

use crate::errors::Error;

pub trait ErrorPolicy: Send + 'static {
    /// Feeds an error reported by some task.
    fn record(&mut self, err: Error);

    /// The error surfaced to the caller of a sort.
    fn first(&self) -> Option<&Error>;

    /// Every error this policy kept.
    fn all(&self) -> Vec<Error> {
        self.first().cloned().into_iter().collect()
    }
}

/// Keeps the first reported error and discards the rest.
#[derive(Debug, Default)]
pub struct FirstErrorWins {
    error: Option<Error>,
}

impl ErrorPolicy for FirstErrorWins {
    fn record(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn first(&self) -> Option<&Error> {
        self.error.as_ref()
    }
}

/// Keeps every reported error in the order they arrived.
#[derive(Debug, Default)]
pub struct CollectErrors {
    errors: Vec<Error>,
}

impl ErrorPolicy for CollectErrors {
    fn record(&mut self, err: Error) {
        self.errors.push(err);
    }

    fn first(&self) -> Option<&Error> {
        self.errors.first()
    }

    fn all(&self) -> Vec<Error> {
        self.errors.clone()
    }
}
