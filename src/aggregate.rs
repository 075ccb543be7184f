//! Non-short-circuiting error collection.
//!
//! Every entity in a community gets its turn in a tick no matter how earlier
//! entities fared. [`ErrorAggregator`] gathers the failures along the way and
//! [`ErrorAggregator::finish`] folds them into one [`AggregateError`] that keeps
//! every cause.

use crate::error::ReconcileError;
use std::fmt;

/// Combined failure of one reconciliation pass.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<ReconcileError>,
}

impl AggregateError {
    /// All underlying causes, in the order they were recorded.
    pub fn causes(&self) -> &[ReconcileError] {
        &self.errors
    }

    /// Number of underlying causes.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always `false` for a value produced by [`ErrorAggregator::finish`].
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consume into the underlying causes.
    pub fn into_causes(self) -> Vec<ReconcileError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [single] => write!(f, "{single}"),
            errors => {
                write!(f, "{} failures: ", errors.len())?;
                for (index, err) in errors.iter().enumerate() {
                    if index > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AggregateError {}

/// Collects failures from independent steps.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    errors: Vec<ReconcileError>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure.
    pub fn push(&mut self, err: ReconcileError) {
        self.errors.push(err);
    }

    /// Record the error of `result`, if any, and hand back the success value.
    pub fn capture<T>(&mut self, result: crate::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.push(err);
                None
            }
        }
    }

    /// Fold in the outcome of a nested pass, flattening its causes.
    pub fn absorb(&mut self, result: Result<(), AggregateError>) {
        if let Err(nested) = result {
            self.errors.extend(nested.into_causes());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(())` when nothing failed, otherwise every recorded cause.
    pub fn finish(self) -> Result<(), AggregateError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AggregateError {
                errors: self.errors,
            })
        }
    }
}
