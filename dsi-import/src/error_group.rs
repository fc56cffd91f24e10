//! Partial-failure collection
//!
//! Every multi-item loop in the pipeline (subjects, visits, acquisitions,
//! channel rows) runs each item to completion and reports all failures at
//! once under a single label, instead of stopping at the first one.

use crate::error::{ImportError, ImportResult};

/// Accumulates item results and failures for one labelled batch
///
/// Works for async loops where the items cannot be passed as closures:
///
/// ```ignore
/// let mut group = ErrorGroup::new();
/// for subject in subjects {
///     group.record(resolve(subject).await);
/// }
/// let resolved = group.finish("subjects")?;
/// ```
#[derive(Debug)]
pub struct ErrorGroup<T> {
    values: Vec<T>,
    errors: Vec<ImportError>,
}

impl<T> Default for ErrorGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ErrorGroup<T> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Record one item result, returning a reference to the value on success
    pub fn record(&mut self, result: ImportResult<T>) -> Option<&T> {
        match result {
            Ok(value) => {
                self.values.push(value);
                self.values.last()
            }
            Err(error) => {
                self.errors.push(error);
                None
            }
        }
    }

    pub fn push_error(&mut self, error: ImportError) {
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Successful values, in input order
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Fail with one grouped error if anything failed, else return the values
    pub fn finish(self, label: impl Into<String>) -> ImportResult<Vec<T>> {
        if self.errors.is_empty() {
            Ok(self.values)
        } else {
            Err(ImportError::Grouped {
                label: label.into(),
                errors: self.errors,
            })
        }
    }

    /// Split into successful values and an optional grouped failure
    ///
    /// Used where siblings that succeeded must still be acted on (committed,
    /// counted) even though others failed.
    pub fn into_parts(self, label: impl Into<String>) -> (Vec<T>, Option<ImportError>) {
        let failure = if self.errors.is_empty() {
            None
        } else {
            Some(ImportError::Grouped {
                label: label.into(),
                errors: self.errors,
            })
        };
        (self.values, failure)
    }
}

/// Run every thunk, collecting all failures
///
/// Returns the results in input order when all succeed.
pub fn group_errors<T, I, F>(label: impl Into<String>, thunks: I) -> ImportResult<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> ImportResult<T>,
{
    let mut group = ErrorGroup::new();
    for thunk in thunks {
        group.record(thunk());
    }
    group.finish(label)
}

/// Combine three independently computed results of different types
pub fn group_three<A, B, C>(
    label: impl Into<String>,
    a: ImportResult<A>,
    b: ImportResult<B>,
    c: ImportResult<C>,
) -> ImportResult<(A, B, C)> {
    match (a, b, c) {
        (Ok(a), Ok(b), Ok(c)) => Ok((a, b, c)),
        (a, b, c) => {
            let errors = [a.err(), b.err(), c.err()].into_iter().flatten().collect();
            Err(ImportError::Grouped {
                label: label.into(),
                errors,
            })
        }
    }
}
