//! Error types and the optional user-supplied error sink.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

/// Failure of a persistence operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness predicate rejected the insert: another worker already
    /// persisted this continuation. Recoverable; callers treat it as a
    /// benign lost race.
    #[error("duplicate job row: continuation already persisted")]
    Duplicate,

    /// Any other backend failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate)
    }
}

/// User-supplied error sink, invoked for handler failures and store errors
/// that the worker swallows. Suitable for wiring up an error reporter.
pub type ErrorHook = Arc<dyn Fn(&(dyn std::error::Error + Send + Sync + 'static)) + Send + Sync>;

/// Wrapper around the optional [`ErrorHook`] that swallows hook panics:
/// a misbehaving sink must never take a pipeline loop down with it.
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_error: Option<ErrorHook>,
}

impl Hooks {
    pub(crate) fn report(&self, err: &(dyn std::error::Error + Send + Sync + 'static)) {
        if let Some(hook) = &self.on_error {
            if catch_unwind(AssertUnwindSafe(|| hook(err))).is_err() {
                error!("error hook panicked while reporting an error");
            }
        }
    }
}
