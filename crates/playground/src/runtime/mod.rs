//! The dynamic runtime: an external interpreter loaded at most once per
//! process and shared by every run.

mod loader;
#[cfg(feature = "wasm")]
pub mod wasm;

use std::sync::Arc;

pub use loader::{LoaderStatus, RuntimeLoader};

use crate::error::{EvaluationError, LoadError};

#[async_trait::async_trait]
pub trait Interpreter: Send + Sync + 'static {
    /// Evaluate `source`, returning the textual form of its result value, or
    /// `None` when the program produced no representable value.
    async fn evaluate(&self, source: &str) -> Result<Option<String>, EvaluationError>;
}

/// Fetches and initializes an interpreter. Called by [`RuntimeLoader`] only.
#[async_trait::async_trait]
pub trait RuntimeProvider: Send + Sync + 'static {
    async fn load(&self) -> Result<RuntimeHandle, LoadError>;
}

/// Shared reference to an initialized interpreter.
#[derive(Clone)]
pub struct RuntimeHandle(Arc<dyn Interpreter>);

impl RuntimeHandle {
    pub fn new(interpreter: impl Interpreter) -> Self {
        Self(Arc::new(interpreter))
    }

    /// Whether both handles refer to the same interpreter instance.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// # Errors
    /// Returns the interpreter's evaluation error.
    pub async fn evaluate(&self, source: &str) -> Result<Option<String>, EvaluationError> {
        self.0.evaluate(source).await
    }
}

impl core::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("RuntimeHandle")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}
