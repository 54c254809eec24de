use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{RuntimeHandle, RuntimeProvider};
use crate::error::LoadError;

type LoadFuture = Shared<BoxFuture<'static, Result<RuntimeHandle, LoadError>>>;

enum LoadState {
    Uninitialized,
    Loading { attempt: u64, future: LoadFuture },
    Ready(RuntimeHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderStatus {
    Uninitialized,
    Loading,
    Ready,
}

/// Process-wide owner of the dynamic runtime.
///
/// `Uninitialized -> Loading -> Ready`, with `Loading -> Uninitialized` when a
/// load fails. Callers arriving while a load is in flight wait on that same
/// load instead of starting another one; all of them receive its outcome.
/// Once ready, the handle is kept for the lifetime of the loader.
pub struct RuntimeLoader {
    provider: Arc<dyn RuntimeProvider>,
    state: Arc<Mutex<LoadState>>,
    attempts: AtomicU64,
}

impl RuntimeLoader {
    pub fn new(provider: impl RuntimeProvider) -> Self {
        Self::from_arc(Arc::new(provider))
    }

    pub fn from_arc(provider: Arc<dyn RuntimeProvider>) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(LoadState::Uninitialized)),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> LoaderStatus {
        match &*self.state.lock() {
            LoadState::Uninitialized => LoaderStatus::Uninitialized,
            LoadState::Loading { .. } => LoaderStatus::Loading,
            LoadState::Ready(_) => LoaderStatus::Ready,
        }
    }

    /// Number of loads started so far.
    pub fn load_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Return the runtime, loading it first if needed.
    ///
    /// The load itself runs as a Tokio task, so it keeps going when every
    /// caller waiting on it is dropped.
    ///
    /// # Errors
    /// Returns the [`LoadError`] of the attempt this call waited on.
    ///
    /// # Panics
    /// Panics when a load must be started outside a Tokio runtime.
    pub async fn ensure_runtime(&self) -> Result<RuntimeHandle, LoadError> {
        let future = {
            let mut state = self.state.lock();
            match &*state {
                LoadState::Ready(handle) => return Ok(handle.clone()),
                LoadState::Loading { future, .. } => future.clone(),
                LoadState::Uninitialized => {
                    let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(attempt, "Loading dynamic runtime");
                    let future = self.start(attempt);
                    *state = LoadState::Loading {
                        attempt,
                        future: future.clone(),
                    };
                    future
                }
            }
        };
        future.await
    }

    fn start(&self, attempt: u64) -> LoadFuture {
        let provider = Arc::clone(&self.provider);
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let result = provider.load().await;
            settle(&state, attempt, &result);
            match &result {
                Ok(_) => info!(attempt, "Dynamic runtime ready"),
                Err(error) => warn!(attempt, %error, "Dynamic runtime failed to load"),
            }
            result
        });

        let state = Arc::clone(&self.state);
        async move {
            task.await.unwrap_or_else(|error| {
                warn!(attempt, %error, "Dynamic runtime load task did not complete");
                let result = Err(LoadError::Abandoned);
                settle(&state, attempt, &result);
                result
            })
        }
        .boxed()
        .shared()
    }
}

fn settle(state: &Mutex<LoadState>, attempt: u64, result: &Result<RuntimeHandle, LoadError>) {
    let mut state = state.lock();
    let current = matches!(&*state, LoadState::Loading { attempt: a, .. } if *a == attempt);
    if current {
        *state = match result {
            Ok(handle) => LoadState::Ready(handle.clone()),
            Err(_) => LoadState::Uninitialized,
        };
    }
}
