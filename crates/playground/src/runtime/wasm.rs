//! WebAssembly-hosted dynamic runtime.
//!
//! Typical flow:
//! 1. Configure a [`WasmRuntimeBuilder`] (or derive one from
//!    [`PlaygroundConfig`]).
//! 2. [`build`](WasmRuntimeBuilder::build) a [`WasmRuntimeProvider`] for a
//!    [`RuntimeSource`] and hand it to a
//!    [`RuntimeLoader`](crate::runtime::RuntimeLoader).
//! 3. The first load fetches the artifact, compiles it (through the on-disk
//!    cache when configured), instantiates it and runs its initializer. The
//!    resulting instance serves every later evaluation.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tracing::{debug, info};
use wasmtime::Engine;

pub use crate::config::RuntimeSource;
use crate::{
    config::{
        DEFAULT_EVAL_TIMEOUT, DEFAULT_FETCH_TIMEOUT, DEFAULT_INIT_TIMEOUT, DEFAULT_MAX_MEMORY,
        PlaygroundConfig,
    },
    error::{Error, EvaluationError, LoadError, Result},
    internal::wasm::{
        compile::load_or_compile_module,
        configure::configure_engine,
        epoch::{self, TickerRegistration},
        fetch::fetch_artifact,
        guest::GuestInstance,
    },
    runtime::{Interpreter, RuntimeHandle, RuntimeProvider},
};

#[derive(Debug, Default, Clone)]
pub struct WasmRuntimeBuilder {
    cache: Option<PathBuf>,
    max_memory: Option<usize>,
    eval_timeout: Option<Duration>,
    init_timeout: Option<Duration>,
    fetch_timeout: Option<Duration>,
}

impl WasmRuntimeBuilder {
    #[must_use]
    pub fn from_config(config: &PlaygroundConfig) -> Self {
        Self {
            cache: config.cache_dir.clone(),
            max_memory: Some(config.max_memory),
            eval_timeout: Some(config.eval_timeout),
            init_timeout: Some(config.init_timeout),
            fetch_timeout: Some(config.fetch_timeout),
        }
    }

    /// Directory for compiled artifacts. Disabled when `None`.
    #[must_use]
    pub fn cache(mut self, cache: Option<PathBuf>) -> Self {
        self.cache = cache;
        self
    }

    /// Guest memory hard limit. Defaults to 64 MiB.
    #[must_use]
    pub const fn max_memory(mut self, max_memory: usize) -> Self {
        self.max_memory = Some(max_memory);
        self
    }

    /// Wall-clock budget of a single evaluation.
    #[must_use]
    pub const fn eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = Some(timeout);
        self
    }

    /// Budget of instantiation plus the guest's `playground_init`.
    #[must_use]
    pub const fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    /// Timeout of the artifact download.
    #[must_use]
    pub const fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// # Errors
    /// Returns an error if the engine or the HTTP client cannot be created.
    pub fn build(self, source: RuntimeSource) -> Result<WasmRuntimeProvider> {
        let mut engine_cfg = wasmtime::Config::default();
        configure_engine(&mut engine_cfg);
        let engine = Engine::new(&engine_cfg).map_err(Error::Wasm)?;
        let ticker = epoch::register(engine.clone())?;

        let client = reqwest::Client::builder()
            .timeout(self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(WasmRuntimeProvider {
            source,
            client,
            engine,
            ticker,
            cache: self.cache,
            max_memory: self.max_memory.unwrap_or(DEFAULT_MAX_MEMORY),
            eval_timeout: self.eval_timeout.unwrap_or(DEFAULT_EVAL_TIMEOUT),
            init_timeout: self.init_timeout.unwrap_or(DEFAULT_INIT_TIMEOUT),
        })
    }
}

pub struct WasmRuntimeProvider {
    source: RuntimeSource,
    client: reqwest::Client,
    engine: Engine,
    ticker: Arc<TickerRegistration>,
    cache: Option<PathBuf>,
    max_memory: usize,
    eval_timeout: Duration,
    init_timeout: Duration,
}

impl WasmRuntimeProvider {
    #[must_use]
    pub fn builder() -> WasmRuntimeBuilder {
        WasmRuntimeBuilder::default()
    }
}

#[async_trait::async_trait]
impl RuntimeProvider for WasmRuntimeProvider {
    async fn load(&self) -> core::result::Result<RuntimeHandle, LoadError> {
        let artifact = fetch_artifact(&self.source, &self.client).await?;
        let module =
            load_or_compile_module(&self.engine, &artifact, self.cache.as_deref()).await?;
        let guest = GuestInstance::instantiate(
            &self.engine,
            &module,
            self.max_memory,
            self.init_timeout,
        )
        .await?;
        info!(source = %self.source, memory = guest.memory_usage(), "Runtime instantiated");

        Ok(RuntimeHandle::new(WasmInterpreter {
            guest: tokio::sync::Mutex::new(guest),
            eval_timeout: self.eval_timeout,
            _ticker: Arc::clone(&self.ticker),
        }))
    }
}

/// A single guest instance; evaluations run one at a time and share its
/// global state.
pub struct WasmInterpreter {
    guest: tokio::sync::Mutex<GuestInstance>,
    eval_timeout: Duration,
    /// Keeps the epoch ticker alive for the lifetime of this interpreter.
    _ticker: Arc<TickerRegistration>,
}

#[async_trait::async_trait]
impl Interpreter for WasmInterpreter {
    async fn evaluate(&self, source: &str) -> core::result::Result<Option<String>, EvaluationError> {
        let mut guest = self.guest.lock().await;
        let result = guest.evaluate(source, self.eval_timeout).await;
        debug!(
            memory = guest.memory_usage(),
            peak_memory = guest.peak_memory(),
            ok = result.is_ok(),
            "Evaluation finished"
        );
        result
    }
}
