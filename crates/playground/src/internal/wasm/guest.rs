//! Host side of the runtime guest ABI.
//!
//! The guest is a core module exporting `memory`, `playground_alloc(len) ->
//! ptr`, `playground_eval(ptr, len) -> i64` and optionally `playground_init()`.
//! `playground_eval` reads UTF-8 source at `ptr` and returns
//! `(reply_ptr << 32) | reply_len` locating a UTF-8 JSON reply:
//! `{"value": ...}` or `{"error": "..."}`.

use std::time::{Duration, Instant};

use serde::Deserialize;
use wasmtime::{Engine, Linker, Memory, Module, Store, TypedFunc, UpdateDeadline};

use super::limiter::MemoryLimiter;
use crate::error::{EvaluationError, LoadError};

pub const MEMORY_EXPORT: &str = "memory";
pub const ALLOC_EXPORT: &str = "playground_alloc";
pub const EVAL_EXPORT: &str = "playground_eval";
pub const INIT_EXPORT: &str = "playground_init";

pub struct GuestState {
    pub limiter: MemoryLimiter,
    deadline: Option<Instant>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GuestReply {
    Error { error: String },
    Value { value: Option<serde_json::Value> },
}

pub struct GuestInstance {
    store: Store<GuestState>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    eval: TypedFunc<(i32, i32), i64>,
}

fn init_error(error: wasmtime::Error) -> LoadError {
    LoadError::Initialize(format!("{error:#}"))
}

impl GuestInstance {
    /// Instantiate the runtime and run its optional initializer. Both the
    /// module's start function and `playground_init` must finish within
    /// `init_timeout`.
    pub async fn instantiate(
        engine: &Engine,
        module: &Module,
        max_memory: usize,
        init_timeout: Duration,
    ) -> Result<Self, LoadError> {
        let deadline = Instant::now() + init_timeout;
        let mut store = Store::new(
            engine,
            GuestState {
                limiter: MemoryLimiter::new(max_memory),
                deadline: Some(deadline),
            },
        );
        store.limiter(|state| &mut state.limiter);
        // Yield to the executor every tick; fail once the current deadline has
        // passed.
        store.epoch_deadline_callback(|ctx| match ctx.data().deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(wasmtime::Error::msg("guest deadline exceeded"))
            }
            _ => Ok(UpdateDeadline::Yield(1)),
        });
        store.set_epoch_deadline(1);

        let failed = |error: wasmtime::Error| {
            if Instant::now() >= deadline {
                LoadError::Initialize(format!(
                    "runtime initialization timed out after {}ms",
                    init_timeout.as_millis()
                ))
            } else {
                init_error(error)
            }
        };

        let linker = Linker::<GuestState>::new(engine);
        let instance = linker
            .instantiate_async(&mut store, module)
            .await
            .map_err(failed)?;

        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| {
                LoadError::Initialize(format!("runtime does not export `{MEMORY_EXPORT}`"))
            })?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, ALLOC_EXPORT)
            .map_err(failed)?;
        let eval = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, EVAL_EXPORT)
            .map_err(failed)?;

        if let Some(init) = instance.get_func(&mut store, INIT_EXPORT) {
            init.typed::<(), ()>(&store)
                .map_err(failed)?
                .call_async(&mut store, ())
                .await
                .map_err(failed)?;
        }
        store.data_mut().deadline = None;

        Ok(Self {
            store,
            memory,
            alloc,
            eval,
        })
    }

    pub fn memory_usage(&self) -> usize {
        self.store.data().limiter.current()
    }

    pub fn peak_memory(&self) -> usize {
        self.store.data().limiter.peak()
    }

    pub async fn evaluate(
        &mut self,
        source: &str,
        timeout: Duration,
    ) -> Result<Option<String>, EvaluationError> {
        let deadline = Instant::now() + timeout;
        self.store.data_mut().deadline = Some(deadline);
        self.store.set_epoch_deadline(1);
        self.store.data_mut().limiter.take_refused();
        let result = self.call(source).await;
        self.store.data_mut().deadline = None;
        let refused = self.store.data_mut().limiter.take_refused();

        let reply = match result {
            Ok(reply) => reply,
            Err(_) if Instant::now() >= deadline => {
                return Err(EvaluationError::TimedOut(timeout.as_millis()));
            }
            Err(error) => {
                return Err(match refused {
                    Some(requested) => EvaluationError::OutOfMemory {
                        requested,
                        limit: self.store.data().limiter.limit(),
                    },
                    None => EvaluationError::Guest(format!("{error:#}")),
                });
            }
        };

        match serde_json::from_slice::<GuestReply>(&reply) {
            Ok(GuestReply::Error { error }) => Err(EvaluationError::Raised(error)),
            Ok(GuestReply::Value { value }) => Ok(match value {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(text)) => Some(text),
                Some(other) => Some(other.to_string()),
            }),
            Err(error) => Err(EvaluationError::Protocol(error.to_string())),
        }
    }

    async fn call(&mut self, source: &str) -> wasmtime::Result<Vec<u8>> {
        let len = i32::try_from(source.len())?;
        let ptr = self.alloc.call_async(&mut self.store, len).await?;
        self.memory
            .write(&mut self.store, guest_offset(ptr)?, source.as_bytes())?;

        let packed = self.eval.call_async(&mut self.store, (ptr, len)).await?;
        let packed = u64::from_ne_bytes(packed.to_ne_bytes());
        let reply_ptr = usize::try_from(packed >> 32)?;
        let reply_len = usize::try_from(packed & 0xffff_ffff)?;

        let reply = reply_ptr
            .checked_add(reply_len)
            .and_then(|end| self.memory.data(&self.store).get(reply_ptr..end))
            .ok_or_else(|| wasmtime::Error::msg("reply lies outside guest memory"))?;
        Ok(reply.to_vec())
    }
}

fn guest_offset(ptr: i32) -> wasmtime::Result<usize> {
    Ok(usize::try_from(u32::from_ne_bytes(ptr.to_ne_bytes()))?)
}
