use std::path::Path;

use tracing::{debug, info};
use wasmtime::{Engine, Module};

use super::cache::{cache_key, write_cache_file_atomic};
use crate::error::LoadError;

fn compile_error(error: impl core::fmt::Display) -> LoadError {
    LoadError::Compile(error.to_string())
}

/// Compile a runtime artifact (binary or text format), reusing a compiled
/// copy from `cache_dir` when one exists for the same bytes and engine.
pub async fn load_or_compile_module(
    engine: &Engine,
    artifact: &[u8],
    cache_dir: Option<&Path>,
) -> Result<Module, LoadError> {
    let Some(cache_dir) = cache_dir else {
        let engine = engine.clone();
        let artifact = artifact.to_vec();
        return tokio::task::spawn_blocking(move || Module::new(&engine, &artifact))
            .await
            .map_err(|_| LoadError::Abandoned)?
            .map_err(compile_error);
    };

    tokio::fs::create_dir_all(cache_dir)
        .await
        .map_err(compile_error)?;
    let key = cache_key(engine, artifact);
    let cache_path = cache_dir.join(format!("{key}.cwasm"));

    // SAFETY: the cache only holds output of `precompile_module`, and the key
    // covers the engine's compatibility hash. A foreign or damaged file fails
    // wasmtime's header checks and is recompiled below.
    if let Ok(module) = unsafe { Module::deserialize_file(engine, &cache_path) } {
        debug!(path = %cache_path.display(), "Compiled runtime loaded from cache");
        return Ok(module);
    }

    let serialized = {
        let engine = engine.clone();
        let artifact = artifact.to_vec();
        tokio::task::spawn_blocking(move || engine.precompile_module(&artifact))
            .await
            .map_err(|_| LoadError::Abandoned)?
            .map_err(compile_error)?
    };
    write_cache_file_atomic(&cache_path, &serialized)
        .await
        .map_err(compile_error)?;
    info!(path = %cache_path.display(), bytes = serialized.len(), "Compiled runtime cached");

    // SAFETY: produced just above by `precompile_module` on this engine.
    unsafe { Module::deserialize(engine, &serialized) }.map_err(compile_error)
}
