//! Environment-driven configuration.
//!
//! | variable                         | default                            |
//! |----------------------------------|------------------------------------|
//! | `PLAYGROUND_RUNTIME`             | `target/playground_runtime.wasm`   |
//! | `PLAYGROUND_RUNTIME_CACHE_DIR`   | unset (no compiled-artifact cache) |
//! | `PLAYGROUND_RUNTIME_MAX_MEMORY`  | 64 MiB                             |
//! | `PLAYGROUND_EVAL_TIMEOUT_MS`     | 10000                              |
//! | `PLAYGROUND_INIT_TIMEOUT_MS`     | 30000                              |
//! | `PLAYGROUND_SCRIPT_TIMEOUT_MS`   | 2000                               |
//! | `PLAYGROUND_FETCH_TIMEOUT_MS`    | 30000                              |
//!
//! Invalid values are logged and replaced by the default.

use core::{fmt, str::FromStr};
use std::{path::PathBuf, time::Duration};

use tracing::{info, warn};
use url::Url;

pub const DEFAULT_RUNTIME_PATH: &str = "target/playground_runtime.wasm";
pub const DEFAULT_MAX_MEMORY: usize = 64 * 1024 * 1024;
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the dynamic runtime artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeSource {
    Remote(Url),
    Local(PathBuf),
}

impl RuntimeSource {
    /// `http(s)://` URLs are remote; anything else is a filesystem path.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            if let Ok(url) = Url::parse(value) {
                return Self::Remote(url);
            }
        }
        Self::Local(PathBuf::from(value))
    }
}

impl fmt::Display for RuntimeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => url.fmt(f),
            Self::Local(path) => path.display().fmt(f),
        }
    }
}

impl FromStr for RuntimeSource {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaygroundConfig {
    pub runtime: RuntimeSource,
    pub cache_dir: Option<PathBuf>,
    pub max_memory: usize,
    pub eval_timeout: Duration,
    pub init_timeout: Duration,
    pub script_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeSource::Local(PathBuf::from(DEFAULT_RUNTIME_PATH)),
            cache_dir: None,
            max_memory: DEFAULT_MAX_MEMORY,
            eval_timeout: DEFAULT_EVAL_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl PlaygroundConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve the configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let (runtime, runtime_source) = match lookup("PLAYGROUND_RUNTIME") {
            Some(value) if !value.trim().is_empty() => (RuntimeSource::parse(value.trim()), "env"),
            _ => (defaults.runtime, "default"),
        };

        let (cache_dir, cache_dir_source) = match lookup("PLAYGROUND_RUNTIME_CACHE_DIR") {
            Some(value) if value.trim().is_empty() => (None, "env_empty"),
            Some(value) => (Some(PathBuf::from(value)), "env"),
            None => (None, "default"),
        };

        let (max_memory, max_memory_source) = parse_var(
            &lookup,
            "PLAYGROUND_RUNTIME_MAX_MEMORY",
            defaults.max_memory,
        );
        let (eval_timeout, eval_timeout_source) = parse_millis(
            &lookup,
            "PLAYGROUND_EVAL_TIMEOUT_MS",
            defaults.eval_timeout,
        );
        let (init_timeout, init_timeout_source) = parse_millis(
            &lookup,
            "PLAYGROUND_INIT_TIMEOUT_MS",
            defaults.init_timeout,
        );
        let (script_timeout, script_timeout_source) = parse_millis(
            &lookup,
            "PLAYGROUND_SCRIPT_TIMEOUT_MS",
            defaults.script_timeout,
        );
        let (fetch_timeout, fetch_timeout_source) = parse_millis(
            &lookup,
            "PLAYGROUND_FETCH_TIMEOUT_MS",
            defaults.fetch_timeout,
        );

        info!(
            runtime = %runtime,
            runtime_source,
            cache_dir = %cache_dir.as_ref().map_or_else(|| "<disabled>".to_string(), |p| p.display().to_string()),
            cache_dir_source,
            max_memory,
            max_memory_source,
            eval_timeout_ms = eval_timeout.as_millis(),
            eval_timeout_source,
            init_timeout_ms = init_timeout.as_millis(),
            init_timeout_source,
            script_timeout_ms = script_timeout.as_millis(),
            script_timeout_source,
            fetch_timeout_ms = fetch_timeout.as_millis(),
            fetch_timeout_source,
            "Playground configuration resolved"
        );

        Self {
            runtime,
            cache_dir,
            max_memory,
            eval_timeout,
            init_timeout,
            script_timeout,
            fetch_timeout,
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> (T, &'static str)
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        None => (default, "default"),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(parsed) => (parsed, "env"),
            Err(err) => {
                warn!(variable = name, %raw, %err, "Invalid value; falling back to default");
                (default, "default_invalid_env")
            }
        },
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Duration,
) -> (Duration, &'static str) {
    let (millis, source) = parse_var(lookup, name, u64::try_from(default.as_millis()).unwrap_or(u64::MAX));
    (Duration::from_millis(millis), source)
}
