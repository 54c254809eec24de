use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Non-fatal problem found while restoring a session from a share token.
///
/// Decoding never fails; these are reported next to the restored session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown mode {0:?}; falling back to html")]
    UnknownMode(String),

    #[error("share token carries no code")]
    MissingCode,

    #[error("could not decode shared code: {0}")]
    InvalidPayload(String),
}

/// Failure to bring the dynamic runtime to the ready state.
///
/// Cloneable so a single failed attempt reaches every caller that waited on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("failed to fetch runtime from {location}: {reason}")]
    Fetch { location: String, reason: String },

    #[error("failed to compile runtime: {0}")]
    Compile(String),

    #[error("failed to initialize runtime: {0}")]
    Initialize(String),

    #[error("runtime load was abandoned before completing")]
    Abandoned,
}

/// Failure of user source inside the dynamic runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// The program raised; the message is the runtime's own description.
    #[error("{0}")]
    Raised(String),

    #[error("evaluation timed out after {0}ms")]
    TimedOut(u128),

    /// A memory growth past the configured cap was refused and the guest
    /// could not recover from it.
    #[error("runtime ran out of memory: needed {requested} bytes, limit is {limit}")]
    OutOfMemory { requested: usize, limit: usize },

    /// The guest trapped.
    #[error("runtime fault: {0}")]
    Guest(String),

    /// The guest replied with something that is not a valid evaluation reply.
    #[error("malformed runtime reply: {0}")]
    Protocol(String),
}

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid embedder-supplied configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Wasmtime engine error (engine setup, instantiation, trap).
    #[cfg(feature = "wasm")]
    #[error("wasm error: {0}")]
    Wasm(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Headless script engine setup failure.
    #[cfg(feature = "headless")]
    #[error("script engine error: {0}")]
    Script(String),
}
