mod internal;

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod preview;
pub mod runtime;
pub mod sandbox;
pub mod session;

/// Target of events carrying output produced by user code.
pub const TRACE_TARGET_SANDBOX: &str = "playground::sandbox";

pub use channel::{Delivery, InboundMessage, LogEvent, LogKind, OutputChannel};
pub use config::{PlaygroundConfig, RuntimeSource};
pub use dispatcher::{Playground, RunOutcome, RunReport};
pub use error::{DecodeError, Error, EvaluationError, LoadError, Result};
pub use host::{Editor, Preview, TranscriptDisplay};
#[cfg(feature = "headless")]
pub use preview::HeadlessPreview;
pub use runtime::{Interpreter, LoaderStatus, RuntimeHandle, RuntimeLoader, RuntimeProvider};
pub use sandbox::{DocumentKind, Generation, SandboxDocument};
pub use session::{Decoded, Mode, Session, Strategy};
