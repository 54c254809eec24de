//! Isolation boundary: the per-run sandbox document.
//!
//! Every run gets a freshly rendered document; nothing carries over from the
//! previous one. What ends up inside depends on the [`DocumentKind`]:
//!
//! - markup: the user's source verbatim. The user owns the whole document,
//!   scripts included; isolation is only the cross-document separation the
//!   preview provides.
//! - stylesheet: a fixed shell with the source inside its `<style>` block.
//! - script: a shell with two script blocks. The first is a bridge that sends
//!   console output and uncaught failures to the parent as
//!   `{type: "log", level, text, generation}` messages; the second runs the
//!   user program under a `try`/`catch` that reports the error it catches.
//!
//! The dynamic-interpreted mode never reaches this module; see
//! [`Mode::strategy`](crate::session::Mode::strategy).

mod shell;

use serde::{Deserialize, Serialize};

pub use shell::neutralize_closing_tag;

/// Identifier of one run. Script sandboxes tag their messages with it so the
/// output channel can tell a stale sandbox apart from the current one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl core::fmt::Display for Generation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// Modes that run inside a sandbox document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Markup,
    Stylesheet,
    Script,
}

/// Scripts embedded in a script-mode document, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumentation {
    pub bridge: String,
    pub program: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxDocument {
    pub kind: DocumentKind,
    pub generation: Generation,
    /// Complete HTML to assign to the sandbox.
    pub content: String,
    /// Present for script mode only.
    pub instrumentation: Option<Instrumentation>,
}

/// Render the sandbox document for one run.
#[must_use]
pub fn render(kind: DocumentKind, source: &str, generation: Generation) -> SandboxDocument {
    let (content, instrumentation) = match kind {
        DocumentKind::Markup => (source.to_string(), None),
        DocumentKind::Stylesheet => (shell::stylesheet(source), None),
        DocumentKind::Script => {
            let bridge = shell::bridge(generation);
            let program = shell::program(source);
            (
                shell::script_document(&bridge, &program),
                Some(Instrumentation { bridge, program }),
            )
        }
    };
    SandboxDocument {
        kind,
        generation,
        content,
        instrumentation,
    }
}
