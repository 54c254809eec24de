use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    sandbox::SandboxDocument,
    session::{Mode, Session},
};

/// Source editor owned by the embedder.
pub trait Editor: Send + Sync {
    fn mode(&self) -> Mode;
    fn source(&self) -> String;
    /// Replace the edited session, e.g. when restoring a shared link.
    fn replace(&self, session: Session);
}

/// Isolated preview surface. Showing a document discards the previous one.
pub trait Preview: Send + Sync + 'static {
    fn show(&self, document: SandboxDocument);
}

/// Where transcript lines are displayed.
pub trait TranscriptDisplay: Send + Sync + 'static {
    fn append_line(&self, line: &str);
    fn clear(&self);
}

impl<T: Preview + ?Sized> Preview for Arc<T> {
    fn show(&self, document: SandboxDocument) {
        (**self).show(document);
    }
}

impl<T: TranscriptDisplay + ?Sized> TranscriptDisplay for Arc<T> {
    fn append_line(&self, line: &str) {
        (**self).append_line(line);
    }

    fn clear(&self) {
        (**self).clear();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPreview;

impl Preview for NoopPreview {
    fn show(&self, _document: SandboxDocument) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDisplay;

impl TranscriptDisplay for NoopDisplay {
    fn append_line(&self, _line: &str) {}

    fn clear(&self) {}
}

/// Display that keeps its lines in memory.
#[derive(Debug, Default)]
pub struct MemoryDisplay {
    lines: Mutex<Vec<String>>,
}

impl MemoryDisplay {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl TranscriptDisplay for MemoryDisplay {
    fn append_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }

    fn clear(&self) {
        self.lines.lock().clear();
    }
}

/// Preview that remembers the last document it was shown.
#[derive(Debug, Default)]
pub struct MemoryPreview {
    last: Mutex<Option<SandboxDocument>>,
}

impl MemoryPreview {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last(&self) -> Option<SandboxDocument> {
        self.last.lock().clone()
    }
}

impl Preview for MemoryPreview {
    fn show(&self, document: SandboxDocument) {
        *self.last.lock() = Some(document);
    }
}
