use std::{io::Write, path::PathBuf};

use playground::{HeadlessPreview, Preview, SandboxDocument, TranscriptDisplay};
use tracing::{info, warn};

/// Prints transcript lines as they arrive.
pub struct StdoutDisplay;

impl TranscriptDisplay for StdoutDisplay {
    fn append_line(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(error) = writeln!(stdout, "{line}") {
            warn!(%error, "Failed to write transcript line");
        }
    }

    fn clear(&self) {}
}

/// Executes script documents headlessly and optionally writes every shown
/// document to a file.
pub struct FilePreview {
    headless: HeadlessPreview,
    output: Option<PathBuf>,
}

impl FilePreview {
    pub const fn new(headless: HeadlessPreview, output: Option<PathBuf>) -> Self {
        Self { headless, output }
    }
}

impl Preview for FilePreview {
    fn show(&self, document: SandboxDocument) {
        if let Some(path) = &self.output {
            match std::fs::write(path, &document.content) {
                Ok(()) => info!(path = %path.display(), kind = ?document.kind, "Preview written"),
                Err(error) => warn!(path = %path.display(), %error, "Failed to write preview"),
            }
        }
        self.headless.show(document);
    }
}
