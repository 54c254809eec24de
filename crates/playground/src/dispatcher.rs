//! Execution dispatcher: routes a session to its strategy.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use crate::{
    channel::{LogEvent, OutputChannel},
    host::Preview,
    runtime::{LoaderStatus, RuntimeLoader},
    sandbox::{self, DocumentKind, Generation},
    session::{Session, Strategy},
};

pub const LOADING_MESSAGE: &str = "Loading runtime (may take a few seconds)...";
pub const READY_MESSAGE: &str = "Runtime ready.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A sandbox document was handed to the preview.
    Rendered(DocumentKind),
    /// The interpreter evaluated the source.
    Evaluated,
    /// Loading the runtime or evaluating the source failed; the transcript
    /// holds the error entry.
    Failed,
    /// A newer run (or [`Playground::cancel`]) replaced this one before it
    /// finished. Nothing was appended on its behalf.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub generation: Generation,
    pub outcome: RunOutcome,
}

/// Runs sessions against the preview and the dynamic runtime.
///
/// Starting a run cancels the previous one; a run suspended on the runtime
/// checks its token before touching the transcript.
pub struct Playground {
    channel: Arc<OutputChannel>,
    preview: Arc<dyn Preview>,
    loader: Arc<RuntimeLoader>,
    current: Mutex<Option<(Generation, CancellationToken)>>,
}

impl Playground {
    pub fn new(
        channel: Arc<OutputChannel>,
        preview: Arc<dyn Preview>,
        loader: Arc<RuntimeLoader>,
    ) -> Self {
        Self {
            channel,
            preview,
            loader,
            current: Mutex::new(None),
        }
    }

    pub const fn channel(&self) -> &Arc<OutputChannel> {
        &self.channel
    }

    pub const fn loader(&self) -> &Arc<RuntimeLoader> {
        &self.loader
    }

    /// Cancel the run in progress, if any.
    pub fn cancel(&self) {
        if let Some((_, token)) = self.current.lock().take() {
            token.cancel();
        }
    }

    pub async fn run(&self, session: &Session) -> RunReport {
        let (generation, token) = {
            let mut current = self.current.lock();
            if let Some((_, previous)) = current.take() {
                previous.cancel();
            }
            let generation = self.channel.begin_run();
            let token = CancellationToken::new();
            *current = Some((generation, token.clone()));
            (generation, token)
        };

        let span = info_span!("run", mode = %session.mode, %generation);
        info!(parent: &span, "Run started");

        let outcome = match session.mode.strategy() {
            Strategy::Document(kind) => {
                let _guard = span.enter();
                self.preview
                    .show(sandbox::render(kind, &session.source, generation));
                RunOutcome::Rendered(kind)
            }
            Strategy::Interpreter => {
                self.interpret(&session.source, generation, &token)
                    .instrument(span.clone())
                    .await
            }
        };

        {
            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|(g, _)| *g == generation) {
                *current = None;
            }
        }
        debug!(parent: &span, ?outcome, "Run finished");

        RunReport {
            generation,
            outcome,
        }
    }

    async fn interpret(
        &self,
        source: &str,
        generation: Generation,
        token: &CancellationToken,
    ) -> RunOutcome {
        let append = |event: LogEvent| self.channel.append_for(generation, event);
        let announce = self.loader.status() != LoaderStatus::Ready;
        if announce {
            append(LogEvent::info(LOADING_MESSAGE));
        }

        let loaded = tokio::select! {
            () = token.cancelled() => return RunOutcome::Cancelled,
            loaded = self.loader.ensure_runtime() => loaded,
        };
        let runtime = match loaded {
            Ok(runtime) => runtime,
            Err(error) => {
                if token.is_cancelled() {
                    return RunOutcome::Cancelled;
                }
                append(LogEvent::error(error.to_string()));
                return RunOutcome::Failed;
            }
        };
        if token.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        if announce {
            append(LogEvent::info(READY_MESSAGE));
        }

        let evaluated = tokio::select! {
            () = token.cancelled() => return RunOutcome::Cancelled,
            evaluated = runtime.evaluate(source) => evaluated,
        };
        if token.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        match evaluated {
            Ok(Some(value)) => {
                append(LogEvent::info(value));
                RunOutcome::Evaluated
            }
            Ok(None) => RunOutcome::Evaluated,
            Err(error) => {
                append(LogEvent::error(error.to_string()));
                RunOutcome::Failed
            }
        }
    }
}
