use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rquickjs::{Context, Ctx, Function, Runtime};
use tracing::{debug, warn};

use crate::{
    channel::{LogEvent, OutputChannel},
    config::{DEFAULT_SCRIPT_TIMEOUT, PlaygroundConfig},
    error::{Error, Result},
    host::Preview,
    sandbox::{DocumentKind, SandboxDocument},
};

const DEFAULT_MEMORY_LIMIT: usize = 32 * 1024 * 1024;
const MAX_STACK_SIZE: usize = 1024 * 1024;

const POST_HOOK: &str = "__playground_post";
const PROGRAM_SLOT: &str = "__playground_program";

/// The slice of the browser environment the instrumentation relies on.
const BOOTSTRAP: &str = r"
globalThis.window = globalThis;
globalThis.self = globalThis;
globalThis.console = {};
globalThis.document = { title: '', body: { style: {}, innerHTML: '' } };
(function () {
  const post = globalThis.__playground_post;
  const listeners = {};
  globalThis.addEventListener = (type, listener) => {
    (listeners[type] = listeners[type] || []).push(listener);
  };
  globalThis.__playground_dispatch = (type, event) => {
    for (const listener of listeners[type] || []) {
      try { listener(event); } catch (_) {}
    }
  };
  globalThis.parent = {
    postMessage: (message, _origin) => post(JSON.stringify(message)),
  };
})();
";

/// Runs the program as a separate script. A program that does not parse
/// surfaces as a window `error` event, the way a failing `<script>` would.
const RUN_PROGRAM: &str = r"
try {
  (0, eval)(globalThis.__playground_program);
} catch (e) {
  __playground_dispatch('error', { message: String(e), error: e });
}
";

/// Preview that executes script-mode documents in an embedded QuickJS engine.
///
/// Every document runs in a fresh runtime; nothing survives between runs.
/// Messages the sandbox posts to its parent go straight into the output
/// channel. Markup and stylesheet documents have nothing to execute and are
/// only kept as the last shown document.
///
/// Promise rejections nobody handles are not reported.
pub struct HeadlessPreview {
    channel: Arc<OutputChannel>,
    script_timeout: Duration,
    memory_limit: usize,
    last: Mutex<Option<SandboxDocument>>,
}

impl HeadlessPreview {
    pub fn new(channel: Arc<OutputChannel>) -> Self {
        Self {
            channel,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            last: Mutex::new(None),
        }
    }

    pub fn from_config(channel: Arc<OutputChannel>, config: &PlaygroundConfig) -> Self {
        Self::new(channel).script_timeout(config.script_timeout)
    }

    #[must_use]
    pub const fn script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    pub fn last(&self) -> Option<SandboxDocument> {
        self.last.lock().clone()
    }

    /// Execute the document's scripts to completion, including queued jobs.
    ///
    /// Failures of the user program are reported through the channel like in
    /// a browser; only engine problems and the timeout are returned.
    ///
    /// # Errors
    /// Returns [`Error::Script`] when the engine cannot be set up, the
    /// instrumentation fails, or the script timeout expires.
    pub fn execute(&self, document: &SandboxDocument) -> Result<()> {
        let Some(instrumentation) = &document.instrumentation else {
            return Ok(());
        };

        let runtime = Runtime::new().map_err(script_error)?;
        runtime.set_memory_limit(self.memory_limit);
        runtime.set_max_stack_size(MAX_STACK_SIZE);
        let deadline = Instant::now() + self.script_timeout;
        runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));
        let context = Context::full(&runtime).map_err(script_error)?;

        let timed_out = || {
            Error::Script(format!(
                "script timed out after {}ms",
                self.script_timeout.as_millis()
            ))
        };

        context.with(|ctx| {
            let channel = Arc::clone(&self.channel);
            let post = Function::new(ctx.clone(), move |json: String| {
                channel.receive_json(&json);
            })
            .map_err(script_error)?;

            let globals = ctx.globals();
            globals.set(POST_HOOK, post).map_err(script_error)?;
            globals
                .set(PROGRAM_SLOT, instrumentation.program.as_str())
                .map_err(script_error)?;

            for script in [BOOTSTRAP, instrumentation.bridge.as_str(), RUN_PROGRAM] {
                if let Err(error) = eval(&ctx, script) {
                    return Err(if Instant::now() >= deadline {
                        timed_out()
                    } else {
                        error
                    });
                }
            }
            Ok(())
        })?;

        loop {
            match runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) if Instant::now() >= deadline => return Err(timed_out()),
                Err(_) => debug!("Pending job raised"),
            }
        }
        Ok(())
    }
}

impl Preview for HeadlessPreview {
    fn show(&self, document: SandboxDocument) {
        if document.kind == DocumentKind::Script {
            if let Err(error) = self.execute(&document) {
                warn!(generation = %document.generation, %error, "Script document failed");
                self.channel.append(LogEvent::error(error.to_string()));
            }
        }
        *self.last.lock() = Some(document);
    }
}

fn eval(ctx: &Ctx<'_>, source: &str) -> Result<()> {
    ctx.eval::<(), _>(source).map_err(|_| {
        let caught = ctx.catch();
        Error::Script(caught.as_exception().map_or_else(
            || format!("{caught:?}"),
            |exception| exception.message().unwrap_or_default(),
        ))
    })
}

#[allow(clippy::needless_pass_by_value)]
fn script_error(error: rquickjs::Error) -> Error {
    Error::Script(error.to_string())
}
