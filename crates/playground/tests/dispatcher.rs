use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use playground::{
    DocumentKind, EvaluationError, Generation, Interpreter, LoadError, Mode, OutputChannel,
    Playground, RunOutcome, RuntimeHandle, RuntimeLoader, RuntimeProvider, Session,
    dispatcher::{LOADING_MESSAGE, READY_MESSAGE},
    host::{MemoryDisplay, MemoryPreview},
};
use tokio::sync::Semaphore;

/// Evaluates `a+b` integer sums; `raise <msg>` raises, `pass` yields nothing.
struct Calculator;

#[async_trait]
impl Interpreter for Calculator {
    async fn evaluate(&self, source: &str) -> Result<Option<String>, EvaluationError> {
        let source = source.trim();
        if source == "pass" {
            return Ok(None);
        }
        if let Some(message) = source.strip_prefix("raise ") {
            return Err(EvaluationError::Raised(message.to_string()));
        }
        let sum = source
            .split('+')
            .map(|term| term.trim().parse::<i64>())
            .sum::<Result<i64, _>>()
            .map_err(|e| EvaluationError::Raised(format!("SyntaxError: {e}")))?;
        Ok(Some(sum.to_string()))
    }
}

/// Fails the first `failures` loads, then succeeds. Each load waits for a
/// permit when gated.
struct FlakyProvider {
    failures: usize,
    loads: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FlakyProvider {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            loads: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(0)
        }
    }
}

#[async_trait]
impl RuntimeProvider for FlakyProvider {
    async fn load(&self) -> Result<RuntimeHandle, LoadError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|_| LoadError::Abandoned)?.forget();
        }
        let load = self.loads.fetch_add(1, Ordering::SeqCst);
        if load < self.failures {
            return Err(LoadError::Fetch {
                location: "https://cdn.invalid/runtime.wasm".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(RuntimeHandle::new(Calculator))
    }
}

struct Fixture {
    display: Arc<MemoryDisplay>,
    preview: Arc<MemoryPreview>,
    channel: Arc<OutputChannel>,
    playground: Playground,
}

fn fixture(provider: impl RuntimeProvider) -> Fixture {
    let display = MemoryDisplay::shared();
    let preview = MemoryPreview::shared();
    let channel = Arc::new(OutputChannel::new(display.clone()));
    let playground = Playground::new(
        Arc::clone(&channel),
        preview.clone(),
        Arc::new(RuntimeLoader::new(provider)),
    );
    Fixture {
        display,
        preview,
        channel,
        playground,
    }
}

#[tokio::test]
async fn interpreted_sum_is_reported() -> Result<()> {
    let fx = fixture(FlakyProvider::new(0));

    let report = fx
        .playground
        .run(&Session::new(Mode::Interpreted, "2+2"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Evaluated);
    assert_eq!(
        fx.channel.lines(),
        vec![LOADING_MESSAGE, READY_MESSAGE, "4"]
    );
    assert_eq!(fx.display.lines(), fx.channel.lines());
    Ok(())
}

#[tokio::test]
async fn loading_lines_appear_only_on_first_run() -> Result<()> {
    let fx = fixture(FlakyProvider::new(0));

    fx.playground
        .run(&Session::new(Mode::Interpreted, "1+1"))
        .await;
    fx.playground
        .run(&Session::new(Mode::Interpreted, "3+4"))
        .await;

    assert_eq!(fx.channel.lines(), vec!["7"]);
    Ok(())
}

#[tokio::test]
async fn raised_error_becomes_error_entry() -> Result<()> {
    let fx = fixture(FlakyProvider::new(0));

    let report = fx
        .playground
        .run(&Session::new(Mode::Interpreted, "raise NameError: x"))
        .await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    let entries = fx.channel.entries();
    let last = entries.last().expect("error entry");
    assert!(last.is_error());
    assert_eq!(last.text, "NameError: x");
    Ok(())
}

#[tokio::test]
async fn no_value_appends_nothing() -> Result<()> {
    let fx = fixture(FlakyProvider::new(0));

    fx.playground
        .run(&Session::new(Mode::Interpreted, "pass"))
        .await;

    assert_eq!(fx.channel.lines(), vec![LOADING_MESSAGE, READY_MESSAGE]);
    Ok(())
}

#[tokio::test]
async fn failed_load_is_retried_on_next_run() -> Result<()> {
    let provider = Arc::new(FlakyProvider::new(1));
    let display = MemoryDisplay::shared();
    let channel = Arc::new(OutputChannel::new(display));
    let loader = Arc::new(RuntimeLoader::from_arc(provider.clone()));
    let playground = Playground::new(
        Arc::clone(&channel),
        MemoryPreview::shared(),
        Arc::clone(&loader),
    );

    let first = playground
        .run(&Session::new(Mode::Interpreted, "2+2"))
        .await;
    assert_eq!(first.outcome, RunOutcome::Failed);
    let lines = channel.lines();
    assert_eq!(lines[0], LOADING_MESSAGE);
    assert!(lines[1].starts_with("[err] "), "{lines:?}");
    assert!(lines[1].contains("connection refused"), "{lines:?}");

    let second = playground
        .run(&Session::new(Mode::Interpreted, "2+2"))
        .await;
    assert_eq!(second.outcome, RunOutcome::Evaluated);
    assert_eq!(channel.lines(), vec![LOADING_MESSAGE, READY_MESSAGE, "4"]);
    assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
    assert_eq!(loader.load_attempts(), 2);
    Ok(())
}

#[tokio::test]
async fn superseded_run_appends_nothing() -> Result<()> {
    let gate = Arc::new(Semaphore::new(0));
    let fx = Arc::new(fixture(FlakyProvider::gated(Arc::clone(&gate))));

    let slow = tokio::spawn({
        let fx = Arc::clone(&fx);
        async move {
            fx.playground
                .run(&Session::new(Mode::Interpreted, "1+1"))
                .await
        }
    });
    while fx.channel.lines().is_empty() {
        tokio::task::yield_now().await;
    }

    let markup = fx
        .playground
        .run(&Session::new(Mode::Markup, "<p>hi</p>"))
        .await;
    assert_eq!(markup.outcome, RunOutcome::Rendered(DocumentKind::Markup));

    let slow = slow.await?;
    assert_eq!(slow.outcome, RunOutcome::Cancelled);
    assert!(slow.generation < markup.generation);

    gate.add_permits(1);
    while fx.playground.loader().status() != playground::LoaderStatus::Ready {
        tokio::task::yield_now().await;
    }
    assert!(fx.channel.lines().is_empty(), "{:?}", fx.channel.lines());
    Ok(())
}

#[tokio::test]
async fn explicit_cancel_stops_pending_run() -> Result<()> {
    let gate = Arc::new(Semaphore::new(0));
    let fx = Arc::new(fixture(FlakyProvider::gated(Arc::clone(&gate))));

    let pending = tokio::spawn({
        let fx = Arc::clone(&fx);
        async move {
            fx.playground
                .run(&Session::new(Mode::Interpreted, "1+1"))
                .await
        }
    });
    while fx.channel.lines().is_empty() {
        tokio::task::yield_now().await;
    }
    fx.playground.cancel();

    assert_eq!(pending.await?.outcome, RunOutcome::Cancelled);
    assert_eq!(fx.channel.lines(), vec![LOADING_MESSAGE]);
    Ok(())
}

#[tokio::test]
async fn document_modes_reach_the_preview() -> Result<()> {
    let fx = fixture(FlakyProvider::new(0));

    for (mode, kind) in [
        (Mode::Markup, DocumentKind::Markup),
        (Mode::Stylesheet, DocumentKind::Stylesheet),
        (Mode::Script, DocumentKind::Script),
    ] {
        let report = fx.playground.run(&Session::example(mode)).await;
        assert_eq!(report.outcome, RunOutcome::Rendered(kind));

        let shown = fx.preview.last().expect("document shown");
        assert_eq!(shown.kind, kind);
        assert_eq!(shown.generation, report.generation);
    }
    assert_eq!(fx.playground.loader().load_attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn messages_from_replaced_sandbox_are_dropped() -> Result<()> {
    let fx = fixture(FlakyProvider::new(0));

    let first = fx
        .playground
        .run(&Session::new(Mode::Script, "console.log('one')"))
        .await;
    let second = fx
        .playground
        .run(&Session::new(Mode::Script, "console.log('two')"))
        .await;
    assert_eq!(second.generation, first.generation.next());

    let late = format!(
        r#"{{"type":"log","text":"one","generation":{}}}"#,
        first.generation
    );
    let current = format!(
        r#"{{"type":"log","text":"two","generation":{}}}"#,
        second.generation
    );
    assert_eq!(fx.channel.receive_json(&late), playground::Delivery::Stale);
    assert_eq!(
        fx.channel.receive_json(&current),
        playground::Delivery::Accepted
    );
    assert_eq!(fx.channel.lines(), vec!["two"]);
    assert!(second.generation > Generation::default());
    Ok(())
}
