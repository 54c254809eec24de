use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use playground::{
    EvaluationError, LoadError, LoaderStatus, Mode, OutputChannel, Playground, RunOutcome,
    RuntimeLoader, RuntimeSource, Session,
    dispatcher::{LOADING_MESSAGE, READY_MESSAGE},
    host::{MemoryDisplay, NoopPreview},
    runtime::wasm::{WasmRuntimeBuilder, WasmRuntimeProvider},
};
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// Minimal runtime speaking the guest ABI. Source starting with `!` raises
/// `boom`, source starting with `~` never returns, anything else evaluates
/// to `"4"`.
const GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (global $next (mut i32) (i32.const 4096))
  (data (i32.const 16) "{\"value\":\"4\"}")
  (data (i32.const 64) "{\"error\":\"boom\"}")

  (func (export "playground_init")
    (global.set $next (i32.const 8192)))

  (func (export "playground_alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $next))
    (global.set $next (i32.add (global.get $next) (local.get $len)))
    (local.get $ptr))

  (func (export "playground_eval") (param $ptr i32) (param $len i32) (result i64)
    (local $first i32)
    (local.set $first (i32.load8_u (local.get $ptr)))
    (if (i32.eq (local.get $first) (i32.const 126))
      (then (loop $spin (br $spin))))
    (if (i32.eq (local.get $first) (i32.const 33))
      (then (return (i64.or (i64.shl (i64.const 64) (i64.const 32)) (i64.const 16)))))
    (i64.or (i64.shl (i64.const 16) (i64.const 32)) (i64.const 13))))
"#;

/// Exports memory and an allocator but no evaluation entry point.
const BROKEN_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "playground_alloc") (param i32) (result i32) (i32.const 0)))
"#;

/// Valid exports, but the initializer never returns.
const SPINNING_INIT_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "playground_alloc") (param i32) (result i32) (i32.const 0))
  (func (export "playground_eval") (param i32 i32) (result i64) (i64.const 0))
  (func (export "playground_init") (loop $spin (br $spin))))
"#;

/// Every evaluation asks for sixteen more pages and traps when refused.
const GREEDY_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "playground_alloc") (param i32) (result i32) (i32.const 0))
  (func (export "playground_eval") (param i32 i32) (result i64)
    (if (i32.eq (memory.grow (i32.const 16)) (i32.const -1))
      (then unreachable))
    (i64.const 0)))
"#;

/// Every evaluation recurses without bound.
const RECURSIVE_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func $descend (param i32) (result i32)
    (call $descend (i32.add (local.get 0) (i32.const 1))))
  (func (export "playground_alloc") (param i32) (result i32) (i32.const 0))
  (func (export "playground_eval") (param i32 i32) (result i64)
    (drop (call $descend (i32.const 0)))
    (i64.const 0)))
"#;

/// Replies with a 4 GiB region starting past the end of its memory.
const STRAY_REPLY_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "playground_alloc") (param i32) (result i32) (i32.const 0))
  (func (export "playground_eval") (param i32 i32) (result i64)
    (i64.const 0x0001_0000_ffff_ffff)))
"#;

async fn serve(body: &str, expected_fetches: u64) -> Result<(MockServer, RuntimeSource)> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/runtime.wat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(expected_fetches)
        .mount(&server)
        .await;
    let url = Url::parse(&format!("{}/runtime.wat", server.uri()))?;
    Ok((server, RuntimeSource::Remote(url)))
}

fn provider(source: RuntimeSource) -> Result<WasmRuntimeProvider> {
    WasmRuntimeBuilder::default()
        .eval_timeout(Duration::from_millis(200))
        .build(source)
        .context("build wasm provider")
}

#[tokio::test]
async fn concurrent_loads_share_one_fetch() -> Result<()> {
    let (server, source) = serve(GUEST, 1).await?;
    let loader = RuntimeLoader::new(provider(source)?);

    let (a, b) = tokio::join!(loader.ensure_runtime(), loader.ensure_runtime());
    let (a, b) = (a?, b?);

    assert!(a.same_as(&b));
    assert_eq!(loader.status(), LoaderStatus::Ready);
    assert_eq!(loader.load_attempts(), 1);
    assert!(loader.ensure_runtime().await?.same_as(&a));
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn evaluates_through_the_playground() -> Result<()> {
    let (_server, source) = serve(GUEST, 1).await?;
    let display = MemoryDisplay::shared();
    let channel = Arc::new(OutputChannel::new(display.clone()));
    let playground = Playground::new(
        Arc::clone(&channel),
        Arc::new(NoopPreview),
        Arc::new(RuntimeLoader::new(provider(source)?)),
    );

    let report = playground
        .run(&Session::new(Mode::Interpreted, "2+2"))
        .await;
    assert_eq!(report.outcome, RunOutcome::Evaluated);
    assert_eq!(display.lines(), vec![LOADING_MESSAGE, READY_MESSAGE, "4"]);

    let report = playground
        .run(&Session::new(Mode::Interpreted, "!raise"))
        .await;
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(channel.lines(), vec!["[err] boom"]);
    Ok(())
}

#[tokio::test]
async fn runaway_evaluation_times_out() -> Result<()> {
    let (_server, source) = serve(GUEST, 1).await?;
    let loader = RuntimeLoader::new(provider(source)?);
    let runtime = loader.ensure_runtime().await?;

    let error = runtime
        .evaluate("~forever")
        .await
        .expect_err("evaluation must be stopped");
    assert_eq!(error, EvaluationError::TimedOut(200));

    assert_eq!(runtime.evaluate("2+2").await?, Some("4".to_string()));
    Ok(())
}

#[tokio::test]
async fn refused_memory_growth_is_out_of_memory() -> Result<()> {
    let (_server, source) = serve(GREEDY_GUEST, 1).await?;
    let provider = WasmRuntimeBuilder::default()
        .max_memory(128 * 1024)
        .build(source)?;
    let runtime = RuntimeLoader::new(provider).ensure_runtime().await?;

    let error = runtime
        .evaluate("x = [0] * 10**9")
        .await
        .expect_err("growth must be refused");
    assert_eq!(
        error,
        EvaluationError::OutOfMemory {
            requested: 17 * 64 * 1024,
            limit: 128 * 1024,
        }
    );
    Ok(())
}

#[tokio::test]
async fn unbounded_recursion_is_a_runtime_fault() -> Result<()> {
    let (_server, source) = serve(RECURSIVE_GUEST, 1).await?;
    let runtime = RuntimeLoader::new(provider(source)?)
        .ensure_runtime()
        .await?;

    let error = runtime
        .evaluate("def f(n): return f(n + 1)")
        .await
        .expect_err("recursion must trap");
    assert!(matches!(error, EvaluationError::Guest(_)), "{error}");
    Ok(())
}

#[tokio::test]
async fn reply_outside_guest_memory_is_a_runtime_fault() -> Result<()> {
    let (_server, source) = serve(STRAY_REPLY_GUEST, 1).await?;
    let runtime = RuntimeLoader::new(provider(source)?)
        .ensure_runtime()
        .await?;

    let error = runtime
        .evaluate("1")
        .await
        .expect_err("reply must be rejected");
    assert!(
        matches!(&error, EvaluationError::Guest(message) if message.contains("outside guest memory")),
        "{error}"
    );
    Ok(())
}

#[tokio::test]
async fn failed_fetch_is_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/runtime.wat"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runtime.wat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(GUEST))
        .expect(1)
        .mount(&server)
        .await;
    let url = Url::parse(&format!("{}/runtime.wat", server.uri()))?;
    let loader = RuntimeLoader::new(provider(RuntimeSource::Remote(url))?);

    let error = loader.ensure_runtime().await.expect_err("first fetch fails");
    assert!(matches!(error, LoadError::Fetch { .. }), "{error}");
    assert_eq!(loader.status(), LoaderStatus::Uninitialized);

    let runtime = loader.ensure_runtime().await?;
    assert_eq!(runtime.evaluate("1+3").await?, Some("4".to_string()));
    assert_eq!(loader.load_attempts(), 2);
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn missing_export_fails_initialization() -> Result<()> {
    let (_server, source) = serve(BROKEN_GUEST, 1).await?;
    let loader = RuntimeLoader::new(provider(source)?);

    let error = loader.ensure_runtime().await.expect_err("must not load");
    assert!(matches!(error, LoadError::Initialize(_)), "{error}");
    Ok(())
}

#[tokio::test]
async fn runaway_initializer_times_out() -> Result<()> {
    let (_server, source) = serve(SPINNING_INIT_GUEST, 1).await?;
    let provider = WasmRuntimeBuilder::default()
        .init_timeout(Duration::from_millis(200))
        .build(source)?;
    let loader = RuntimeLoader::new(provider);

    let error = tokio::time::timeout(Duration::from_secs(10), loader.ensure_runtime())
        .await
        .context("initializer was not interrupted")?
        .expect_err("must not load");

    assert!(
        matches!(&error, LoadError::Initialize(message) if message.contains("timed out")),
        "{error}"
    );
    assert_eq!(loader.status(), LoaderStatus::Uninitialized);
    Ok(())
}

#[tokio::test]
async fn invalid_artifact_fails_compilation() -> Result<()> {
    let (_server, source) = serve("definitely not wasm", 1).await?;
    let loader = RuntimeLoader::new(provider(source)?);

    let error = loader.ensure_runtime().await.expect_err("must not load");
    assert!(matches!(error, LoadError::Compile(_)), "{error}");
    Ok(())
}

fn cached_files(dir: &Path) -> Result<usize> {
    Ok(std::fs::read_dir(dir)?
        .flatten()
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "cwasm"))
        .count())
}

#[tokio::test]
async fn compiled_artifact_is_cached() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let artifact = cache.path().join("runtime.wat");
    std::fs::write(&artifact, GUEST)?;
    let cache_dir = cache.path().join("compiled");

    for _ in 0..2 {
        let provider = WasmRuntimeBuilder::default()
            .cache(Some(cache_dir.clone()))
            .build(RuntimeSource::Local(artifact.clone()))?;
        let runtime = RuntimeLoader::new(provider).ensure_runtime().await?;
        assert_eq!(runtime.evaluate("2+2").await?, Some("4".to_string()));
        assert_eq!(cached_files(&cache_dir)?, 1);
    }
    Ok(())
}

#[tokio::test]
async fn missing_local_artifact_is_a_fetch_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let loader = RuntimeLoader::new(provider(RuntimeSource::Local(
        dir.path().join("absent.wasm"),
    ))?);

    let error = loader.ensure_runtime().await.expect_err("must not load");
    assert!(matches!(error, LoadError::Fetch { .. }), "{error}");
    Ok(())
}
