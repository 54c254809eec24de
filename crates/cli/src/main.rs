use std::{
    env::args,
    io::{Read, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, anyhow, bail};
use playground::{
    Generation, HeadlessPreview, Mode, OutputChannel, Playground, PlaygroundConfig, RunOutcome,
    RuntimeLoader, Session, Strategy, runtime::wasm::WasmRuntimeBuilder, sandbox, session,
};
use tracing::{info, warn};
use url::Url;

mod host;
mod trace;

const DEFAULT_PAGE: &str = "http://localhost:8000/";

const USAGE: &str = "usage:
  playground share <mode> <file|-> [page-url]
  playground open <link|token>
  playground render <mode> <file|-> [out.html]
  playground run <mode> <file|-> [preview.html]

modes: html, css, js, py";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    trace::init_tracing()?;

    let args: Vec<String> = args().skip(1).collect();
    let arg = |index: usize| args.get(index).map(String::as_str);

    match arg(0) {
        Some("share") => {
            let session = read_session(arg(1), arg(2))?;
            let page = Url::parse(arg(3).unwrap_or(DEFAULT_PAGE)).context("invalid page url")?;
            println!("{}", session::share_link(&page, &session));
            Ok(())
        }
        Some("open") => {
            let input = arg(1).ok_or_else(|| anyhow!(USAGE))?;
            let token = Url::parse(input)
                .ok()
                .and_then(|url| url.fragment().map(str::to_string))
                .unwrap_or_else(|| input.to_string());
            let decoded = session::decode(&token, &Session::default());
            info!(mode = %decoded.session.mode, warnings = decoded.warnings.len(), "Session restored");
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(decoded.session.source.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
        Some("render") => {
            let session = read_session(arg(1), arg(2))?;
            let Strategy::Document(kind) = session.mode.strategy() else {
                bail!("{} sources run in the dynamic runtime and have no document", session.mode);
            };
            let document = sandbox::render(kind, &session.source, Generation::default());
            match arg(3) {
                Some(out) => {
                    std::fs::write(out, &document.content)
                        .with_context(|| format!("failed to write {out}"))?;
                    info!(path = out, "Sandbox document written");
                }
                None => println!("{}", document.content),
            }
            Ok(())
        }
        Some("run") => {
            let session = read_session(arg(1), arg(2))?;
            let config = PlaygroundConfig::from_env();

            let channel = Arc::new(OutputChannel::new(Arc::new(host::StdoutDisplay)));
            let preview = host::FilePreview::new(
                HeadlessPreview::from_config(Arc::clone(&channel), &config),
                arg(3).map(PathBuf::from),
            );
            let provider = WasmRuntimeBuilder::from_config(&config).build(config.runtime.clone())?;
            let playground = Playground::new(
                channel,
                Arc::new(preview),
                Arc::new(RuntimeLoader::new(provider)),
            );

            let report = playground.run(&session).await;
            if report.outcome == RunOutcome::Failed {
                bail!("run failed");
            }
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            Ok(())
        }
    }
}

fn read_session(mode: Option<&str>, file: Option<&str>) -> anyhow::Result<Session> {
    let (Some(mode), Some(file)) = (mode, file) else {
        bail!(USAGE);
    };
    let mode: Mode = mode.parse()?;

    let source = if file == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        source
    } else {
        std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?
    };
    if source.is_empty() {
        warn!("Source is empty");
    }
    Ok(Session::new(mode, source))
}
