use playground::TRACE_TARGET_SANDBOX;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Diagnostics go to stderr; stdout carries command output only.
///
/// Sandbox output already reaches stdout through the transcript, so its
/// events stay off unless `RUST_LOG` names the target explicitly.
pub fn init_tracing() -> anyhow::Result<()> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env()?;
    let explicit = std::env::var("RUST_LOG").is_ok_and(|v| v.contains(TRACE_TARGET_SANDBOX));
    if !explicit {
        filter = filter.add_directive(format!("{TRACE_TARGET_SANDBOX}=off").parse()?);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
    Ok(())
}
