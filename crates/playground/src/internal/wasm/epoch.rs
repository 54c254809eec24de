use std::{
    collections::HashMap,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use wasmtime::Engine;

/// Granularity of evaluation deadlines and of guest yields to the executor.
pub const EPOCH_TICK: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Engines {
    registered: Mutex<HashMap<u64, Engine>>,
    next_id: AtomicU64,
}

/// Keeps an engine's epoch advancing until dropped.
pub struct TickerRegistration {
    id: u64,
    engines: Arc<Engines>,
}

impl Drop for TickerRegistration {
    fn drop(&mut self) {
        self.engines.registered.lock().remove(&self.id);
    }
}

/// Register `engine` with the process-wide epoch ticker thread, starting the
/// thread on first use.
pub fn register(engine: Engine) -> std::io::Result<Arc<TickerRegistration>> {
    static TICKER: OnceLock<Result<Arc<Engines>, (std::io::ErrorKind, String)>> = OnceLock::new();

    let engines = match TICKER.get_or_init(|| start_ticker().map_err(|e| (e.kind(), e.to_string())))
    {
        Ok(engines) => Arc::clone(engines),
        Err((kind, message)) => return Err(std::io::Error::new(*kind, message.clone())),
    };

    let id = engines.next_id.fetch_add(1, Ordering::Relaxed);
    engines.registered.lock().insert(id, engine);
    Ok(Arc::new(TickerRegistration { id, engines }))
}

fn start_ticker() -> std::io::Result<Arc<Engines>> {
    let engines = Arc::new(Engines::default());
    let background = Arc::clone(&engines);
    // A plain thread keeps ticking even when a current-thread Tokio runtime is
    // busy inside a guest call.
    std::thread::Builder::new()
        .name("playground-epoch-ticker".to_string())
        .spawn(move || {
            loop {
                std::thread::park_timeout(EPOCH_TICK);
                let engines: Vec<Engine> = background.registered.lock().values().cloned().collect();
                for engine in engines {
                    engine.increment_epoch();
                }
            }
        })?;
    Ok(engines)
}
