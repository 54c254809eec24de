use wasmtime::{Config, OptLevel};

/// Guest stack budget. Deep user recursion traps instead of exhausting the
/// fiber stack evaluations run on.
pub const MAX_WASM_STACK: usize = 256 * 1024;

/// Engine settings for runtime guests.
///
/// Guests are plain core modules driven through `call_async`, so the engine
/// needs async support. Epoch interruption lets the ticker preempt a
/// runaway evaluation or initializer.
pub fn configure_engine(cfg: &mut Config) {
    cfg.async_support(true);
    cfg.epoch_interruption(true);
    cfg.max_wasm_stack(MAX_WASM_STACK);
    cfg.table_lazy_init(false);
    cfg.generate_address_map(false);
    cfg.wasm_backtrace(false);
    cfg.native_unwind_info(false);
    cfg.cranelift_opt_level(OptLevel::Speed);
}
