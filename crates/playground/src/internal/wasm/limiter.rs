use wasmtime::ResourceLimiter;

/// Caps guest linear memory and table growth and remembers the last refused
/// memory growth so a failed evaluation can be reported as out of memory.
pub struct MemoryLimiter {
    max_memory: usize,
    max_table_elements: usize,
    current: usize,
    peak: usize,
    refused: Option<usize>,
}

impl MemoryLimiter {
    pub fn new(max_memory: usize) -> Self {
        // Tables hold host-side slots; they share the memory budget.
        const BYTES_PER_TABLE_ELEMENT: usize = 64;
        const MIN_TABLE_ELEMENTS: usize = 1024;

        Self {
            max_memory,
            max_table_elements: (max_memory / BYTES_PER_TABLE_ELEMENT).max(MIN_TABLE_ELEMENTS),
            current: 0,
            peak: 0,
            refused: None,
        }
    }

    pub const fn limit(&self) -> usize {
        self.max_memory
    }

    pub const fn current(&self) -> usize {
        self.current
    }

    /// Largest memory size the guest has held since instantiation.
    pub const fn peak(&self) -> usize {
        self.peak
    }

    /// Size of the memory growth refused since the last call, if any.
    pub fn take_refused(&mut self) -> Option<usize> {
        self.refused.take()
    }
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.max_memory {
            self.refused = Some(desired);
            return Ok(false);
        }
        self.current = desired;
        self.peak = self.peak.max(desired);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= self.max_table_elements)
    }
}
