//! Sandbox configuration
//!
//! Limits for compilation steps and the isolate box id range owned by this worker.

use std::sync::atomic::{AtomicU32, Ordering};

/// Isolate only supports box ids 0-9999
const MAX_BOX_ID: u32 = 10_000;

/// Box ids handed out per worker before wrapping
pub const BOX_RANGE: u32 = 1000;

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Compile time limit in milliseconds (default: 30000ms = 30s)
    pub compile_time_limit_ms: u32,
    /// Compile memory limit in MB (default: 2048MB)
    pub compile_memory_limit_mb: u32,
    /// First box id of this worker's range
    pub box_base: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            compile_time_limit_ms: 30_000,
            compile_memory_limit_mb: 2048,
            box_base: 0,
        }
    }
}

/// Hands out box ids cycling within `[base, base + BOX_RANGE)`
#[derive(Debug)]
pub struct BoxAllocator {
    base: u32,
    counter: AtomicU32,
}

impl BoxAllocator {
    pub fn new(base: u32) -> Self {
        // Keep the whole range inside isolate's limit
        let base = (base % MAX_BOX_ID) / BOX_RANGE * BOX_RANGE;
        Self {
            base,
            counter: AtomicU32::new(0),
        }
    }

    pub fn next(&self) -> u32 {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.base + n % BOX_RANGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_ids_wrap_within_range() {
        let alloc = BoxAllocator::new(3000);
        assert_eq!(alloc.next(), 3000);
        assert_eq!(alloc.next(), 3001);

        for _ in 0..(BOX_RANGE - 2) {
            alloc.next();
        }
        assert_eq!(alloc.next(), 3000);
    }

    #[test]
    fn test_base_is_aligned_and_bounded() {
        assert_eq!(BoxAllocator::new(3456).next(), 3000);
        assert_eq!(BoxAllocator::new(12_345).next(), 2000);
    }
}
