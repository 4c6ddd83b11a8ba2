//! ## Configuration
//!
//! Process-wide knobs for the engine: the chunk size used to drain bulk-in
//! and frame bulk-out, and the default control/bulk timeout. Both are
//! clamped on construction the same way the class spec's reference
//! implementation clamps its module parameters.
//!

use crate::constants::misc::{
    DEFAULT_IO_BUFFER_SIZE, DEFAULT_TIMEOUT_MS, MIN_IO_BUFFER_SIZE, MIN_TIMEOUT_MS,
};

/// IO buffer size and default timeout, shared by every handle opened
/// against a device configured with it.
#[derive(Debug, Clone, Copy)]
pub struct IoConfig {
    io_buffer_size: usize,
    default_timeout_ms: u64,
}

impl IoConfig {
    /// Construct a config, clamping `io_buffer_size` to at least 512 bytes
    /// and rounding it down to a multiple of 4, and clamping
    /// `default_timeout_ms` to at least 500ms.
    pub fn new(io_buffer_size: usize, default_timeout_ms: u64) -> Self {
        let io_buffer_size = io_buffer_size.max(MIN_IO_BUFFER_SIZE) / 4 * 4;
        let default_timeout_ms = default_timeout_ms.max(MIN_TIMEOUT_MS);
        IoConfig {
            io_buffer_size,
            default_timeout_ms,
        }
    }

    pub fn io_buffer_size(&self) -> usize {
        self.io_buffer_size
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms
    }

    pub fn default_timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig::new(DEFAULT_IO_BUFFER_SIZE, DEFAULT_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_below_minimums() {
        let cfg = IoConfig::new(16, 10);
        assert_eq!(cfg.io_buffer_size(), MIN_IO_BUFFER_SIZE);
        assert_eq!(cfg.default_timeout_ms(), MIN_TIMEOUT_MS);
    }

    #[test]
    fn rounds_buffer_size_down_to_multiple_of_4() {
        let cfg = IoConfig::new(2050, 5000);
        assert_eq!(cfg.io_buffer_size() % 4, 0);
        assert_eq!(cfg.io_buffer_size(), 2048);
    }

    #[test]
    fn default_matches_spec_defaults() {
        let cfg = IoConfig::default();
        assert_eq!(cfg.io_buffer_size(), DEFAULT_IO_BUFFER_SIZE);
        assert_eq!(cfg.default_timeout_ms(), DEFAULT_TIMEOUT_MS);
    }
}
