//! Buffering and loading settings for a `Source`.

use crate::consts::{BUFFER_FRAGMENT_LENGTH, RELOAD_MINIMUM_SEEK_DISTANCE};

/// Number of pool blocks the loader may fill ahead of the consumer by default.
pub const DEFAULT_BUFFER_BLOCKS: usize = 5;

/// Number of times a recoverable load failure is retried at its resume position.
pub const DEFAULT_MAX_LOAD_RETRIES: usize = 3;

/// Settings for a `Source`.
///
/// ```rs
/// let config = SourceConfig::default()
///     .with_block_size(64 * 1024)
///     .with_buffer_limit_bytes(8 * 64 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Length in bytes of each pool block.
    pub block_size: usize,
    /// Bytes the loader may hold in the pool before
    /// it stops requesting more data.
    pub buffer_limit_bytes: usize,
    /// Forward skips at or above this distance
    /// reopen the byte source instead.
    pub reload_threshold: u64,
    /// Commit every track's samples, not only the selected track's.
    pub load_all_tracks: bool,
    /// Recoverable load failures retried before the error is surfaced.
    pub max_load_retries: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            block_size: BUFFER_FRAGMENT_LENGTH,
            buffer_limit_bytes: DEFAULT_BUFFER_BLOCKS * BUFFER_FRAGMENT_LENGTH,
            reload_threshold: RELOAD_MINIMUM_SEEK_DISTANCE,
            load_all_tracks: false,
            max_load_retries: DEFAULT_MAX_LOAD_RETRIES,
        }
    }
}

impl SourceConfig {
    pub fn with_block_size(self, block_size: usize) -> Self {
        Self {block_size: block_size.max(1), ..self}
    }

    pub fn with_buffer_limit_bytes(self, buffer_limit_bytes: usize) -> Self {
        Self {buffer_limit_bytes, ..self}
    }

    /// Buffer limit expressed as a number of pool blocks.
    pub fn with_buffer_limit_blocks(self, blocks: usize) -> Self {
        let buffer_limit_bytes = blocks * self.block_size;
        Self {buffer_limit_bytes, ..self}
    }

    pub fn with_reload_threshold(self, reload_threshold: u64) -> Self {
        Self {reload_threshold, ..self}
    }

    pub fn with_load_all_tracks(self, load_all_tracks: bool) -> Self {
        Self {load_all_tracks, ..self}
    }

    pub fn with_max_load_retries(self, max_load_retries: usize) -> Self {
        Self {max_load_retries, ..self}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_builders() {
        let config = SourceConfig::default();
        assert_eq!(config.block_size, 256 * 1024);
        assert_eq!(config.buffer_limit_bytes, 5 * 256 * 1024);
        assert_eq!(config.reload_threshold, 256 * 1024);
        assert!(!config.load_all_tracks);

        let config = SourceConfig::default()
            .with_block_size(100)
            .with_buffer_limit_blocks(2);
        assert_eq!(config.buffer_limit_bytes, 200);
    }
}
