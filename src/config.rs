//! Compile-time reserver configuration.
//!
//! The spec's size-class-style tuning surface here is just three integers
//! (chunk alignment, default block size, bitfield word width), so rather than
//! reach for a build-time code generator it is expressed directly as
//! associated constants on a trait, the way a small fixed configuration is
//! normally done in Rust.

/// Compile-time knobs for a [`crate::reserver::Reserver`].
pub trait ReserverConfig: Copy + Default + 'static {
    /// Chunk size in bytes; every reservation is a whole number of chunks of
    /// this size. Must be a power of two.
    const CHUNK_ALIGN: usize;
    /// Block capacity (in bytes) reserved from the OS when the pool needs a
    /// new block and the request does not itself exceed this size.
    const DEFAULT_BLOCK_SIZE: usize;
    /// Width in bits of one bitfield table word.
    const WORD_BITS: usize = usize::BITS as usize;
}

/// The spec's own defaults: 16-byte chunks, 64 KiB blocks, native `usize` words.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultConfig;

impl ReserverConfig for DefaultConfig {
    const CHUNK_ALIGN: usize = 16;
    const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_power_of_two_aligned() {
        assert_eq!(
            DefaultConfig::CHUNK_ALIGN & (DefaultConfig::CHUNK_ALIGN - 1),
            0
        );
        assert_eq!(
            DefaultConfig::DEFAULT_BLOCK_SIZE % DefaultConfig::CHUNK_ALIGN,
            0
        );
    }
}
