//! The only thing FAT32 needs from the world below it: a way to read (and,
//! for symmetry, write) fixed 512-byte blocks by index.
//!
//! This crate never imports `sdcard` and never will: the directory resolver
//! "uses C4 exclusively — it does not know the card exists." Anything that
//! can produce 512-byte blocks by index can sit underneath this crate.

/// The only block size this crate understands. FAT32 volumes with a
/// different sector size are rejected by [`crate::FatBoot::read`].
pub const BLOCK_SIZE: usize = 512;

/// A source of fixed-size blocks.
///
/// Implementors are not required to be thread-safe; the core assumes
/// single-threaded, non-reentrant access, matching the concurrency model of
/// the SD card this is normally layered over.
pub trait BlockDevice {
    /// Device-specific I/O failure. Carried opaquely by [`crate::FatError::Device`].
    type Error: core::fmt::Debug;

    /// Reads block `block` (a 0-based LBA) into `buf`.
    fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
}
