//! Seed-derived cache.
//!
//! The cache is the 256 MiB table from which dataset lines are derived
//! on demand. It is built once per seed - the 32-byte key is widened to
//! a 64-byte state by Blake2b-512 and expanded by the AES keystream -
//! and is immutable afterwards, so miner threads share it by reference.

use crate::config::{CACHE_KEY_COUNT, CACHE_LINE_SIZE, CACHE_SIZE};
use crate::crypto::aes_stream::{AesKey, derive_cache_keys, fill_aes_stream};
use crate::mem::{MemError, alloc_zeroed};
use crate::types::digest::seed_hash;

/// Immutable cache plus its AES key schedule.
pub struct Cache {
    memory: Vec<u8>,
    keys: [AesKey; CACHE_KEY_COUNT],
}

impl Cache {
    /// Builds the full 256 MiB cache for a seed.
    pub fn new(seed: &[u8; 32]) -> Result<Self, MemError> {
        Self::with_size(seed, CACHE_SIZE)
    }

    /// Builds a reduced cache. Intended for tests and tooling; digests
    /// produced over a reduced cache are not comparable to full-size
    /// ones. `size` must be a positive multiple of the line size.
    pub fn with_size(seed: &[u8; 32], size: usize) -> Result<Self, MemError> {
        debug_assert!(size > 0 && size % CACHE_LINE_SIZE == 0);
        let mut memory = alloc_zeroed(size)?;
        let state = seed_hash(seed);
        fill_aes_stream(&state, &mut memory);
        Ok(Self {
            memory,
            keys: derive_cache_keys(seed),
        })
    }

    /// Number of 64-byte lines in the cache.
    #[inline]
    pub fn line_count(&self) -> u64 {
        (self.memory.len() / CACHE_LINE_SIZE) as u64
    }

    /// One 64-byte cache line.
    #[inline]
    pub fn line(&self, index: u64) -> &[u8] {
        let offset = index as usize * CACHE_LINE_SIZE;
        &self.memory[offset..offset + CACHE_LINE_SIZE]
    }

    /// The AES round keys consumed by the dataset line deriver.
    #[inline]
    pub fn keys(&self) -> &[AesKey; CACHE_KEY_COUNT] {
        &self.keys
    }
}
