//! Dataset lines: on-demand derivation and the resident 4 GiB table.
//!
//! A dataset line is 64 bytes addressed by its block index. In light
//! mode [`init_block`] derives a line directly from the cache; in full
//! (mining) mode the whole table is materialized up front, with the
//! block range partitioned across threads.

use std::sync::Arc;
use std::thread;

use crate::config::{CACHE_LINE_SIZE, DATASET_BLOCK_COUNT, DATASET_INIT_ROUNDS};
use crate::crypto::aes_stream::aes_round;
use crate::mem::cache::Cache;
use crate::mem::{MemError, alloc_zeroed};
use crate::utils::log::Logger;

/// Derives the 64-byte dataset line at `block_index` from the cache.
///
/// The state starts from the block index, then takes
/// [`DATASET_INIT_ROUNDS`] mixing rounds: a cache line selected by the
/// evolving state is folded in and every 16-byte lane takes one AES
/// round with the schedule key for that round.
pub fn init_block(cache: &Cache, out: &mut [u8; CACHE_LINE_SIZE], block_index: u32) {
    let keys = cache.keys();
    let mut state = [[0u8; 16]; 4];
    for (lane, block) in state.iter_mut().enumerate() {
        block[..4].copy_from_slice(&block_index.to_le_bytes());
        block[4] = lane as u8;
    }

    for round in 0..DATASET_INIT_ROUNDS {
        let selector = u64::from_le_bytes(state[round % 4][..8].try_into().unwrap());
        let line = cache.line(selector % cache.line_count());
        let key = &keys[round % keys.len()];
        for (lane, block) in state.iter_mut().enumerate() {
            for (b, byte) in block.iter_mut().enumerate() {
                *byte ^= line[lane * 16 + b];
            }
            aes_round(block, key);
        }
    }

    for (lane, block) in state.iter().enumerate() {
        out[lane * 16..(lane + 1) * 16].copy_from_slice(block);
    }
}

/// Derives a line and splits it into its eight 64-bit lanes.
pub fn init_block_lanes(cache: &Cache, block_index: u32) -> [u64; 8] {
    let mut bytes = [0u8; CACHE_LINE_SIZE];
    init_block(cache, &mut bytes, block_index);
    lanes_from(&bytes)
}

/// Reads a 64-byte line as eight little-endian u64 lanes.
pub fn lanes_from(bytes: &[u8]) -> [u64; 8] {
    let mut lanes = [0u64; 8];
    for (i, lane) in lanes.iter_mut().enumerate() {
        *lane = u64::from_le_bytes(bytes[i * 8..(i + 1) * 8].try_into().unwrap());
    }
    lanes
}

/// Fully materialized dataset.
pub struct Dataset {
    memory: Vec<u8>,
    block_count: u32,
}

impl Dataset {
    /// Builds the resident 4 GiB dataset, splitting the block range
    /// across `threads` initializer threads.
    pub fn initialize(cache: &Cache, threads: usize) -> Result<Self, MemError> {
        Self::with_block_count(cache, DATASET_BLOCK_COUNT, threads)
    }

    /// Builds a dataset over a reduced block range. Intended for tests;
    /// a reduced dataset only serves addresses below
    /// `block_count * 64`.
    pub fn with_block_count(
        cache: &Cache,
        block_count: u32,
        threads: usize,
    ) -> Result<Self, MemError> {
        debug_assert!(block_count > 0);
        let bytes = block_count as usize * CACHE_LINE_SIZE;
        let mut memory = alloc_zeroed(bytes)?;
        let threads = threads.clamp(1, block_count.max(1) as usize);
        let per_thread = (block_count as usize).div_ceil(threads);
        let logger = Logger::new("dataset-init");

        thread::scope(|scope| {
            for (slice_index, slice) in memory
                .chunks_mut(per_thread * CACHE_LINE_SIZE)
                .enumerate()
            {
                let first_block = (slice_index * per_thread) as u32;
                scope.spawn(move || {
                    for (i, line) in slice.chunks_exact_mut(CACHE_LINE_SIZE).enumerate() {
                        let mut out = [0u8; CACHE_LINE_SIZE];
                        init_block(cache, &mut out, first_block + i as u32);
                        line.copy_from_slice(&out);
                    }
                });
            }
        });

        logger.info(&format!(
            "initialized {} dataset blocks on {} threads",
            block_count, threads
        ));
        Ok(Self {
            memory,
            block_count,
        })
    }

    /// Number of blocks this dataset serves.
    #[inline]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// The eight lanes of the line at `block_index`.
    #[inline]
    pub fn block(&self, block_index: u32) -> [u64; 8] {
        let offset = block_index as usize * CACHE_LINE_SIZE;
        lanes_from(&self.memory[offset..offset + CACHE_LINE_SIZE])
    }
}

/// Where a VM reads dataset lines from.
#[derive(Clone)]
pub enum DatasetSource {
    /// Resident table (mining mode).
    Full(Arc<Dataset>),
    /// On-demand derivation from the cache (verification mode).
    Light(Arc<Cache>),
}

impl DatasetSource {
    /// The eight lanes of the line at the 64-byte-aligned address `addr`.
    #[inline]
    pub fn line(&self, addr: u32) -> [u64; 8] {
        let block_index = addr / CACHE_LINE_SIZE as u32;
        match self {
            DatasetSource::Full(dataset) => dataset.block(block_index),
            DatasetSource::Light(cache) => init_block_lanes(cache, block_index),
        }
    }
}
