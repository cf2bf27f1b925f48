//! Multi-threaded nonce loop.
//!
//! Worker threads claim nonces from a shared atomic counter; each owns
//! one VM (and in async light mode its prefetch worker). Per-nonce
//! digests are XOR-folded into a shared aggregate, so the result is
//! independent of which thread hashed which nonce.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;

use crate::config::TEMPLATE_SIZE;
use crate::core::hasher::hash_nonce;
use crate::mem::MemError;
use crate::mem::cache::Cache;
use crate::mem::dataset::{Dataset, DatasetSource};
use crate::types::digest::HashDigest;
use crate::utils::log::Logger;
use crate::vm::machine::Vm;
use std::sync::Arc;

/// Runtime configuration of the benchmark harness.
#[derive(Clone, Debug)]
pub struct MinerConfig {
    /// Number of worker threads (and VMs).
    pub threads: usize,
    /// Number of nonces to hash, starting from zero.
    pub nonces: u32,
    /// Mining mode materializes the full dataset; verification mode
    /// derives lines from the cache.
    pub mining: bool,
    /// Overlap dataset derivation with execution (light mode only).
    pub async_worker: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            nonces: 1000,
            mining: false,
            async_worker: false,
        }
    }
}

/// XOR aggregate of all produced digests.
///
/// XOR is commutative, so the aggregate is identical however the nonces
/// are distributed over threads.
pub struct DigestAggregate {
    lanes: [AtomicU64; 4],
}

impl DigestAggregate {
    pub fn new() -> Self {
        Self {
            lanes: [const { AtomicU64::new(0) }; 4],
        }
    }

    /// Folds one digest into the aggregate.
    pub fn xor_with(&self, digest: &HashDigest) {
        for (i, lane) in self.lanes.iter().enumerate() {
            let word = u64::from_le_bytes(digest.0[i * 8..(i + 1) * 8].try_into().unwrap());
            lane.fetch_xor(word, Ordering::Relaxed);
        }
    }

    /// The aggregate as a digest value.
    pub fn digest(&self) -> HashDigest {
        let mut bytes = [0u8; 32];
        for (i, lane) in self.lanes.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&lane.load(Ordering::Relaxed).to_le_bytes());
        }
        HashDigest(bytes)
    }
}

impl Default for DigestAggregate {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the dataset source for a configuration.
pub fn build_source(cache: Arc<Cache>, config: &MinerConfig) -> Result<DatasetSource, MemError> {
    if config.mining {
        let dataset = Dataset::initialize(&cache, config.threads)?;
        Ok(DatasetSource::Full(Arc::new(dataset)))
    } else {
        Ok(DatasetSource::Light(cache))
    }
}

/// Hashes nonces `0..config.nonces` across `config.threads` VMs built
/// by `factory`, returning the XOR aggregate of all digests.
pub fn mine_with<F>(
    factory: F,
    config: &MinerConfig,
    template: &[u8; TEMPLATE_SIZE],
) -> Result<HashDigest, MemError>
where
    F: Fn() -> Result<Vm, MemError> + Sync,
{
    let counter = AtomicU32::new(0);
    let aggregate = DigestAggregate::new();

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.threads);
        for index in 0..config.threads.max(1) {
            let factory = &factory;
            let counter = &counter;
            let aggregate = &aggregate;
            handles.push(scope.spawn(move || -> Result<(), MemError> {
                let logger = Logger::new(format!("miner-{}", index));
                let mut vm = factory()?;
                let mut hashed = 0u64;
                loop {
                    let nonce = counter.fetch_add(1, Ordering::Relaxed);
                    if nonce >= config.nonces {
                        break;
                    }
                    let digest = hash_nonce(&mut vm, template, nonce)?;
                    aggregate.xor_with(&digest);
                    hashed += 1;
                }
                logger.info(&format!("hashed {} nonces", hashed));
                Ok(())
            }));
        }
        for handle in handles {
            handle
                .join()
                .unwrap_or(Err(MemError::WorkerUnavailable))?;
        }
        Ok(())
    })?;

    Ok(aggregate.digest())
}

/// Hashes nonces with VMs reading from `source`.
pub fn mine(
    source: &DatasetSource,
    config: &MinerConfig,
    template: &[u8; TEMPLATE_SIZE],
) -> Result<HashDigest, MemError> {
    mine_with(
        || Vm::new(source.clone(), config.async_worker),
        config,
        template,
    )
}
