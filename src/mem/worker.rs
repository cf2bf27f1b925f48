//! Asynchronous dataset prefetch worker.
//!
//! One worker per VM. The interpreter requests the next iteration's
//! line with [`PrefetchWorker::prepare_block`] and collects it with
//! [`PrefetchWorker::get_block`]; derivation overlaps with program
//! execution. The pairing is a single-slot rendezvous: at most one
//! request is in flight, and collecting a block for any address other
//! than the prepared one is a programming error.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};

use crate::config::CACHE_LINE_SIZE;
use crate::mem::MemError;
use crate::mem::cache::Cache;
use crate::mem::dataset::init_block_lanes;

/// Handle to the per-VM prefetch thread.
pub struct PrefetchWorker {
    requests: Option<SyncSender<u32>>,
    lines: Receiver<(u32, [u64; 8])>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchWorker {
    /// Spawns the worker over a shared cache.
    pub fn spawn(cache: Arc<Cache>) -> Result<Self, MemError> {
        let (request_tx, request_rx) = sync_channel::<u32>(1);
        let (line_tx, line_rx) = sync_channel::<(u32, [u64; 8])>(1);

        let handle = thread::Builder::new()
            .name("dataset-prefetch".into())
            .spawn(move || {
                while let Ok(addr) = request_rx.recv() {
                    let lanes = init_block_lanes(&cache, addr / CACHE_LINE_SIZE as u32);
                    if line_tx.send((addr, lanes)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| MemError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            requests: Some(request_tx),
            lines: line_rx,
            handle: Some(handle),
        })
    }

    /// Non-blocking request to derive the line at `addr`.
    pub fn prepare_block(&self, addr: u32) -> Result<(), MemError> {
        self.requests
            .as_ref()
            .ok_or(MemError::WorkerUnavailable)?
            .send(addr)
            .map_err(|_| MemError::WorkerUnavailable)
    }

    /// Blocks until the prepared line is ready and returns its lanes.
    ///
    /// `addr` must be the address passed to the last `prepare_block`.
    pub fn get_block(&self, addr: u32) -> Result<[u64; 8], MemError> {
        let (prepared, lanes) = self.lines.recv().map_err(|_| MemError::WorkerUnavailable)?;
        if prepared != addr {
            return Err(MemError::BlockNotPrepared {
                requested: addr,
                prepared,
            });
        }
        Ok(lanes)
    }
}

impl Drop for PrefetchWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache() -> Arc<Cache> {
        Arc::new(Cache::with_size(&[0x44u8; 32], 64 * 256).unwrap())
    }

    #[test]
    fn prepared_block_matches_inline_derivation() {
        let cache = small_cache();
        let worker = PrefetchWorker::spawn(cache.clone()).unwrap();
        for addr in [0u32, 64, 4096] {
            worker.prepare_block(addr).unwrap();
            let lanes = worker.get_block(addr).unwrap();
            assert_eq!(lanes, init_block_lanes(&cache, addr / 64));
        }
    }

    #[test]
    fn mismatched_address_is_an_error() {
        let worker = PrefetchWorker::spawn(small_cache()).unwrap();
        worker.prepare_block(64).unwrap();
        match worker.get_block(128) {
            Err(MemError::BlockNotPrepared {
                requested,
                prepared,
            }) => {
                assert_eq!(requested, 128);
                assert_eq!(prepared, 64);
            }
            other => panic!("expected BlockNotPrepared, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn worker_shuts_down_cleanly() {
        let worker = PrefetchWorker::spawn(small_cache()).unwrap();
        worker.prepare_block(0).unwrap();
        let _ = worker.get_block(0).unwrap();
        drop(worker);
    }
}
