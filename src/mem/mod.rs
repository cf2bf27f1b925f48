//! Memory subsystem: scratchpad, cache, dataset and the prefetch worker.

pub mod cache;
pub mod dataset;
pub mod scratchpad;
pub mod worker;

use randomvm_derive::Error;

/// Errors surfaced by the memory subsystem.
///
/// All of these are fatal for the VM that hits them; none occur during
/// well-formed execution.
#[derive(Debug, Error)]
pub enum MemError {
    /// Buffer reservation failed.
    #[error("allocation of {0} bytes failed")]
    Allocation(usize),
    /// The prefetch worker thread could not be spawned.
    #[error("failed to spawn prefetch worker: {0}")]
    WorkerSpawn(String),
    /// The prefetch worker thread is gone (channel closed).
    #[error("prefetch worker unavailable")]
    WorkerUnavailable,
    /// `get_block` asked for a different block than was prepared.
    #[error("requested block {requested:#x}, but block {prepared:#x} was prepared")]
    BlockNotPrepared { requested: u32, prepared: u32 },
}

/// Reserves an exactly-sized zeroed buffer, surfacing allocation failure
/// instead of aborting.
pub(crate) fn alloc_zeroed(bytes: usize) -> Result<Vec<u8>, MemError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(bytes)
        .map_err(|_| MemError::Allocation(bytes))?;
    buffer.resize(bytes, 0);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_zeroed_returns_zeroed_buffer() {
        let buffer = alloc_zeroed(1024).unwrap();
        assert_eq!(buffer.len(), 1024);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn error_messages_render() {
        let err = MemError::BlockNotPrepared {
            requested: 0x40,
            prepared: 0x80,
        };
        assert!(err.to_string().contains("0x40"));
        assert!(MemError::Allocation(7).to_string().contains('7'));
    }
}
