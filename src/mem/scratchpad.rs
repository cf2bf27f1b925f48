//! 2 MiB per-VM scratchpad.
//!
//! All addresses handed to the accessors are precomputed as
//! `register & mask` with masks that keep the access inside the buffer,
//! so the accessors index directly. Loads and stores are little-endian.

use crate::config::SCRATCHPAD_SIZE;
use crate::crypto::aes_stream::fill_aes_stream;
use crate::mem::{MemError, alloc_zeroed};
use crate::vm::fpu::FloatPair;

/// Contiguous scratch memory exclusively owned by one VM.
pub struct Scratchpad {
    memory: Vec<u8>,
}

impl Scratchpad {
    /// Allocates a zeroed scratchpad.
    pub fn new() -> Result<Self, MemError> {
        Ok(Self {
            memory: alloc_zeroed(SCRATCHPAD_SIZE)?,
        })
    }

    /// Refills the whole scratchpad from a 64-byte seed hash.
    pub fn fill_from(&mut self, seed: &[u8; 64]) {
        fill_aes_stream(seed, &mut self.memory);
    }

    /// Unaligned little-endian 8-byte load.
    #[inline]
    pub fn load64(&self, addr: u32) -> u64 {
        let addr = addr as usize;
        u64::from_le_bytes(self.memory[addr..addr + 8].try_into().unwrap())
    }

    /// Unaligned little-endian 8-byte store.
    #[inline]
    pub fn store64(&mut self, addr: u32, value: u64) {
        let addr = addr as usize;
        self.memory[addr..addr + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// 16-byte aligned paired-double store.
    #[inline]
    pub fn store_pair(&mut self, addr: u32, pair: FloatPair) {
        debug_assert_eq!(addr % 16, 0);
        let (lo, hi) = pair.to_bits();
        self.store64(addr, lo);
        self.store64(addr + 8, hi);
    }

    /// 16-byte aligned paired-double load.
    #[inline]
    pub fn load_pair(&self, addr: u32) -> FloatPair {
        debug_assert_eq!(addr % 16, 0);
        FloatPair::from_bits(self.load64(addr), self.load64(addr + 8))
    }

    /// The raw bytes, consumed by the result finalizer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SCRATCHPAD_L3_MASK;

    #[test]
    fn store_load_round_trip() {
        let mut sp = Scratchpad::new().unwrap();
        sp.store64(40, 0x1122_3344_5566_7788);
        assert_eq!(sp.load64(40), 0x1122_3344_5566_7788);
        // little-endian byte order
        assert_eq!(sp.as_bytes()[40], 0x88);
    }

    #[test]
    fn unaligned_loads_work() {
        let mut sp = Scratchpad::new().unwrap();
        sp.store64(3, u64::MAX);
        assert_eq!(sp.load64(3), u64::MAX);
        assert_eq!(sp.load64(11), 0);
    }

    #[test]
    fn highest_masked_address_is_in_bounds() {
        let mut sp = Scratchpad::new().unwrap();
        sp.store64(SCRATCHPAD_L3_MASK, 7);
        assert_eq!(sp.load64(SCRATCHPAD_L3_MASK), 7);
    }

    #[test]
    fn pair_round_trips_bit_patterns() {
        let mut sp = Scratchpad::new().unwrap();
        let pair = FloatPair::from_bits(0x7FF8_0000_0000_0001, 0x8000_0000_0000_0000);
        sp.store_pair(64, pair);
        let back = sp.load_pair(64);
        assert_eq!(back.to_bits(), pair.to_bits());
    }

    #[test]
    fn fill_is_deterministic_and_covers_buffer() {
        let mut a = Scratchpad::new().unwrap();
        let mut b = Scratchpad::new().unwrap();
        a.fill_from(&[0x77u8; 64]);
        b.fill_from(&[0x77u8; 64]);
        assert_eq!(a.load64(0), b.load64(0));
        assert_eq!(
            a.load64(SCRATCHPAD_L3_MASK),
            b.load64(SCRATCHPAD_L3_MASK)
        );
        // the tail of the buffer is not left zeroed
        assert_ne!(a.load64(SCRATCHPAD_L3_MASK), 0);
    }
}
