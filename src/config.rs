//! Scheme constants.
//!
//! Sizes, masks and counts shared by the program generator, the
//! interpreter and the memory subsystem. These values define the
//! revision of the scheme; changing any of them changes every digest.

/// Number of instructions in one program.
pub const PROGRAM_LENGTH: usize = 256;

/// Number of times the program is executed per chain step.
pub const INSTRUCTION_COUNT: usize = 2048;

/// Number of chained program executions per nonce.
pub const CHAIN_LENGTH: usize = 8;

/// Number of 64-bit integer registers.
pub const REGISTERS_COUNT: usize = 8;

/// Number of 128-bit floating point registers per group (f, e, a).
pub const FLOAT_REGISTERS_COUNT: usize = 4;

/// Raw instruction size in bytes.
pub const INSTRUCTION_SIZE: usize = 8;

/// Entropy header size in bytes (16 x u64), filled by the expander ahead
/// of the instruction stream.
pub const ENTROPY_SIZE: usize = 128;

/// Total program buffer size filled by the expander per chain step.
pub const PROGRAM_BUFFER_SIZE: usize = ENTROPY_SIZE + PROGRAM_LENGTH * INSTRUCTION_SIZE;

/// Scratchpad size: 2 MiB.
pub const SCRATCHPAD_SIZE: usize = 2 * 1024 * 1024;

/// L1-level scratchpad mask (16 KiB window, 8-byte aligned).
pub const SCRATCHPAD_L1_MASK: u32 = 0x3FF8;

/// L2-level scratchpad mask (256 KiB window, 8-byte aligned).
pub const SCRATCHPAD_L2_MASK: u32 = 0x3FFF8;

/// L3-level scratchpad mask (full 2 MiB, 8-byte aligned).
pub const SCRATCHPAD_L3_MASK: u32 = 0x1FFFF8;

/// L3-level scratchpad mask, 64-byte aligned.
pub const SCRATCHPAD_L3_MASK_64: u32 = 0x1FFFC0;

/// Dataset/cache line size in bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Mask aligning a 32-bit dataset address down to a cache line.
pub const CACHE_LINE_ALIGN_MASK: u32 = 0xFFFF_FFC0;

/// Cache size: 256 MiB.
pub const CACHE_SIZE: usize = 256 * 1024 * 1024;

/// Dataset size: 4 GiB.
pub const DATASET_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Number of 64-byte lines in the dataset.
pub const DATASET_BLOCK_COUNT: u32 = (DATASET_SIZE / CACHE_LINE_SIZE as u64) as u32;

/// Mixing rounds performed by the dataset line deriver.
pub const DATASET_INIT_ROUNDS: usize = 16;

/// Number of 128-bit AES round keys in the cache key schedule.
pub const CACHE_KEY_COUNT: usize = 10;

/// Block template size in bytes.
pub const TEMPLATE_SIZE: usize = 76;

/// Byte offset of the 4-byte nonce within the block template.
pub const NONCE_OFFSET: usize = 39;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_are_eight_byte_aligned() {
        assert_eq!(SCRATCHPAD_L1_MASK % 8, 0);
        assert_eq!(SCRATCHPAD_L2_MASK % 8, 0);
        assert_eq!(SCRATCHPAD_L3_MASK % 8, 0);
        assert_eq!(SCRATCHPAD_L3_MASK_64 % 64, 0);
    }

    #[test]
    fn masks_stay_inside_the_scratchpad() {
        assert!((SCRATCHPAD_L3_MASK as usize) < SCRATCHPAD_SIZE);
        assert!((SCRATCHPAD_L3_MASK_64 as usize) + CACHE_LINE_SIZE <= SCRATCHPAD_SIZE);
    }

    #[test]
    fn dataset_block_count_covers_four_gib() {
        assert_eq!(DATASET_BLOCK_COUNT, 67_108_864);
        assert_eq!(DATASET_BLOCK_COUNT as u64 * CACHE_LINE_SIZE as u64, DATASET_SIZE);
    }
}
