//! AES-round keystream primitives.
//!
//! Three fixed collaborators of the hashing core are built from single
//! AES rounds over a 64-byte (4 x 16-byte column) state:
//!
//! - [`fill_aes_stream`]: deterministic expander seeded by a 64-byte
//!   hash, used to fill the program buffer and the scratchpad.
//! - [`hash_aes_stream`]: 64-byte fingerprint of a large buffer, used to
//!   fold the scratchpad into the `a` register group before the final
//!   digest.
//! - [`derive_cache_keys`]: the per-seed AES key schedule consumed by
//!   the dataset line deriver.
//!
//! Columns alternate between the encryption and decryption round
//! function so that no column is a plain iterated cipher. The `aes`
//! crate picks AES-NI or its software fallback at build time; both
//! produce identical bytes.

use aes::Block;
use aes::hazmat::{cipher_round, equiv_inv_cipher_round};
use blake2::{Blake2b512, Digest as _};

use crate::config::{CACHE_KEY_COUNT, CACHE_LINE_SIZE};

/// A 128-bit AES round key.
pub type AesKey = [u8; 16];

/// Generator round keys for the expander columns.
const FILL_KEYS: [AesKey; 4] = [
    [
        0x6d, 0xaa, 0x4c, 0x86, 0x3b, 0x22, 0x5e, 0x79, 0x11, 0xc3, 0x0f, 0xe8, 0x94, 0x57, 0xd0,
        0x35,
    ],
    [
        0xb2, 0x18, 0xe6, 0x41, 0x7a, 0x9f, 0x03, 0xcd, 0x58, 0x26, 0xbe, 0x90, 0xf4, 0x6b, 0x1d,
        0xa7,
    ],
    [
        0x2f, 0xc1, 0x85, 0x5a, 0xe0, 0x13, 0x9b, 0x36, 0xd9, 0x74, 0x4e, 0xa2, 0x08, 0xcf, 0x67,
        0xb0,
    ],
    [
        0x81, 0x3d, 0xf2, 0x1e, 0x49, 0xd6, 0xaf, 0x60, 0x25, 0xbb, 0x70, 0x0c, 0xe3, 0x92, 0x5c,
        0x88,
    ],
];

/// Initial column state of the buffer fingerprint.
const HASH_INIT: [AesKey; 4] = [
    [
        0x09, 0xf7, 0x6e, 0x24, 0xd1, 0x40, 0x8a, 0xbc, 0x53, 0xe9, 0x17, 0x62, 0xfd, 0x0b, 0xc8,
        0x75,
    ],
    [
        0xc4, 0x32, 0x99, 0x07, 0x6c, 0xde, 0x21, 0xf8, 0x44, 0xb1, 0x5f, 0xea, 0x96, 0x38, 0x0d,
        0x52,
    ],
    [
        0x7b, 0x50, 0x1c, 0xe4, 0x2d, 0x87, 0xf0, 0x4b, 0xae, 0x65, 0xd3, 0x19, 0x80, 0xc6, 0x3a,
        0x9e,
    ],
    [
        0xe1, 0x8b, 0x47, 0xa0, 0x16, 0x7d, 0x34, 0xd8, 0x02, 0x9c, 0xeb, 0x56, 0x28, 0xf3, 0x61,
        0xcb,
    ],
];

/// Finalization round keys of the buffer fingerprint.
const HASH_FINAL_KEYS: [AesKey; 2] = [
    [
        0x4a, 0xd7, 0x23, 0x98, 0x01, 0x6f, 0xb5, 0xec, 0x72, 0x3e, 0xc9, 0x14, 0x5b, 0xa6, 0x8f,
        0xd0,
    ],
    [
        0x35, 0x82, 0xff, 0x48, 0xdb, 0x27, 0x9a, 0x04, 0xc7, 0x51, 0x6a, 0xbd, 0x10, 0xe5, 0x3f,
        0x7c,
    ],
];

/// Applies one AES encryption round (SubBytes, ShiftRows, MixColumns,
/// AddRoundKey) to `block`.
#[inline]
pub fn aes_round(block: &mut AesKey, key: &AesKey) {
    let mut b = Block::clone_from_slice(block);
    cipher_round(&mut b, Block::from_slice(key));
    block.copy_from_slice(&b);
}

/// Applies one equivalent AES decryption round to `block`.
#[inline]
pub fn aes_inv_round(block: &mut AesKey, key: &AesKey) {
    let mut b = Block::clone_from_slice(block);
    equiv_inv_cipher_round(&mut b, Block::from_slice(key));
    block.copy_from_slice(&b);
}

/// Splits a 64-byte seed into the four column state.
fn columns_from(seed: &[u8; 64]) -> [AesKey; 4] {
    let mut cols = [[0u8; 16]; 4];
    for (i, col) in cols.iter_mut().enumerate() {
        col.copy_from_slice(&seed[i * 16..(i + 1) * 16]);
    }
    cols
}

/// Fills `out` with the deterministic keystream seeded by `seed`.
///
/// `out.len()` must be a multiple of 64. The same seed always produces
/// the same stream; the stream for a longer buffer is a prefix-extension
/// of the stream for a shorter one.
pub fn fill_aes_stream(seed: &[u8; 64], out: &mut [u8]) {
    debug_assert_eq!(out.len() % CACHE_LINE_SIZE, 0);

    let mut cols = columns_from(seed);
    for chunk in out.chunks_exact_mut(CACHE_LINE_SIZE) {
        aes_round(&mut cols[0], &FILL_KEYS[0]);
        aes_inv_round(&mut cols[1], &FILL_KEYS[1]);
        aes_round(&mut cols[2], &FILL_KEYS[2]);
        aes_inv_round(&mut cols[3], &FILL_KEYS[3]);
        for (i, col) in cols.iter().enumerate() {
            chunk[i * 16..(i + 1) * 16].copy_from_slice(col);
        }
    }
}

/// Computes the 64-byte fingerprint of `input`.
///
/// Each 64-byte chunk of the input is consumed as four round keys, one
/// per column, followed by two finalization rounds. `input.len()` must
/// be a multiple of 64.
pub fn hash_aes_stream(input: &[u8]) -> [u8; 64] {
    debug_assert_eq!(input.len() % CACHE_LINE_SIZE, 0);

    let mut cols = HASH_INIT;
    for chunk in input.chunks_exact(CACHE_LINE_SIZE) {
        for (i, col) in cols.iter_mut().enumerate() {
            let mut key = [0u8; 16];
            key.copy_from_slice(&chunk[i * 16..(i + 1) * 16]);
            if i % 2 == 0 {
                aes_round(col, &key);
            } else {
                aes_inv_round(col, &key);
            }
        }
    }

    for key in &HASH_FINAL_KEYS {
        for (i, col) in cols.iter_mut().enumerate() {
            if i % 2 == 0 {
                aes_round(col, key);
            } else {
                aes_inv_round(col, key);
            }
        }
    }

    let mut out = [0u8; 64];
    for (i, col) in cols.iter().enumerate() {
        out[i * 16..(i + 1) * 16].copy_from_slice(col);
    }
    out
}

/// Derives the AES round keys consumed by the dataset line deriver.
///
/// Each key is the truncated Blake2b-512 hash of the seed under a
/// distinct counter, so keys are pairwise independent.
pub fn derive_cache_keys(seed: &[u8; 32]) -> [AesKey; CACHE_KEY_COUNT] {
    let mut keys = [[0u8; 16]; CACHE_KEY_COUNT];
    for (i, key) in keys.iter_mut().enumerate() {
        let mut hasher = Blake2b512::new();
        hasher.update(b"cache-key-schedule");
        hasher.update(seed);
        hasher.update([i as u8]);
        let digest = hasher.finalize();
        key.copy_from_slice(&digest[..16]);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_deterministic() {
        let seed = [0x5au8; 64];
        let mut a = [0u8; 256];
        let mut b = [0u8; 256];
        fill_aes_stream(&seed, &mut a);
        fill_aes_stream(&seed, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn fill_depends_on_seed() {
        let mut a = [0u8; 128];
        let mut b = [0u8; 128];
        fill_aes_stream(&[1u8; 64], &mut a);
        fill_aes_stream(&[2u8; 64], &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn longer_stream_extends_shorter_one() {
        let seed = [0x11u8; 64];
        let mut short = [0u8; 64];
        let mut long = [0u8; 192];
        fill_aes_stream(&seed, &mut short);
        fill_aes_stream(&seed, &mut long);
        assert_eq!(short, long[..64]);
    }

    #[test]
    fn hash_distinguishes_inputs() {
        let a = hash_aes_stream(&[0u8; 128]);
        let mut input = [0u8; 128];
        input[100] = 1;
        let b = hash_aes_stream(&input);
        assert_eq!(a, hash_aes_stream(&[0u8; 128]));
        assert_ne!(a, b);
    }

    #[test]
    fn cache_keys_are_distinct() {
        let keys = derive_cache_keys(&[9u8; 32]);
        for i in 0..keys.len() {
            for j in i + 1..keys.len() {
                assert_ne!(keys[i], keys[j]);
            }
        }
        assert_eq!(keys, derive_cache_keys(&[9u8; 32]));
    }

    #[test]
    fn round_and_inv_round_change_state() {
        let mut block = [3u8; 16];
        let key = [7u8; 16];
        aes_round(&mut block, &key);
        assert_ne!(block, [3u8; 16]);
        let before = block;
        aes_inv_round(&mut block, &key);
        assert_ne!(block, before);
    }
}
