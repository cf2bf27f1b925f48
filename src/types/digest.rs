//! 32-byte Blake2b-256 digest type with zero-allocation operations.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Digest as _};
use std::fmt;

/// Blake2b-256 digest length in bytes.
pub const DIGEST_LEN: usize = 32;

/// Length of the wide seed hash in bytes.
pub const SEED_HASH_LEN: usize = 64;

type Blake2b256 = Blake2b<U32>;

/// Fixed-size 32-byte digest produced by one hashed nonce.
///
/// This type is `Copy` - digests are passed frequently between the
/// per-nonce loop and the result aggregation and should live on the
/// stack to avoid heap allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash, Ord, PartialOrd)]
pub struct HashDigest(pub [u8; DIGEST_LEN]);

impl HashDigest {
    /// Creates a zero-valued digest (all bytes are 0x00).
    pub const fn zero() -> HashDigest {
        HashDigest([0u8; DIGEST_LEN])
    }

    /// Returns the digest as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Creates a digest from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`DIGEST_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<HashDigest> {
        if slice.len() != DIGEST_LEN {
            return None;
        }
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(slice);
        Some(HashDigest(bytes))
    }

    /// Creates a new Blake2b-256 builder for incremental hashing.
    pub fn blake2b() -> DigestBuilder {
        DigestBuilder::new()
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental Blake2b-256 builder.
///
/// Allows feeding data in chunks and finalizing to produce a [`HashDigest`].
pub struct DigestBuilder {
    hasher: Blake2b256,
}

impl DigestBuilder {
    /// Creates a new empty builder.
    pub fn new() -> Self {
        Self {
            hasher: Blake2b256::new(),
        }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Consumes the builder and returns the final digest.
    pub fn finalize(self) -> HashDigest {
        HashDigest(self.hasher.finalize().into())
    }
}

impl Default for DigestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the 64-byte Blake2b-512 hash used to seed the expander.
pub fn seed_hash(data: &[u8]) -> [u8; SEED_HASH_LEN] {
    let mut hasher = Blake2b512::new();
    hasher.update(data);
    hasher.finalize().into()
}
