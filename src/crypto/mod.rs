//! Cryptographic collaborators: AES keystream expansion and hashing.

pub mod aes_stream;
