//! Shared plain types.

pub mod digest;
