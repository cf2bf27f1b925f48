//! The instruction-set interpreter.
//!
//! A program is 256 randomly generated instructions over eight integer
//! registers and three groups of paired-double registers. The raw
//! program ([`program`]) is lowered once per chain step into dispatch
//! records ([`bytecode`]) and interpreted for a fixed iteration
//! schedule ([`machine`]).
//!
//! # Modules
//!
//! - [`arith`]: wide multiplies, sign extension, condition codes
//! - [`fpu`]: paired doubles with explicit rounding direction
//! - [`program`]: raw program buffer and entropy header
//! - [`bytecode`]: dispatch records, precompiler, magic division
//! - [`machine`]: the VM and per-nonce execution loop
//! - [`errors`]: program loading errors

pub mod arith;
pub mod bytecode;
pub mod errors;
pub mod fpu;
pub mod machine;
pub mod program;
