//! Hash chain and mining loop built on top of the VM.

pub mod hasher;
pub mod miner;
