//! Per-nonce hash chain.
//!
//! One nonce is hashed by seeding the scratchpad from the Blake2b hash
//! of the block template, then running eight chained program
//! executions: each step refills the program buffer from the running
//! hash and rehashes the register file, and the last step folds the
//! scratchpad into the result.

use crate::config::{CHAIN_LENGTH, NONCE_OFFSET, TEMPLATE_SIZE};
use crate::mem::MemError;
use crate::types::digest::{HashDigest, seed_hash};
use crate::vm::machine::Vm;

/// Returns the template with the nonce written at its fixed offset.
pub fn template_with_nonce(template: &[u8; TEMPLATE_SIZE], nonce: u32) -> [u8; TEMPLATE_SIZE] {
    let mut input = *template;
    input[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_le_bytes());
    input
}

/// Computes the 256-bit digest for one nonce on the given VM.
pub fn hash_nonce(
    vm: &mut Vm,
    template: &[u8; TEMPLATE_SIZE],
    nonce: u32,
) -> Result<HashDigest, MemError> {
    let input = template_with_nonce(template, nonce);
    let mut hash = seed_hash(&input);

    vm.init_scratchpad(&hash);

    for _ in 0..CHAIN_LENGTH - 1 {
        vm.fill_program(&hash);
        vm.initialize();
        vm.execute()?;
        hash = vm.result_intermediate();
    }

    vm.fill_program(&hash);
    vm.initialize();
    vm.execute()?;
    Ok(vm.result_final())
}
