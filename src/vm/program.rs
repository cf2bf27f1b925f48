//! Raw program buffer filled by the expander.
//!
//! One chain step fills the whole buffer: a 128-byte entropy header
//! (16 x u64) followed by 256 raw 8-byte instructions. The header seeds
//! the `a` register group, the dataset stream pointers and the read
//! register selectors; the instruction stream is lowered by the
//! precompiler.

use crate::config::{
    ENTROPY_SIZE, INSTRUCTION_SIZE, PROGRAM_BUFFER_SIZE, PROGRAM_LENGTH, REGISTERS_COUNT,
};
use crate::crypto::aes_stream::fill_aes_stream;
use crate::vm::errors::VmError;

/// One raw 64-bit instruction record as produced by the expander.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawInstruction {
    /// Opcode byte, mapped through the weight table.
    pub opcode: u8,
    /// Destination register index (reduced modulo 8 or 4 by the precompiler).
    pub dst: u8,
    /// Source register index.
    pub src: u8,
    /// Mode byte: bits [1:0] pick the scratchpad level, bits [4:2] the
    /// condition code.
    pub mode: u8,
    /// Little-endian 32-bit immediate.
    pub imm32: u32,
}

impl RawInstruction {
    /// Decodes one 8-byte record.
    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            opcode: bytes[0],
            dst: bytes[1],
            src: bytes[2],
            mode: bytes[3],
            imm32: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// The per-chain-step program: entropy header plus 256 instructions.
#[derive(Clone)]
pub struct Program {
    entropy: [u64; ENTROPY_SIZE / 8],
    instructions: [RawInstruction; PROGRAM_LENGTH],
}

impl Program {
    /// Creates an all-zero program (every slot decodes to the first
    /// weight-table kind until filled).
    pub fn new() -> Self {
        Self {
            entropy: [0u64; ENTROPY_SIZE / 8],
            instructions: [RawInstruction::default(); PROGRAM_LENGTH],
        }
    }

    /// Refills the whole buffer from a 64-byte seed hash.
    pub fn fill_from(&mut self, seed: &[u8; 64]) {
        let mut buffer = [0u8; PROGRAM_BUFFER_SIZE];
        fill_aes_stream(seed, &mut buffer);
        self.decode(&buffer);
    }

    /// Decodes a pre-expanded raw buffer: the entropy header followed
    /// by the instruction stream.
    pub fn from_buffer(buffer: &[u8]) -> Result<Self, VmError> {
        if buffer.len() != PROGRAM_BUFFER_SIZE {
            return Err(VmError::ProgramLength {
                expected: PROGRAM_BUFFER_SIZE,
                actual: buffer.len(),
            });
        }
        let mut program = Self::new();
        program.decode(buffer);
        Ok(program)
    }

    fn decode(&mut self, buffer: &[u8]) {
        for (i, word) in self.entropy.iter_mut().enumerate() {
            let offset = i * 8;
            *word = u64::from_le_bytes(buffer[offset..offset + 8].try_into().unwrap());
        }
        for (i, instr) in self.instructions.iter_mut().enumerate() {
            let offset = ENTROPY_SIZE + i * INSTRUCTION_SIZE;
            *instr = RawInstruction::from_bytes(&buffer[offset..offset + INSTRUCTION_SIZE]);
        }
    }

    /// Stabilizes register indices modulo the register count.
    ///
    /// Idempotent; run once after every fill, before precompilation.
    pub fn initialize(&mut self) {
        for instr in self.instructions.iter_mut() {
            instr.src %= REGISTERS_COUNT as u8;
            instr.dst %= REGISTERS_COUNT as u8;
        }
    }

    /// One entropy header word.
    #[inline]
    pub fn entropy(&self, index: usize) -> u64 {
        self.entropy[index]
    }

    /// The raw instruction in the given slot.
    #[inline]
    pub fn instruction(&self, index: usize) -> &RawInstruction {
        &self.instructions[index]
    }

    /// Mutable access to one slot, used by tests to pin down programs.
    #[inline]
    pub fn instruction_mut(&mut self, index: usize) -> &mut RawInstruction {
        &mut self.instructions[index]
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_deterministic() {
        let seed = [0x42u8; 64];
        let mut a = Program::new();
        let mut b = Program::new();
        a.fill_from(&seed);
        b.fill_from(&seed);
        for i in 0..PROGRAM_LENGTH {
            assert_eq!(a.instruction(i), b.instruction(i));
        }
        assert_eq!(a.entropy(0), b.entropy(0));
        assert_eq!(a.entropy(15), b.entropy(15));
    }

    #[test]
    fn initialize_reduces_register_indices() {
        let mut program = Program::new();
        program.fill_from(&[7u8; 64]);
        program.initialize();
        for i in 0..PROGRAM_LENGTH {
            assert!(program.instruction(i).src < 8);
            assert!(program.instruction(i).dst < 8);
        }
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut once = Program::new();
        once.fill_from(&[9u8; 64]);
        once.initialize();
        let mut twice = once.clone();
        twice.initialize();
        for i in 0..PROGRAM_LENGTH {
            assert_eq!(once.instruction(i), twice.instruction(i));
        }
    }

    #[test]
    fn from_buffer_matches_expander_fill() {
        let seed = [0x2Du8; 64];
        let mut buffer = [0u8; PROGRAM_BUFFER_SIZE];
        crate::crypto::aes_stream::fill_aes_stream(&seed, &mut buffer);
        let loaded = Program::from_buffer(&buffer).unwrap();

        let mut filled = Program::new();
        filled.fill_from(&seed);
        assert_eq!(loaded.entropy(0), filled.entropy(0));
        for i in 0..PROGRAM_LENGTH {
            assert_eq!(loaded.instruction(i), filled.instruction(i));
        }
    }

    #[test]
    fn from_buffer_rejects_wrong_length() {
        match Program::from_buffer(&[0u8; 16]) {
            Err(VmError::ProgramLength { expected, actual }) => {
                assert_eq!(expected, PROGRAM_BUFFER_SIZE);
                assert_eq!(actual, 16);
            }
            Ok(_) => panic!("expected a length error"),
        }
    }

    #[test]
    fn raw_instruction_decodes_little_endian() {
        let instr = RawInstruction::from_bytes(&[0x10, 0x02, 0x03, 0x0C, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(instr.opcode, 0x10);
        assert_eq!(instr.dst, 2);
        assert_eq!(instr.src, 3);
        assert_eq!(instr.mode, 0x0C);
        assert_eq!(instr.imm32, 0x1234_5678);
    }
}
