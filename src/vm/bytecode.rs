//! Dispatch records and the precompiler.
//!
//! Precompilation walks the 256 raw instructions once and lowers each
//! into a dispatch-ready record: the opcode byte is mapped through the
//! weight table to a canonical kind, register indices are reduced to
//! their operand range, the `src == dst` immediate fallback is resolved
//! to a precomputed operand tag, scratchpad masks are bound, and
//! constant divisors are lowered to magic-number multiplications.

use crate::config::{
    PROGRAM_LENGTH, SCRATCHPAD_L1_MASK, SCRATCHPAD_L2_MASK, SCRATCHPAD_L3_MASK,
};
use crate::vm::arith::sign_extend_32;
use crate::vm::program::Program;

/// Canonical instruction kinds.
///
/// The enumeration is kept small and contiguous so the interpreter's
/// match lowers to a dense jump table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OpKind {
    IAddR,
    IAddM,
    IAddRc,
    ISubR,
    ISubM,
    IMul9c,
    IMulR,
    IMulM,
    IMulhR,
    IMulhM,
    ISMulhR,
    ISMulhM,
    IDivC,
    INegR,
    IXorR,
    IXorM,
    IRorR,
    IRolR,
    ISwapR,
    FSwapR,
    FAddR,
    FAddM,
    FSubR,
    FSubM,
    FScalR,
    FMulR,
    FDivM,
    FSqrtR,
    CondR,
    CondM,
    CFround,
    IStore,
    #[default]
    Nop,
}

/// Raw opcode kinds fed by the weight table.
///
/// This is the pre-lowering alphabet: it still contains the kinds that
/// the precompiler always lowers to [`OpKind::Nop`] (ISDIV_C, FMUL_M,
/// FDIV_R, FSTORE are unimplemented in this revision of the scheme).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RawKind {
    IAddR,
    IAddM,
    IAddRc,
    ISubR,
    ISubM,
    IMul9c,
    IMulR,
    IMulM,
    IMulhR,
    IMulhM,
    ISMulhR,
    ISMulhM,
    IDivC,
    ISDivC,
    INegR,
    IXorR,
    IXorM,
    IRorR,
    IRolR,
    ISwapR,
    FSwapR,
    FAddR,
    FAddM,
    FSubR,
    FSubM,
    FScalR,
    FMulR,
    FMulM,
    FDivR,
    FDivM,
    FSqrtR,
    CondR,
    CondM,
    CFround,
    IStore,
    FStore,
    Nop,
}

/// Opcode weight table for this revision. Weights sum to 256 so every
/// opcode byte resolves to exactly one kind.
const WEIGHTS: [(RawKind, u8); 37] = [
    (RawKind::IAddR, 14),
    (RawKind::IAddM, 7),
    (RawKind::IAddRc, 16),
    (RawKind::ISubR, 12),
    (RawKind::ISubM, 7),
    (RawKind::IMul9c, 9),
    (RawKind::IMulR, 16),
    (RawKind::IMulM, 4),
    (RawKind::IMulhR, 4),
    (RawKind::IMulhM, 1),
    (RawKind::ISMulhR, 4),
    (RawKind::ISMulhM, 1),
    (RawKind::IDivC, 4),
    (RawKind::ISDivC, 4),
    (RawKind::INegR, 2),
    (RawKind::IXorR, 12),
    (RawKind::IXorM, 4),
    (RawKind::IRorR, 10),
    (RawKind::IRolR, 2),
    (RawKind::ISwapR, 4),
    (RawKind::FSwapR, 8),
    (RawKind::FAddR, 20),
    (RawKind::FAddM, 5),
    (RawKind::FSubR, 20),
    (RawKind::FSubM, 5),
    (RawKind::FScalR, 6),
    (RawKind::FMulR, 20),
    (RawKind::FMulM, 1),
    (RawKind::FDivR, 1),
    (RawKind::FDivM, 4),
    (RawKind::FSqrtR, 6),
    (RawKind::CondR, 7),
    (RawKind::CondM, 1),
    (RawKind::CFround, 1),
    (RawKind::IStore, 12),
    (RawKind::FStore, 1),
    (RawKind::Nop, 1),
];

/// Maps every opcode byte to its kind through the cumulative weights.
const fn build_kind_table() -> [RawKind; 256] {
    let mut table = [RawKind::Nop; 256];
    let mut slot = 0usize;
    let mut i = 0usize;
    while i < WEIGHTS.len() {
        let (kind, weight) = WEIGHTS[i];
        let mut w = 0u8;
        while w < weight {
            table[slot] = kind;
            slot += 1;
            w += 1;
        }
        i += 1;
    }
    table
}

static KIND_TABLE: [RawKind; 256] = build_kind_table();

/// Source operand binding of a dispatch record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Operand {
    /// Read the integer register with this index.
    Reg(u8),
    /// Read the record's own `imm` slot (the `src == dst` fallback).
    #[default]
    Imm,
}

/// Precompiled form of one program slot.
///
/// Unused fields are left at their defaults; every kind reads only the
/// fields the precompiler bound for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DispatchOp {
    pub kind: OpKind,
    pub dst: u8,
    pub src: Operand,
    pub imm: u64,
    pub mem_mask: u32,
    pub condition: u8,
    /// Magic multiplier; zero selects the power-of-two shift path.
    pub multiplier: u64,
    pub pre_shift: u32,
    pub post_shift: u32,
    pub increment: bool,
    pub shift: u32,
}

impl DispatchOp {
    /// Quotient of `dividend` by the constant divisor this IDIV_C record
    /// was lowered from.
    #[inline]
    pub fn constant_quotient(&self, dividend: u64) -> u64 {
        if self.multiplier != 0 {
            let mut quotient = dividend >> self.pre_shift;
            if self.increment {
                quotient = quotient.saturating_add(1);
            }
            quotient = crate::vm::arith::mulh(quotient, self.multiplier);
            quotient >> self.post_shift
        } else {
            dividend >> self.shift
        }
    }
}

/// Magic constants for division by an invariant divisor.
struct UnsignedMagic {
    multiplier: u64,
    pre_shift: u32,
    post_shift: u32,
    increment: bool,
}

/// Computes magic constants such that for every 64-bit `x`,
/// `mulh(((x >> pre) + increment) saturated, multiplier) >> post == x / divisor`.
///
/// `divisor` must not be zero or a power of two (those take the shift
/// path). `num_bits` is the dividend width; the top-level call passes 64
/// and the even-divisor path recurses with the width reduced by the
/// trailing zero count.
fn unsigned_magic(divisor: u64, num_bits: u32) -> UnsignedMagic {
    debug_assert!(divisor & (divisor - 1) != 0);

    let extra_shift = 64 - num_bits;
    let initial_power_of_2 = 1u64 << 63;

    let mut quotient = initial_power_of_2 / divisor;
    let mut remainder = initial_power_of_2 % divisor;

    let mut ceil_log2 = 0u32;
    while (1u64 << ceil_log2) < divisor {
        ceil_log2 += 1;
    }

    let mut down_multiplier = 0u64;
    let mut down_exponent = 0u32;
    let mut has_magic_down = false;

    let mut exponent = 0u32;
    loop {
        // Quotient and remainder of 2^(64 + exponent) / divisor.
        if remainder >= divisor - remainder {
            quotient = quotient.wrapping_mul(2).wrapping_add(1);
            remainder = remainder.wrapping_mul(2).wrapping_sub(divisor);
        } else {
            quotient = quotient.wrapping_mul(2);
            remainder = remainder.wrapping_mul(2);
        }

        if exponent + extra_shift >= ceil_log2
            || divisor - remainder <= 1u64 << (exponent + extra_shift)
        {
            break;
        }

        if !has_magic_down && remainder <= 1u64 << (exponent + extra_shift) {
            has_magic_down = true;
            down_multiplier = quotient;
            down_exponent = exponent;
        }

        exponent += 1;
    }

    if exponent < ceil_log2 {
        // Round-up multiplier fits.
        UnsignedMagic {
            multiplier: quotient.wrapping_add(1),
            pre_shift: 0,
            post_shift: exponent,
            increment: false,
        }
    } else if divisor & 1 != 0 {
        // Odd divisor: the round-down variant with a pre-increment.
        UnsignedMagic {
            multiplier: down_multiplier,
            pre_shift: 0,
            post_shift: down_exponent,
            increment: true,
        }
    } else {
        // Even divisor: strip trailing zeros into a pre-shift.
        let pre_shift = divisor.trailing_zeros();
        let inner = unsigned_magic(divisor >> pre_shift, num_bits - pre_shift);
        UnsignedMagic {
            multiplier: inner.multiplier,
            pre_shift,
            post_shift: inner.post_shift,
            increment: inner.increment,
        }
    }
}

/// Selects the L1 or L2 scratchpad mask from the mode byte.
#[inline]
fn level_mask(mode: u8) -> u32 {
    if mode % 4 != 0 {
        SCRATCHPAD_L1_MASK
    } else {
        SCRATCHPAD_L2_MASK
    }
}

/// Lowers the whole program into `bytecode`.
///
/// Every record is written in full, so precompiling the same program
/// twice produces identical buffers.
pub fn precompile(program: &Program, bytecode: &mut [DispatchOp; PROGRAM_LENGTH]) {
    for (i, op) in bytecode.iter_mut().enumerate() {
        let instr = program.instruction(i);
        let dst = instr.dst % 8;
        let src = instr.src % 8;
        let fdst = instr.dst % 4;
        let fsrc = instr.src % 4;

        *op = DispatchOp::default();

        match KIND_TABLE[instr.opcode as usize] {
            RawKind::IAddR => reg_or_imm(op, OpKind::IAddR, dst, src, sign_extend_32(instr.imm32)),
            RawKind::ISubR => reg_or_imm(op, OpKind::ISubR, dst, src, sign_extend_32(instr.imm32)),
            RawKind::IMulR => reg_or_imm(op, OpKind::IMulR, dst, src, sign_extend_32(instr.imm32)),
            RawKind::IXorR => reg_or_imm(op, OpKind::IXorR, dst, src, sign_extend_32(instr.imm32)),
            RawKind::IRorR => reg_or_imm(op, OpKind::IRorR, dst, src, sign_extend_32(instr.imm32)),
            RawKind::IRolR => reg_or_imm(op, OpKind::IRolR, dst, src, sign_extend_32(instr.imm32)),

            RawKind::IAddRc => {
                op.kind = OpKind::IAddRc;
                op.dst = dst;
                op.src = Operand::Reg(src);
                op.imm = sign_extend_32(instr.imm32);
            }

            RawKind::IAddM => mem_form(op, OpKind::IAddM, dst, src, instr.mode, instr.imm32),
            RawKind::ISubM => mem_form(op, OpKind::ISubM, dst, src, instr.mode, instr.imm32),
            RawKind::IMulM => mem_form(op, OpKind::IMulM, dst, src, instr.mode, instr.imm32),
            RawKind::IXorM => mem_form(op, OpKind::IXorM, dst, src, instr.mode, instr.imm32),
            RawKind::IMulhM => mem_form(op, OpKind::IMulhM, dst, src, instr.mode, instr.imm32),
            RawKind::ISMulhM => mem_form(op, OpKind::ISMulhM, dst, src, instr.mode, instr.imm32),

            RawKind::IMul9c => {
                op.kind = OpKind::IMul9c;
                op.dst = dst;
                op.imm = sign_extend_32(instr.imm32);
            }

            RawKind::IMulhR => {
                op.kind = OpKind::IMulhR;
                op.dst = dst;
                op.src = Operand::Reg(src);
            }
            RawKind::ISMulhR => {
                op.kind = OpKind::ISMulhR;
                op.dst = dst;
                op.src = Operand::Reg(src);
            }

            RawKind::IDivC => {
                let divisor = instr.imm32 as u64;
                if divisor == 0 {
                    // Division by zero is lowered away entirely.
                } else {
                    op.kind = OpKind::IDivC;
                    op.dst = dst;
                    if divisor & (divisor - 1) != 0 {
                        let magic = unsigned_magic(divisor, 64);
                        op.multiplier = magic.multiplier;
                        op.pre_shift = magic.pre_shift;
                        op.post_shift = magic.post_shift;
                        op.increment = magic.increment;
                    } else {
                        op.multiplier = 0;
                        op.shift = divisor.trailing_zeros();
                    }
                }
            }

            RawKind::INegR => {
                op.kind = OpKind::INegR;
                op.dst = dst;
            }

            RawKind::ISwapR => {
                if src != dst {
                    op.kind = OpKind::ISwapR;
                    op.dst = dst;
                    op.src = Operand::Reg(src);
                }
            }

            RawKind::FSwapR => {
                op.kind = OpKind::FSwapR;
                op.dst = dst;
            }

            RawKind::FAddR => {
                op.kind = OpKind::FAddR;
                op.dst = fdst;
                op.src = Operand::Reg(fsrc);
            }
            RawKind::FSubR => {
                op.kind = OpKind::FSubR;
                op.dst = fdst;
                op.src = Operand::Reg(fsrc);
            }
            RawKind::FMulR => {
                op.kind = OpKind::FMulR;
                op.dst = fdst;
                op.src = Operand::Reg(fsrc);
            }

            RawKind::FAddM => float_mem_form(op, OpKind::FAddM, fdst, src, instr.mode),
            RawKind::FSubM => float_mem_form(op, OpKind::FSubM, fdst, src, instr.mode),
            RawKind::FDivM => float_mem_form(op, OpKind::FDivM, fdst, src, instr.mode),

            RawKind::FScalR => {
                op.kind = OpKind::FScalR;
                op.dst = fdst;
            }
            RawKind::FSqrtR => {
                op.kind = OpKind::FSqrtR;
                op.dst = fdst;
            }

            RawKind::CondR => {
                op.kind = OpKind::CondR;
                op.dst = dst;
                op.src = Operand::Reg(src);
                op.condition = (instr.mode >> 2) & 7;
                op.imm = instr.imm32 as u64;
            }
            RawKind::CondM => {
                op.kind = OpKind::CondM;
                op.dst = dst;
                op.src = Operand::Reg(src);
                op.condition = (instr.mode >> 2) & 7;
                op.imm = instr.imm32 as u64;
                op.mem_mask = level_mask(instr.mode);
            }

            RawKind::CFround => {
                op.kind = OpKind::CFround;
                op.src = Operand::Reg(src);
                op.imm = (instr.imm32 & 63) as u64;
            }

            RawKind::IStore => {
                op.kind = OpKind::IStore;
                op.dst = dst;
                op.src = Operand::Reg(src);
                op.mem_mask = level_mask(instr.mode);
            }

            // Unimplemented in this revision of the scheme.
            RawKind::ISDivC | RawKind::FMulM | RawKind::FDivR | RawKind::FStore | RawKind::Nop => {}
        }
    }
}

/// Binds a register-form binary op: same-register sources collapse to
/// the inline immediate.
#[inline]
fn reg_or_imm(op: &mut DispatchOp, kind: OpKind, dst: u8, src: u8, imm: u64) {
    op.kind = kind;
    op.dst = dst;
    if src != dst {
        op.src = Operand::Reg(src);
    } else {
        op.src = Operand::Imm;
        op.imm = imm;
    }
}

/// Binds a memory-form integer op. A same-register collision turns the
/// address into the zero-extended immediate over the full scratchpad.
#[inline]
fn mem_form(op: &mut DispatchOp, kind: OpKind, dst: u8, src: u8, mode: u8, imm32: u32) {
    op.kind = kind;
    op.dst = dst;
    if src != dst {
        op.src = Operand::Reg(src);
        op.mem_mask = level_mask(mode);
    } else {
        op.src = Operand::Imm;
        op.imm = imm32 as u64;
        op.mem_mask = SCRATCHPAD_L3_MASK;
    }
}

/// Binds a float op whose source is a scratchpad address register.
#[inline]
fn float_mem_form(op: &mut DispatchOp, kind: OpKind, fdst: u8, src: u8, mode: u8) {
    op.kind = kind;
    op.dst = fdst;
    op.src = Operand::Reg(src);
    op.mem_mask = level_mask(mode);
}
