//! The virtual machine: per-nonce execution loop and interpreter.
//!
//! One VM instance owns a scratchpad and a dispatch buffer, both reused
//! across nonces. Per chain step the expander refills the program
//! buffer, `initialize` derives the entropy-bound state, and `execute`
//! runs the fixed iteration schedule: scratchpad block in, 256
//! instructions, dataset line folded into the integer registers,
//! scratchpad block out.

use blake2::{Blake2b512, Digest as _};

use crate::config::{
    CACHE_LINE_ALIGN_MASK, INSTRUCTION_COUNT, PROGRAM_LENGTH, REGISTERS_COUNT,
    SCRATCHPAD_L3_MASK_64,
};
use crate::crypto::aes_stream::hash_aes_stream;
use crate::mem::MemError;
use crate::mem::dataset::{DatasetSource, lanes_from};
use crate::mem::scratchpad::Scratchpad;
use crate::mem::worker::PrefetchWorker;
use crate::types::digest::HashDigest;
use crate::vm::arith::{condition, mulh, smulh};
use crate::vm::bytecode::{DispatchOp, OpKind, Operand, precompile};
use crate::vm::fpu::{DBL_MIN, FloatPair, RoundMode};
use crate::vm::program::Program;

/// Persistent register block of one VM.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegisterFile {
    pub r: [u64; REGISTERS_COUNT],
    pub f: [FloatPair; 4],
    pub e: [FloatPair; 4],
    pub a: [FloatPair; 4],
}

impl RegisterFile {
    /// Serializes the file as 256 little-endian bytes (r, f, e, a).
    pub fn to_bytes(&self) -> [u8; 256] {
        let mut bytes = [0u8; 256];
        for (i, reg) in self.r.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&reg.to_le_bytes());
        }
        for (group, base) in [(&self.f, 64usize), (&self.e, 128), (&self.a, 192)] {
            for (i, pair) in group.iter().enumerate() {
                let (lo, hi) = pair.to_bits();
                let offset = base + i * 16;
                bytes[offset..offset + 8].copy_from_slice(&lo.to_le_bytes());
                bytes[offset + 8..offset + 16].copy_from_slice(&hi.to_le_bytes());
            }
        }
        bytes
    }
}

/// Maps an entropy word to the bit pattern of a small positive double
/// in [1, 2^32).
fn small_positive_float_bits(entropy: u64) -> u64 {
    let mantissa = entropy & ((1u64 << 52) - 1);
    let exponent = ((entropy >> 59) + 1023) & 0x7FF;
    (exponent << 52) | mantissa
}

/// A virtual machine instance.
pub struct Vm {
    program: Program,
    bytecode: Box<[DispatchOp; PROGRAM_LENGTH]>,
    scratchpad: Scratchpad,
    reg: RegisterFile,
    mem_ma: u32,
    mem_mx: u32,
    read_reg: [usize; 4],
    dataset: DatasetSource,
    worker: Option<PrefetchWorker>,
    round_mode: RoundMode,
    iterations: usize,
}

impl Vm {
    /// Creates a VM reading dataset lines from `dataset`.
    ///
    /// With `async_worker` set (light mode only), line derivation for
    /// the next iteration overlaps with program execution.
    pub fn new(dataset: DatasetSource, async_worker: bool) -> Result<Self, MemError> {
        let worker = match (&dataset, async_worker) {
            (DatasetSource::Light(cache), true) => Some(PrefetchWorker::spawn(cache.clone())?),
            _ => None,
        };
        Ok(Self {
            program: Program::new(),
            bytecode: Box::new([DispatchOp::default(); PROGRAM_LENGTH]),
            scratchpad: Scratchpad::new()?,
            reg: RegisterFile::default(),
            mem_ma: 0,
            mem_mx: 0,
            read_reg: [0, 2, 4, 6],
            dataset,
            worker,
            round_mode: RoundMode::Nearest,
            iterations: INSTRUCTION_COUNT,
        })
    }

    /// Refills the scratchpad for a new nonce.
    pub fn init_scratchpad(&mut self, seed: &[u8; 64]) {
        self.scratchpad.fill_from(seed);
    }

    /// Refills the program buffer for the next chain step.
    pub fn fill_program(&mut self, seed: &[u8; 64]) {
        self.program.fill_from(seed);
    }

    /// Stabilizes the program and derives the entropy-bound state: the
    /// `a` register group, the dataset stream pointers and the read
    /// register selectors. Resets the rounding mode.
    pub fn initialize(&mut self) {
        self.program.initialize();

        for i in 0..4 {
            self.reg.a[i] = FloatPair::from_bits(
                small_positive_float_bits(self.program.entropy(2 * i)),
                small_positive_float_bits(self.program.entropy(2 * i + 1)),
            );
        }

        self.mem_ma = self.program.entropy(8) as u32 & CACHE_LINE_ALIGN_MASK;
        self.mem_mx = self.program.entropy(10) as u32 & CACHE_LINE_ALIGN_MASK;

        let selector = self.program.entropy(12);
        self.read_reg = [
            (selector & 1) as usize,
            2 + ((selector >> 1) & 1) as usize,
            4 + ((selector >> 2) & 1) as usize,
            6 + ((selector >> 3) & 1) as usize,
        ];

        self.round_mode = RoundMode::Nearest;
    }

    /// Runs the program for the full iteration schedule.
    pub fn execute(&mut self) -> Result<(), MemError> {
        precompile(&self.program, &mut self.bytecode);

        let mut r = [0u64; REGISTERS_COUNT];
        let mut f = [FloatPair::ZERO; 4];
        let mut e = [FloatPair::ZERO; 4];
        let a = self.reg.a;

        let mut sp_addr0 = self.mem_mx;
        let mut sp_addr1 = self.mem_ma;

        if let Some(worker) = &self.worker {
            worker.prepare_block(self.mem_ma)?;
        }

        for _ in 0..self.iterations {
            sp_addr0 ^= r[self.read_reg[0]] as u32;
            sp_addr0 &= SCRATCHPAD_L3_MASK_64;
            for (k, reg) in r.iter_mut().enumerate() {
                *reg ^= self.scratchpad.load64(sp_addr0 + 8 * k as u32);
            }

            sp_addr1 ^= r[self.read_reg[1]] as u32;
            sp_addr1 &= SCRATCHPAD_L3_MASK_64;
            for (k, reg) in f.iter_mut().enumerate() {
                *reg =
                    FloatPair::from_packed_i32(self.scratchpad.load64(sp_addr1 + 8 * k as u32));
            }
            for (k, reg) in e.iter_mut().enumerate() {
                *reg = FloatPair::from_packed_i32(
                    self.scratchpad.load64(sp_addr1 + 32 + 8 * k as u32),
                )
                .abs();
            }

            execute_bytecode(
                &self.bytecode,
                &mut self.scratchpad,
                &mut r,
                &mut f,
                &mut e,
                &a,
                &mut self.round_mode,
            );

            let line = match &self.worker {
                Some(worker) => worker.get_block(self.mem_ma)?,
                None => self.dataset.line(self.mem_ma),
            };
            for (reg, lane) in r.iter_mut().zip(line) {
                *reg ^= lane;
            }

            self.mem_mx ^= (r[self.read_reg[2]] ^ r[self.read_reg[3]]) as u32;
            self.mem_mx &= CACHE_LINE_ALIGN_MASK;
            std::mem::swap(&mut self.mem_ma, &mut self.mem_mx);
            if let Some(worker) = &self.worker {
                worker.prepare_block(self.mem_ma)?;
            }

            for (k, reg) in r.iter().enumerate() {
                self.scratchpad.store64(sp_addr1 + 8 * k as u32, *reg);
            }
            for k in 0..4 {
                self.scratchpad
                    .store_pair(sp_addr0 + 16 * k as u32, f[k].mul(e[k], self.round_mode));
            }

            sp_addr0 = 0;
            sp_addr1 = 0;
        }

        // The last iteration prepared a line that no step consumes;
        // drain it so the rendezvous stays balanced for the next run.
        if let Some(worker) = &self.worker {
            worker.get_block(self.mem_ma)?;
        }

        self.reg.r = r;
        self.reg.f = f;
        self.reg.e = e;
        Ok(())
    }

    /// 64-byte hash of the register file, feeding the next chain step.
    pub fn result_intermediate(&self) -> [u8; 64] {
        let mut hasher = Blake2b512::new();
        hasher.update(self.reg.to_bytes());
        hasher.finalize().into()
    }

    /// Final 256-bit digest: the scratchpad fingerprint replaces the
    /// `a` group, then the register file is hashed.
    pub fn result_final(&mut self) -> HashDigest {
        let fingerprint = hash_aes_stream(self.scratchpad.as_bytes());
        let lanes = lanes_from(&fingerprint);
        for i in 0..4 {
            self.reg.a[i] = FloatPair::from_bits(lanes[2 * i], lanes[2 * i + 1]);
        }
        HashDigest::blake2b().chain(&self.reg.to_bytes()).finalize()
    }

    /// Current register block.
    pub fn registers(&self) -> &RegisterFile {
        &self.reg
    }

    /// Current dataset stream pointers `(ma, mx)`.
    pub fn stream_pointers(&self) -> (u32, u32) {
        (self.mem_ma, self.mem_mx)
    }

    /// Shrinks the iteration schedule for fast tests.
    #[cfg(test)]
    pub(crate) fn set_iterations(&mut self, iterations: usize) {
        self.iterations = iterations;
    }
}

/// Source operand of an integer record.
#[inline]
fn int_src(op: &DispatchOp, r: &[u64; REGISTERS_COUNT]) -> u64 {
    match op.src {
        Operand::Reg(index) => r[index as usize],
        Operand::Imm => op.imm,
    }
}

/// Scratchpad address bound to a memory-form record.
#[inline]
fn mem_addr(op: &DispatchOp, r: &[u64; REGISTERS_COUNT]) -> u32 {
    (int_src(op, r) & op.mem_mask as u64) as u32
}

/// One pass over the 256 dispatch records.
fn execute_bytecode(
    bytecode: &[DispatchOp; PROGRAM_LENGTH],
    scratchpad: &mut Scratchpad,
    r: &mut [u64; REGISTERS_COUNT],
    f: &mut [FloatPair; 4],
    e: &mut [FloatPair; 4],
    a: &[FloatPair; 4],
    mode: &mut RoundMode,
) {
    for op in bytecode.iter() {
        let dst = op.dst as usize;
        match op.kind {
            OpKind::IAddR => r[dst] = r[dst].wrapping_add(int_src(op, r)),
            OpKind::IAddM => {
                r[dst] = r[dst].wrapping_add(scratchpad.load64(mem_addr(op, r)));
            }
            OpKind::IAddRc => {
                let src = int_src(op, r);
                r[dst] = r[dst].wrapping_add(src).wrapping_add(op.imm);
            }
            OpKind::ISubR => r[dst] = r[dst].wrapping_sub(int_src(op, r)),
            OpKind::ISubM => {
                r[dst] = r[dst].wrapping_sub(scratchpad.load64(mem_addr(op, r)));
            }
            OpKind::IMul9c => r[dst] = r[dst].wrapping_mul(9).wrapping_add(op.imm),
            OpKind::IMulR => r[dst] = r[dst].wrapping_mul(int_src(op, r)),
            OpKind::IMulM => {
                r[dst] = r[dst].wrapping_mul(scratchpad.load64(mem_addr(op, r)));
            }
            OpKind::IMulhR => r[dst] = mulh(r[dst], int_src(op, r)),
            OpKind::IMulhM => r[dst] = mulh(r[dst], scratchpad.load64(mem_addr(op, r))),
            OpKind::ISMulhR => r[dst] = smulh(r[dst], int_src(op, r)),
            OpKind::ISMulhM => r[dst] = smulh(r[dst], scratchpad.load64(mem_addr(op, r))),
            OpKind::IDivC => r[dst] = r[dst].wrapping_add(op.constant_quotient(r[dst])),
            OpKind::INegR => r[dst] = r[dst].wrapping_neg(),
            OpKind::IXorR => r[dst] ^= int_src(op, r),
            OpKind::IXorM => r[dst] ^= scratchpad.load64(mem_addr(op, r)),
            OpKind::IRorR => r[dst] = r[dst].rotate_right((int_src(op, r) & 63) as u32),
            OpKind::IRolR => r[dst] = r[dst].rotate_left((int_src(op, r) & 63) as u32),
            OpKind::ISwapR => {
                if let Operand::Reg(src) = op.src {
                    r.swap(dst, src as usize);
                }
            }
            OpKind::FSwapR => {
                // dst ranges over all eight float registers: f then e.
                if dst < 4 {
                    f[dst] = f[dst].swap();
                } else {
                    e[dst - 4] = e[dst - 4].swap();
                }
            }
            OpKind::FAddR => {
                if let Operand::Reg(src) = op.src {
                    f[dst] = f[dst].add(a[src as usize], *mode);
                }
            }
            OpKind::FAddM => {
                let operand = FloatPair::from_packed_i32(scratchpad.load64(mem_addr(op, r)));
                f[dst] = f[dst].add(operand, *mode);
            }
            OpKind::FSubR => {
                if let Operand::Reg(src) = op.src {
                    f[dst] = f[dst].sub(a[src as usize], *mode);
                }
            }
            OpKind::FSubM => {
                let operand = FloatPair::from_packed_i32(scratchpad.load64(mem_addr(op, r)));
                f[dst] = f[dst].sub(operand, *mode);
            }
            OpKind::FScalR => f[dst] = f[dst].scale(),
            OpKind::FMulR => {
                if let Operand::Reg(src) = op.src {
                    e[dst] = e[dst].mul(a[src as usize], *mode);
                }
            }
            OpKind::FDivM => {
                let operand = FloatPair::from_packed_i32(scratchpad.load64(mem_addr(op, r)));
                e[dst] = e[dst].div(operand, *mode).max(DBL_MIN);
            }
            OpKind::FSqrtR => e[dst] = e[dst].sqrt(*mode),
            OpKind::CondR => {
                let taken = condition(int_src(op, r), op.imm, op.condition);
                r[dst] = r[dst].wrapping_add(taken as u64);
            }
            OpKind::CondM => {
                let value = scratchpad.load64(mem_addr(op, r));
                let taken = condition(value, op.imm, op.condition);
                r[dst] = r[dst].wrapping_add(taken as u64);
            }
            OpKind::CFround => {
                *mode = RoundMode::from_bits(int_src(op, r).rotate_right(op.imm as u32));
            }
            OpKind::IStore => {
                let addr = (r[dst] & op.mem_mask as u64) as u32;
                scratchpad.store64(addr, int_src(op, r));
            }
            OpKind::Nop => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SCRATCHPAD_L1_MASK, SCRATCHPAD_L2_MASK};
    use crate::mem::cache::Cache;
    use std::sync::Arc;

    fn light_source() -> DatasetSource {
        DatasetSource::Light(Arc::new(Cache::with_size(&[0x5Eu8; 32], 64 * 512).unwrap()))
    }

    fn test_vm() -> Vm {
        let mut vm = Vm::new(light_source(), false).unwrap();
        vm.set_iterations(8);
        vm
    }

    fn one_op(kind: OpKind) -> DispatchOp {
        DispatchOp {
            kind,
            ..DispatchOp::default()
        }
    }

    fn run_ops(
        ops: &[DispatchOp],
        r: &mut [u64; 8],
        scratchpad: &mut Scratchpad,
    ) -> ([FloatPair; 4], [FloatPair; 4]) {
        let mut bytecode = Box::new([DispatchOp::default(); PROGRAM_LENGTH]);
        bytecode[..ops.len()].copy_from_slice(ops);
        let mut f = [FloatPair::ZERO; 4];
        let mut e = [FloatPair::ZERO; 4];
        let a = [FloatPair { lo: 1.5, hi: 2.5 }; 4];
        let mut mode = RoundMode::Nearest;
        execute_bytecode(&bytecode, scratchpad, r, &mut f, &mut e, &a, &mut mode);
        (f, e)
    }

    #[test]
    fn small_positive_float_is_positive_and_at_least_one() {
        for entropy in [0u64, 1, u64::MAX, 0xDEAD_BEEF_CAFE_F00D] {
            let bits = small_positive_float_bits(entropy);
            let value = f64::from_bits(bits);
            assert!(value >= 1.0, "entropy {:#x} -> {}", entropy, value);
            assert!(value < 2f64.powi(33));
            assert_eq!(bits >> 63, 0);
        }
    }

    #[test]
    fn initialize_derives_aligned_pointers_and_read_registers() {
        let mut vm = test_vm();
        vm.fill_program(&[0x13u8; 64]);
        vm.initialize();
        let (ma, mx) = vm.stream_pointers();
        assert_eq!(ma % 64, 0);
        assert_eq!(mx % 64, 0);
        assert!(vm.read_reg[0] < 2);
        assert!((2..4).contains(&vm.read_reg[1]));
        assert!((4..6).contains(&vm.read_reg[2]));
        assert!((6..8).contains(&vm.read_reg[3]));
        for pair in vm.registers().a {
            assert!(pair.lo >= 1.0 && pair.hi >= 1.0);
        }
    }

    #[test]
    fn imul9c_is_nine_times_plus_imm() {
        let mut sp = Scratchpad::new().unwrap();
        let mut r = [0u64; 8];
        r[0] = 7;
        let mut op = one_op(OpKind::IMul9c);
        op.imm = 5;
        run_ops(&[op], &mut r, &mut sp);
        assert_eq!(r[0], 7 * 9 + 5);
    }

    #[test]
    fn rotates_use_low_six_bits_of_source() {
        let mut sp = Scratchpad::new().unwrap();
        let mut r = [0u64; 8];
        r[0] = 1;
        r[1] = 64 + 1; // effective shift 1
        let mut ror = one_op(OpKind::IRorR);
        ror.src = Operand::Reg(1);
        run_ops(&[ror], &mut r, &mut sp);
        assert_eq!(r[0], 1u64.rotate_right(1));

        let mut rol = one_op(OpKind::IRolR);
        rol.src = Operand::Reg(1);
        run_ops(&[rol], &mut r, &mut sp);
        assert_eq!(r[0], 1);
    }

    #[test]
    fn cond_increments_on_true_condition() {
        let mut sp = Scratchpad::new().unwrap();
        let mut r = [0u64; 8];
        r[1] = 10;
        let mut op = one_op(OpKind::CondR);
        op.src = Operand::Reg(1);
        op.imm = 10;
        op.condition = 2; // u==
        run_ops(&[op, op], &mut r, &mut sp);
        assert_eq!(r[0], 2);

        let mut ne = op;
        ne.condition = 3; // u!=
        let mut r2 = [0u64; 8];
        r2[1] = 10;
        run_ops(&[ne], &mut r2, &mut sp);
        assert_eq!(r2[0], 0);
    }

    #[test]
    fn istore_writes_through_destination_address() {
        let mut sp = Scratchpad::new().unwrap();
        let mut r = [0u64; 8];
        r[2] = 0x123456; // address register
        r[5] = 0xABCD; // value
        let mut op = one_op(OpKind::IStore);
        op.dst = 2;
        op.src = Operand::Reg(5);
        op.mem_mask = SCRATCHPAD_L2_MASK;
        run_ops(&[op], &mut r, &mut sp);
        assert_eq!(sp.load64(0x123456 & SCRATCHPAD_L2_MASK), 0xABCD);
    }

    #[test]
    fn cond_m_reads_masked_scratchpad_word() {
        let mut sp = Scratchpad::new().unwrap();
        sp.store64(0x1000, 42);
        let mut r = [0u64; 8];
        r[3] = 0x1000;
        let mut op = one_op(OpKind::CondM);
        op.src = Operand::Reg(3);
        op.mem_mask = SCRATCHPAD_L1_MASK;
        op.imm = 42;
        op.condition = 2; // u==
        run_ops(&[op], &mut r, &mut sp);
        assert_eq!(r[0], 1);
    }

    #[test]
    fn cfround_installs_rotated_mode() {
        let mut sp = Scratchpad::new().unwrap();
        let mut bytecode = Box::new([DispatchOp::default(); PROGRAM_LENGTH]);
        let mut op = one_op(OpKind::CFround);
        op.src = Operand::Reg(0);
        op.imm = 1;
        bytecode[0] = op;
        let mut r = [0u64; 8];
        r[0] = 0b110; // rotated right by 1 -> 0b11
        let mut f = [FloatPair::ZERO; 4];
        let mut e = [FloatPair::ZERO; 4];
        let a = [FloatPair::ZERO; 4];
        let mut mode = RoundMode::Nearest;
        execute_bytecode(&bytecode, &mut sp, &mut r, &mut f, &mut e, &a, &mut mode);
        assert_eq!(mode, RoundMode::Zero);
    }

    #[test]
    fn fdiv_m_clamps_to_dbl_min() {
        let mut sp = Scratchpad::new().unwrap();
        // divisor pair loads (0, 0) -> division yields inf/NaN, clamped
        let mut r = [0u64; 8];
        let mut op = one_op(OpKind::FDivM);
        op.dst = 1;
        op.src = Operand::Reg(0);
        op.mem_mask = SCRATCHPAD_L1_MASK;
        let (_, e) = run_ops(&[op], &mut r, &mut sp);
        assert!(e[1].lo >= DBL_MIN || e[1].lo.is_infinite());
        assert!(e[1].hi >= DBL_MIN || e[1].hi.is_infinite());
        assert_eq!(e[1].lo.to_bits() >> 63, 0);
    }

    #[test]
    fn fswap_spans_both_float_groups() {
        let mut sp = Scratchpad::new().unwrap();
        let mut bytecode = Box::new([DispatchOp::default(); PROGRAM_LENGTH]);
        let mut low = one_op(OpKind::FSwapR);
        low.dst = 1;
        let mut high = one_op(OpKind::FSwapR);
        high.dst = 6;
        bytecode[0] = low;
        bytecode[1] = high;
        let mut r = [0u64; 8];
        let mut f = [FloatPair::ZERO; 4];
        let mut e = [FloatPair::ZERO; 4];
        f[1] = FloatPair { lo: 1.0, hi: 2.0 };
        e[2] = FloatPair { lo: 3.0, hi: 4.0 };
        let a = [FloatPair::ZERO; 4];
        let mut mode = RoundMode::Nearest;
        execute_bytecode(&bytecode, &mut sp, &mut r, &mut f, &mut e, &a, &mut mode);
        assert_eq!(f[1], FloatPair { lo: 2.0, hi: 1.0 });
        assert_eq!(e[2], FloatPair { lo: 4.0, hi: 3.0 });
    }

    #[test]
    fn execute_keeps_stream_pointers_aligned() {
        let mut vm = test_vm();
        vm.init_scratchpad(&[0x31u8; 64]);
        vm.fill_program(&[0x32u8; 64]);
        vm.initialize();
        vm.execute().unwrap();
        let (ma, mx) = vm.stream_pointers();
        assert_eq!(ma % 64, 0);
        assert_eq!(mx % 64, 0);
    }

    #[test]
    fn execute_leaves_e_registers_non_negative() {
        let mut vm = test_vm();
        vm.init_scratchpad(&[0x55u8; 64]);
        vm.fill_program(&[0x56u8; 64]);
        vm.initialize();
        vm.execute().unwrap();
        for pair in vm.registers().e {
            let (lo, hi) = pair.to_bits();
            assert_eq!(lo >> 63, 0);
            assert_eq!(hi >> 63, 0);
        }
    }

    #[test]
    fn execute_is_deterministic() {
        let run = || {
            let mut vm = test_vm();
            vm.init_scratchpad(&[0xA1u8; 64]);
            vm.fill_program(&[0xA2u8; 64]);
            vm.initialize();
            vm.execute().unwrap();
            vm.registers().to_bytes()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn result_final_differs_from_intermediate() {
        let mut vm = test_vm();
        vm.init_scratchpad(&[0xB1u8; 64]);
        vm.fill_program(&[0xB2u8; 64]);
        vm.initialize();
        vm.execute().unwrap();
        let intermediate = vm.result_intermediate();
        let final_digest = vm.result_final();
        assert_ne!(&intermediate[..32], final_digest.as_slice());
    }
}
